use std::collections::HashMap;
use std::fmt::Write;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::{Appointment, GuidanceStatus, User};
use crate::scheduler::slot_label;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSummary {
    pub status: GuidanceStatus,
    pub count: usize,
}

pub fn summarize_by_status(candidates: &[User]) -> Vec<StatusSummary> {
    let mut map: HashMap<GuidanceStatus, usize> = HashMap::new();

    for student in candidates.iter().filter_map(User::as_student) {
        *map.entry(student.guidance_status).or_insert(0) += 1;
    }

    let mut summaries: Vec<StatusSummary> = map
        .into_iter()
        .map(|(status, count)| StatusSummary { status, count })
        .collect();

    summaries.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.status.as_str().cmp(b.status.as_str()))
    });
    summaries
}

/// `student_names` resolves appointment holders; unknown ids print as-is.
pub fn build_report(
    advisor_name: &str,
    department: Option<&str>,
    from: NaiveDate,
    to: NaiveDate,
    candidates: &[User],
    appointments: &[Appointment],
    student_names: &HashMap<Uuid, String>,
) -> String {
    let summaries = summarize_by_status(candidates);

    let mut output = String::new();
    let department_label = department.unwrap_or("no department");

    let _ = writeln!(output, "# Guidance Report");
    let _ = writeln!(
        output,
        "Prepared for {} ({}), appointments from {} to {}",
        advisor_name, department_label, from, to
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Guidance Status Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No students currently need guidance.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(output, "- {}: {} students", summary.status, summary.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students Needing Guidance");

    if candidates.is_empty() {
        let _ = writeln!(output, "No students currently need guidance.");
    } else {
        for user in candidates {
            let Some(student) = user.as_student() else {
                continue;
            };
            let gpa = student
                .gpa
                .map(|gpa| format!("{gpa:.2}"))
                .unwrap_or_else(|| "n/a".to_string());
            let _ = writeln!(
                output,
                "- {} ({}) gpa {} status {}",
                user.name, user.email, gpa, student.guidance_status
            );
        }
    }

    let mut upcoming = appointments.to_vec();
    upcoming.sort_by_key(|a| a.start_time);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Appointments");

    if upcoming.is_empty() {
        let _ = writeln!(output, "No appointments in this window.");
    } else {
        for appointment in upcoming.iter() {
            let who = student_names
                .get(&appointment.student_id)
                .cloned()
                .unwrap_or_else(|| appointment.student_id.to_string());
            let _ = writeln!(
                output,
                "- {} at {} with {} ({})",
                appointment.start_time.date(),
                slot_label(appointment.start_time.time()),
                who,
                appointment.status
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::{AppointmentStatus, Profile, StudentData};

    fn candidate(name: &str, gpa: f64, status: GuidanceStatus) -> User {
        User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: format!("{}@campus.edu", name.to_lowercase()),
            created_at: Utc::now(),
            profile: Profile::Student(StudentData {
                gpa: Some(gpa),
                guidance_status: status,
                ..StudentData::default()
            }),
        }
    }

    #[test]
    fn summaries_count_each_status() {
        let candidates = vec![
            candidate("Chioma", 1.5, GuidanceStatus::Summoned),
            candidate("Bola", 1.1, GuidanceStatus::NeedsGuidance),
            candidate("Dayo", 1.9, GuidanceStatus::NeedsGuidance),
        ];
        let summaries = summarize_by_status(&candidates);
        assert_eq!(
            summaries,
            vec![
                StatusSummary { status: GuidanceStatus::NeedsGuidance, count: 2 },
                StatusSummary { status: GuidanceStatus::Summoned, count: 1 },
            ]
        );
    }

    fn appointment_at(student_id: Uuid, date: NaiveDate, hour: u32, minute: u32) -> Appointment {
        let start = date.and_hms_opt(hour, minute, 0).expect("time");
        Appointment {
            id: Uuid::new_v4(),
            student_id,
            advisor_id: Uuid::new_v4(),
            start_time: start,
            end_time: start + chrono::Duration::minutes(30),
            status: AppointmentStatus::Scheduled,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn report_lists_candidates_and_appointments() {
        let chioma = candidate("Chioma", 1.5, GuidanceStatus::Summoned);
        let date = NaiveDate::from_ymd_opt(2025, 11, 1).expect("date");
        let appointment = appointment_at(chioma.id, date, 9, 30);
        let names = HashMap::from([(chioma.id, chioma.name.clone())]);

        let report = build_report(
            "Dr. A",
            Some("CS"),
            date,
            date,
            &[chioma],
            &[appointment],
            &names,
        );
        assert!(report.starts_with("# Guidance Report"));
        assert!(report.contains("Prepared for Dr. A (CS)"));
        assert!(report.contains("- summoned: 1 students"));
        assert!(report.contains("- Chioma (chioma@campus.edu) gpa 1.50 status summoned"));
        assert!(report.contains("- 2025-11-01 at 9:30 with Chioma (scheduled)"));
    }

    #[test]
    fn empty_report_says_so() {
        let date = NaiveDate::from_ymd_opt(2025, 11, 1).expect("date");
        let report = build_report("Dr. A", None, date, date, &[], &[], &HashMap::new());
        assert!(report.contains("(no department)"));
        assert!(report.contains("No appointments in this window."));
    }

    #[test]
    fn appointments_name_students_who_are_not_candidates() {
        let date = NaiveDate::from_ymd_opt(2025, 11, 1).expect("date");
        let amina = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let names = HashMap::from([(amina, "Amina".to_string())]);
        let appointments = [
            appointment_at(amina, date, 10, 0),
            appointment_at(stranger, date, 11, 0),
        ];

        let report = build_report("Dr. A", Some("CS"), date, date, &[], &appointments, &names);
        assert!(report.contains("- 2025-11-01 at 10:00 with Amina (scheduled)"));
        assert!(report.contains(&format!("- 2025-11-01 at 11:00 with {stranger} (scheduled)")));
    }
}
