use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use guidance_portal::enrollment::CourseRegistration;
use guidance_portal::identity::PgIdentityProvider;
use guidance_portal::models::Role;
use guidance_portal::retry::{retry_transient, RetryPolicy};
use guidance_portal::roster::{NewUser, UserEdit};
use guidance_portal::scheduler::BookingRequest;
use guidance_portal::store::postgres::init_db;
use guidance_portal::store::PgStore;
use guidance_portal::{Portal, PortalConfig, PortalError};

#[derive(Parser)]
#[command(name = "guidance-portal")]
#[command(about = "Advisor guidance workflow and appointment booking", long_about = None)]
struct Cli {
    /// Session credential issued by the identity provider
    #[arg(long, global = true, env = "PORTAL_SESSION", hide_env_values = true)]
    session: Option<String>,
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Show who the session belongs to
    Whoami,
    /// List students needing guidance (advisor)
    Candidates {
        #[arg(long)]
        advisor: String,
    },
    /// Summon a student for guidance (advisor)
    Summon {
        #[arg(long)]
        student: String,
    },
    /// Mark a student as seen (advisor)
    MarkSeen {
        #[arg(long)]
        student: String,
    },
    /// Return a student to good standing (advisor or admin)
    ResetGuidance {
        #[arg(long)]
        student: String,
    },
    /// Show an advisor's slots for a day (student)
    Slots {
        #[arg(long)]
        advisor: String,
        #[arg(long)]
        date: String,
    },
    /// Book a half-hour slot (student)
    Book {
        #[arg(long)]
        student: String,
        #[arg(long)]
        advisor: String,
        #[arg(long)]
        date: String,
        #[arg(long)]
        time: String,
    },
    /// Mark an appointment completed (advisor)
    Complete {
        #[arg(long)]
        appointment: String,
    },
    /// Cancel an appointment (student or advisor)
    Cancel {
        #[arg(long)]
        appointment: String,
    },
    /// List your appointments (student or advisor)
    Appointments,
    /// Register courses for a semester (student)
    RegisterCourses {
        #[arg(long)]
        semester: String,
        #[arg(long = "academic-session")]
        academic_session: String,
        #[arg(long = "course", required = true)]
        courses: Vec<String>,
    },
    /// Show your registered courses for a term (student)
    Courses {
        #[arg(long)]
        semester: String,
        #[arg(long = "academic-session")]
        academic_session: String,
    },
    /// Create a user account (admin)
    CreateUser {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, value_parser = parse_role)]
        role: Role,
        #[arg(long)]
        department: Option<String>,
        #[arg(long)]
        advisor_id: Option<uuid::Uuid>,
        #[arg(long)]
        gpa: Option<f64>,
        #[arg(long)]
        enrolled: bool,
        #[arg(long)]
        office_location: Option<String>,
        #[arg(long)]
        office_hours: Option<String>,
    },
    /// Edit a user's name, email or advisor (admin)
    UpdateUser {
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        advisor_id: Option<uuid::Uuid>,
    },
    /// Assign an advisor to a student (admin)
    AssignAdvisor {
        #[arg(long)]
        student: String,
        #[arg(long)]
        advisor: String,
    },
    /// Delete a user account (admin)
    DeleteUser {
        #[arg(long)]
        user: String,
    },
    /// List user accounts (admin)
    Users {
        #[arg(long, value_parser = parse_role)]
        role: Option<Role>,
    },
    /// Record a GPA snapshot for a student (admin)
    RecordGpa {
        #[arg(long)]
        student: String,
        #[arg(long)]
        gpa: f64,
    },
    /// Import GPA snapshots from a CSV file with student_email,gpa columns (admin)
    ImportGpa {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Show roster and appointment counts (admin)
    Stats,
    /// Write a markdown guidance report (advisor)
    Report {
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn parse_role(value: &str) -> Result<Role, String> {
    value.parse().map_err(|err: PortalError| err.to_string())
}

fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce(&T)) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

async fn import_gpa(
    portal: &Portal,
    session: &str,
    csv_path: &std::path::Path,
) -> anyhow::Result<(usize, usize)> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_email: String,
        gpa: f64,
    }

    let policy = RetryPolicy::default();
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut updated = 0usize;
    let mut flagged = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let student =
            retry_transient(policy, || portal.find_user_by_email(session, &row.student_email))
                .await
                .with_context(|| format!("looking up {}", row.student_email))?;
        let student_id = student.id.to_string();
        let change = retry_transient(policy, || portal.record_gpa(session, &student_id, row.gpa))
            .await
            .with_context(|| format!("recording gpa for {}", row.student_email))?;

        updated += 1;
        if change.previous != change.current {
            flagged += 1;
        }
    }

    Ok((updated, flagged))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = PortalConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.store_timeout)
        .connect(config.require_database_url()?)
        .await
        .context("failed to connect to Postgres")?;

    if let Commands::InitDb = cli.command {
        init_db(&pool).await?;
        println!("Schema ready.");
        return Ok(());
    }

    let portal = Portal::new(
        Arc::new(PgStore::new(pool.clone())),
        Arc::new(PgIdentityProvider::new(pool)),
        &config,
    );
    let session = cli
        .session
        .context("a session credential is required (--session or PORTAL_SESSION)")?;
    let session = session.as_str();
    let json = cli.json;
    let policy = RetryPolicy::default();

    match cli.command {
        Commands::InitDb => unreachable!("handled before the portal is built"),
        Commands::Whoami => {
            let identity = portal.whoami(session).await?;
            emit(json, &identity, |who| {
                println!("{} <{}> signed in as {}", who.name, who.email, who.role);
            })?;
        }
        Commands::Candidates { advisor } => {
            let candidates = retry_transient(policy, || {
                portal.list_guidance_candidates(session, &advisor)
            })
            .await?;
            emit(json, &candidates, |candidates| {
                if candidates.is_empty() {
                    println!("No students currently need guidance.");
                    return;
                }
                println!("Students needing guidance:");
                for user in candidates {
                    if let Some(student) = user.as_student() {
                        let gpa = student
                            .gpa
                            .map(|gpa| format!("{gpa:.2}"))
                            .unwrap_or_else(|| "n/a".to_string());
                        println!(
                            "- {} ({}) id {} gpa {} status {}",
                            user.name, user.email, user.id, gpa, student.guidance_status
                        );
                    }
                }
            })?;
        }
        Commands::Summon { student } => {
            let change = retry_transient(policy, || portal.summon(session, &student)).await?;
            emit(json, &change, |change| {
                println!("Student {} is now {}.", change.student_id, change.current);
            })?;
        }
        Commands::MarkSeen { student } => {
            let change = retry_transient(policy, || portal.mark_seen(session, &student)).await?;
            emit(json, &change, |change| {
                println!("Student {} is now {}.", change.student_id, change.current);
            })?;
        }
        Commands::ResetGuidance { student } => {
            let change =
                retry_transient(policy, || portal.reset_guidance(session, &student)).await?;
            emit(json, &change, |change| {
                println!("Student {} is now {}.", change.student_id, change.current);
            })?;
        }
        Commands::Slots { advisor, date } => {
            let slots = retry_transient(policy, || {
                portal.get_available_slots(session, &advisor, &date)
            })
            .await?;
            emit(json, &slots, |slots| {
                println!("Slots on {date}:");
                for slot in slots {
                    let state = if slot.available { "open" } else { "booked" };
                    println!("- {:>5} {}", slot.label, state);
                }
            })?;
        }
        Commands::Book {
            student,
            advisor,
            date,
            time,
        } => {
            let request = BookingRequest {
                student_id: student,
                advisor_id: advisor,
                date,
                time_label: time,
            };
            let appointment = retry_transient(policy, || portal.book(session, &request)).await?;
            emit(json, &appointment, |appointment| {
                println!(
                    "Booked {} from {} to {} (appointment {}).",
                    appointment.start_time.date(),
                    appointment.start_time.time(),
                    appointment.end_time.time(),
                    appointment.id
                );
            })?;
        }
        Commands::Complete { appointment } => {
            let updated = retry_transient(policy, || {
                portal.complete_appointment(session, &appointment)
            })
            .await?;
            emit(json, &updated, |updated| {
                println!("Appointment {} is {}.", updated.id, updated.status);
            })?;
        }
        Commands::Cancel { appointment } => {
            let updated =
                retry_transient(policy, || portal.cancel_appointment(session, &appointment)).await?;
            emit(json, &updated, |updated| {
                println!("Appointment {} is {}.", updated.id, updated.status);
            })?;
        }
        Commands::Appointments => {
            let appointments = retry_transient(policy, || portal.my_appointments(session)).await?;
            emit(json, &appointments, |appointments| {
                if appointments.is_empty() {
                    println!("No appointments.");
                }
                for appointment in appointments {
                    println!(
                        "- {} {} {} ({})",
                        appointment.start_time.date(),
                        appointment.start_time.time(),
                        appointment.id,
                        appointment.status
                    );
                }
            })?;
        }
        Commands::RegisterCourses {
            semester,
            academic_session,
            courses,
        } => {
            let registration = CourseRegistration {
                semester,
                session: academic_session,
                course_ids: courses,
            };
            let enrollment =
                retry_transient(policy, || portal.register_courses(session, &registration)).await?;
            emit(json, &enrollment, |enrollment| {
                println!(
                    "Registered {} courses for {} {}.",
                    enrollment.course_ids.len(),
                    enrollment.semester,
                    enrollment.session
                );
            })?;
        }
        Commands::Courses {
            semester,
            academic_session,
        } => {
            let enrollment = retry_transient(policy, || {
                portal.enrolled_courses(session, &semester, &academic_session)
            })
            .await?;
            emit(json, &enrollment, |enrollment| match enrollment {
                Some(enrollment) => {
                    println!("Courses for {} {}:", enrollment.semester, enrollment.session);
                    for course in &enrollment.course_ids {
                        println!("- {course}");
                    }
                }
                None => println!("No courses registered for {semester} {academic_session}."),
            })?;
        }
        Commands::CreateUser {
            name,
            email,
            role,
            department,
            advisor_id,
            gpa,
            enrolled,
            office_location,
            office_hours,
        } => {
            let new_user = NewUser {
                department,
                advisor_id,
                gpa,
                is_enrolled: enrolled,
                office_location,
                office_hours,
                ..NewUser::new(name, email, role)
            };
            // Not retried: a lost response would re-create the identity.
            let user = portal.create_user(session, new_user).await?;
            emit(json, &user, |user| {
                println!("Created {} {} ({}).", user.role(), user.name, user.id);
            })?;
        }
        Commands::UpdateUser {
            user,
            name,
            email,
            advisor_id,
        } => {
            let edit = UserEdit {
                name,
                email,
                advisor_id,
            };
            let updated = portal.update_user(session, &user, edit).await?;
            emit(json, &updated, |updated| {
                println!("Updated {} <{}> ({}).", updated.name, updated.email, updated.id);
            })?;
        }
        Commands::AssignAdvisor { student, advisor } => {
            retry_transient(policy, || portal.assign_advisor(session, &student, &advisor))
                .await?;
            println!("Advisor {advisor} assigned to student {student}.");
        }
        Commands::DeleteUser { user } => {
            let deleted = portal.delete_user(session, &user).await?;
            emit(json, &deleted, |deleted| {
                println!("Deleted {} {} ({}).", deleted.role(), deleted.name, deleted.id);
            })?;
        }
        Commands::Users { role } => {
            let users = retry_transient(policy, || portal.list_users(session, role)).await?;
            emit(json, &users, |users| {
                for user in users {
                    println!("- {} <{}> {} {}", user.name, user.email, user.role(), user.id);
                }
            })?;
        }
        Commands::RecordGpa { student, gpa } => {
            let change =
                retry_transient(policy, || portal.record_gpa(session, &student, gpa)).await?;
            emit(json, &change, |change| {
                println!(
                    "Recorded gpa {gpa:.2} for {}; status {} -> {}.",
                    change.student_id, change.previous, change.current
                );
            })?;
        }
        Commands::ImportGpa { csv } => {
            let (updated, flagged) = import_gpa(&portal, session, &csv).await?;
            println!(
                "Recorded {updated} GPA snapshots from {} ({flagged} status changes).",
                csv.display()
            );
        }
        Commands::Stats => {
            let stats = retry_transient(policy, || portal.system_stats(session)).await?;
            emit(json, &stats, |stats| {
                println!("Students: {}", stats.total_students);
                println!("Advisors: {}", stats.total_advisors);
                println!("Admins: {}", stats.total_admins);
                println!(
                    "Appointments: {} ({} scheduled, {} completed, {} cancelled)",
                    stats.total_appointments,
                    stats.scheduled_appointments,
                    stats.completed_appointments,
                    stats.cancelled_appointments
                );
            })?;
        }
        Commands::Report { from, to, out } => {
            let from = from.unwrap_or_else(|| Utc::now().date_naive());
            let to = to.unwrap_or(from + Duration::days(7));
            let report =
                retry_transient(policy, || portal.guidance_report(session, from, to)).await?;
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
