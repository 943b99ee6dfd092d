use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PortalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Advisor,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Advisor => "advisor",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = PortalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "student" => Ok(Role::Student),
            "advisor" => Ok(Role::Advisor),
            "admin" => Ok(Role::Admin),
            other => Err(PortalError::invalid(format!("unknown role {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuidanceStatus {
    #[default]
    GoodStanding,
    NeedsGuidance,
    Summoned,
    Seen,
}

impl GuidanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GuidanceStatus::GoodStanding => "good_standing",
            GuidanceStatus::NeedsGuidance => "needs_guidance",
            GuidanceStatus::Summoned => "summoned",
            GuidanceStatus::Seen => "seen",
        }
    }
}

impl fmt::Display for GuidanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GuidanceStatus {
    type Err = PortalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "good_standing" => Ok(GuidanceStatus::GoodStanding),
            "needs_guidance" => Ok(GuidanceStatus::NeedsGuidance),
            "summoned" => Ok(GuidanceStatus::Summoned),
            "seen" => Ok(GuidanceStatus::Seen),
            other => Err(PortalError::invalid(format!("unknown guidance status {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentData {
    pub advisor_id: Option<Uuid>,
    pub gpa: Option<f64>,
    pub department: Option<String>,
    pub is_enrolled: bool,
    pub guidance_status: GuidanceStatus,
    pub last_summoned_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub summoned_by_advisor_id: Option<Uuid>,
    pub seen_by_advisor_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvisorData {
    pub department: Option<String>,
    pub office_location: Option<String>,
    pub office_hours: Option<String>,
}

/// Role-specific payload. The variant is the user's role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Profile {
    Student(StudentData),
    Advisor(AdvisorData),
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub profile: Profile,
}

impl User {
    pub fn role(&self) -> Role {
        match self.profile {
            Profile::Student(_) => Role::Student,
            Profile::Advisor(_) => Role::Advisor,
            Profile::Admin => Role::Admin,
        }
    }

    pub fn as_student(&self) -> Option<&StudentData> {
        match &self.profile {
            Profile::Student(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_advisor(&self) -> Option<&AdvisorData> {
        match &self.profile {
            Profile::Advisor(data) => Some(data),
            _ => None,
        }
    }
}

/// Field overwrites applied to a student profile. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentUpdate {
    pub guidance_status: Option<GuidanceStatus>,
    pub last_summoned_at: Option<DateTime<Utc>>,
    pub summoned_by_advisor_id: Option<Uuid>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub seen_by_advisor_id: Option<Uuid>,
    pub gpa: Option<f64>,
    pub advisor_id: Option<Uuid>,
    pub is_enrolled: Option<bool>,
}

impl StudentUpdate {
    pub fn apply_to(&self, student: &mut StudentData) {
        if let Some(status) = self.guidance_status {
            student.guidance_status = status;
        }
        if let Some(at) = self.last_summoned_at {
            student.last_summoned_at = Some(at);
        }
        if let Some(advisor) = self.summoned_by_advisor_id {
            student.summoned_by_advisor_id = Some(advisor);
        }
        if let Some(at) = self.last_seen_at {
            student.last_seen_at = Some(at);
        }
        if let Some(advisor) = self.seen_by_advisor_id {
            student.seen_by_advisor_id = Some(advisor);
        }
        if let Some(gpa) = self.gpa {
            student.gpa = Some(gpa);
        }
        if let Some(advisor) = self.advisor_id {
            student.advisor_id = Some(advisor);
        }
        if let Some(enrolled) = self.is_enrolled {
            student.is_enrolled = enrolled;
        }
    }
}

/// Admin edit of an account. `advisor_id` only applies to students.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountUpdate {
    pub name: String,
    pub email: String,
    pub advisor_id: Option<Uuid>,
}

impl AccountUpdate {
    pub fn apply_to(&self, user: &mut User) {
        user.name = self.name.clone();
        user.email = self.email.clone();
        if let (Some(advisor), Profile::Student(student)) = (self.advisor_id, &mut user.profile) {
            student.advisor_id = Some(advisor);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, AppointmentStatus::Scheduled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = PortalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "scheduled" => Ok(AppointmentStatus::Scheduled),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            other => Err(PortalError::invalid(format!("unknown appointment status {other:?}"))),
        }
    }
}

/// A booked half-hour with an advisor. Times are campus-local wall clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub student_id: Uuid,
    pub advisor_id: Uuid,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub student_id: Uuid,
    pub course_ids: Vec<String>,
    pub semester: String,
    pub session: String,
}

/// A candidate slot on the daily grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotOffer {
    pub label: String,
    pub available: bool,
}

/// The verified caller behind a session credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub subject_id: Uuid,
    pub role: Role,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_students: i64,
    pub total_advisors: i64,
    pub total_admins: i64,
    pub total_appointments: i64,
    pub scheduled_appointments: i64,
    pub completed_appointments: i64,
    pub cancelled_appointments: i64,
}
