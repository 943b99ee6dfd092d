use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PortalError, PortalResult};
use crate::models::{Enrollment, StudentUpdate};
use crate::store::{bounded, EntityStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRegistration {
    pub semester: String,
    pub session: String,
    pub course_ids: Vec<String>,
}

/// Trimmed, non-empty course ids in first-seen order.
pub fn normalize_courses(course_ids: &[String]) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::with_capacity(course_ids.len());
    for id in course_ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty()) {
        if !ordered.iter().any(|seen| seen == id) {
            ordered.push(id.to_string());
        }
    }
    ordered
}

/// Keeps one enrollment record per student, semester and session.
pub struct Registrar {
    store: Arc<dyn EntityStore>,
    timeout: Duration,
}

impl Registrar {
    pub fn new(store: Arc<dyn EntityStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn register(
        &self,
        student_id: Uuid,
        registration: &CourseRegistration,
    ) -> PortalResult<Enrollment> {
        let semester = registration.semester.trim();
        let session = registration.session.trim();
        if semester.is_empty() || session.is_empty() {
            return Err(PortalError::invalid("semester and session are required"));
        }

        let enrollment = Enrollment {
            student_id,
            course_ids: normalize_courses(&registration.course_ids),
            semester: semester.to_string(),
            session: session.to_string(),
        };
        bounded(self.timeout, self.store.upsert_enrollment(&enrollment)).await?;

        if !enrollment.course_ids.is_empty() {
            let update = StudentUpdate {
                is_enrolled: Some(true),
                ..StudentUpdate::default()
            };
            let written =
                bounded(self.timeout, self.store.update_student(student_id, &update)).await?;
            if !written {
                return Err(PortalError::not_found("student"));
            }
        }

        tracing::info!(
            student = %student_id,
            semester,
            session,
            courses = enrollment.course_ids.len(),
            "courses registered"
        );
        Ok(enrollment)
    }

    pub async fn current(
        &self,
        student_id: Uuid,
        semester: &str,
        session: &str,
    ) -> PortalResult<Option<Enrollment>> {
        Ok(bounded(
            self.timeout,
            self.store.get_enrollment(student_id, semester.trim(), session.trim()),
        )
        .await?)
    }
}
