//! Guidance status engine: who needs an advisor's attention, and what has
//! been done about it.
//!
//! Status is durable state. A GPA below [`GUIDANCE_GPA_THRESHOLD`] only ever
//! moves a student *into* `needs_guidance`; once an advisor has acted
//! (`summoned`, `seen`) the metric no longer overrides the recorded outcome.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{PortalError, PortalResult};
use crate::locks::KeyedLocks;
use crate::models::{GuidanceStatus, StudentData, StudentUpdate, User};
use crate::store::{bounded, EntityStore};

pub const GUIDANCE_GPA_THRESHOLD: f64 = 2.0;
pub const MAX_GPA: f64 = 5.0;

/// Outcome of a guidance transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuidanceChange {
    pub student_id: Uuid,
    pub previous: GuidanceStatus,
    pub current: GuidanceStatus,
    pub student: StudentData,
}

/// Eligibility on the status and GPA alone; department and enrollment are
/// filtered by the store query.
pub fn qualifies(student: &StudentData) -> bool {
    match student.guidance_status {
        GuidanceStatus::Seen => false,
        GuidanceStatus::NeedsGuidance | GuidanceStatus::Summoned => true,
        GuidanceStatus::GoodStanding => student
            .gpa
            .is_some_and(|gpa| gpa < GUIDANCE_GPA_THRESHOLD),
    }
}

/// Lowest GPA first, missing GPA last, then by name.
pub fn rank_candidates(mut candidates: Vec<User>) -> Vec<User> {
    candidates.sort_by(|a, b| {
        let gpa_a = a.as_student().and_then(|s| s.gpa);
        let gpa_b = b.as_student().and_then(|s| s.gpa);
        let by_gpa = match (gpa_a, gpa_b) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_gpa.then_with(|| a.name.cmp(&b.name))
    });
    candidates
}

/// Status a fresh GPA snapshot leads to.
pub fn status_after_gpa(student: &StudentData, gpa: f64) -> GuidanceStatus {
    let below = gpa < GUIDANCE_GPA_THRESHOLD;
    match student.guidance_status {
        GuidanceStatus::GoodStanding if below => GuidanceStatus::NeedsGuidance,
        GuidanceStatus::Seen if below && student.gpa != Some(gpa) => GuidanceStatus::NeedsGuidance,
        unchanged => unchanged,
    }
}

/// Current time at storage precision, strictly after `previous`.
fn next_instant(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(6);
    match previous {
        Some(previous) if now <= previous => previous + chrono::Duration::microseconds(1),
        _ => now,
    }
}

pub struct GuidanceEngine {
    store: Arc<dyn EntityStore>,
    timeout: Duration,
    students: KeyedLocks<Uuid>,
}

impl GuidanceEngine {
    pub fn new(store: Arc<dyn EntityStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            students: KeyedLocks::new(),
        }
    }

    pub async fn list_candidates(&self, advisor_id: Uuid) -> PortalResult<Vec<User>> {
        let advisor = bounded(self.timeout, self.store.get_user(advisor_id))
            .await?
            .ok_or_else(|| PortalError::not_found("advisor"))?;
        let profile = advisor
            .as_advisor()
            .ok_or_else(|| PortalError::not_found("advisor"))?;

        let Some(department) = profile.department.as_deref() else {
            tracing::warn!(advisor = %advisor_id, "advisor has no department assigned");
            return Ok(Vec::new());
        };

        let students = bounded(
            self.timeout,
            self.store.enrolled_students_in_department(department),
        )
        .await?;

        let candidates = students
            .into_iter()
            .filter(|user| user.as_student().is_some_and(qualifies))
            .collect();

        Ok(rank_candidates(candidates))
    }

    /// Repeating a summon only refreshes the timestamp. A `seen` student is
    /// reopened by a new GPA snapshot or a reset, never by a summon.
    pub async fn summon(
        &self,
        student_id: Uuid,
        advisor_id: Uuid,
    ) -> PortalResult<GuidanceChange> {
        let change = self
            .transition(student_id, |student| {
                if student.guidance_status == GuidanceStatus::Seen {
                    return Err(PortalError::invalid("student was already seen this cycle"));
                }
                Ok(StudentUpdate {
                    guidance_status: Some(GuidanceStatus::Summoned),
                    last_summoned_at: Some(next_instant(student.last_summoned_at)),
                    summoned_by_advisor_id: Some(advisor_id),
                    ..StudentUpdate::default()
                })
            })
            .await?;
        tracing::info!(advisor = %advisor_id, student = %student_id, "student summoned");
        Ok(change)
    }

    pub async fn mark_seen(
        &self,
        student_id: Uuid,
        advisor_id: Uuid,
    ) -> PortalResult<GuidanceChange> {
        let change = self
            .transition(student_id, |student| {
                Ok(StudentUpdate {
                    guidance_status: Some(GuidanceStatus::Seen),
                    last_seen_at: Some(next_instant(student.last_seen_at)),
                    seen_by_advisor_id: Some(advisor_id),
                    ..StudentUpdate::default()
                })
            })
            .await?;
        tracing::info!(advisor = %advisor_id, student = %student_id, "student marked seen");
        Ok(change)
    }

    /// Explicitly closes a guidance cycle. History fields are kept.
    pub async fn reset(&self, student_id: Uuid, actor_id: Uuid) -> PortalResult<GuidanceChange> {
        let change = self
            .transition(student_id, |_| {
                Ok(StudentUpdate {
                    guidance_status: Some(GuidanceStatus::GoodStanding),
                    ..StudentUpdate::default()
                })
            })
            .await?;
        tracing::info!(
            actor = %actor_id,
            student = %student_id,
            "guidance reset to good standing"
        );
        Ok(change)
    }

    /// Stores an externally computed GPA and applies the entry trigger.
    pub async fn record_gpa(&self, student_id: Uuid, gpa: f64) -> PortalResult<GuidanceChange> {
        if !gpa.is_finite() || !(0.0..=MAX_GPA).contains(&gpa) {
            return Err(PortalError::invalid(format!(
                "gpa must be between 0.0 and {MAX_GPA:.1}"
            )));
        }

        let change = self
            .transition(student_id, |student| {
                let next = status_after_gpa(student, gpa);
                Ok(StudentUpdate {
                    gpa: Some(gpa),
                    guidance_status: (next != student.guidance_status).then_some(next),
                    ..StudentUpdate::default()
                })
            })
            .await?;
        if change.previous != change.current {
            tracing::info!(
                student = %student_id,
                gpa,
                from = %change.previous,
                to = %change.current,
                "gpa snapshot changed guidance status"
            );
        }
        Ok(change)
    }

    async fn transition<F>(&self, student_id: Uuid, plan: F) -> PortalResult<GuidanceChange>
    where
        F: FnOnce(&StudentData) -> PortalResult<StudentUpdate>,
    {
        let _guard = self.students.lock(&student_id).await;

        let user = bounded(self.timeout, self.store.get_user(student_id))
            .await?
            .ok_or_else(|| PortalError::not_found("student"))?;
        let mut student = user
            .as_student()
            .cloned()
            .ok_or_else(|| PortalError::not_found("student"))?;

        let update = plan(&student)?;
        let written =
            bounded(self.timeout, self.store.update_student(student_id, &update)).await?;
        if !written {
            return Err(PortalError::not_found("student"));
        }

        let previous = student.guidance_status;
        update.apply_to(&mut student);
        Ok(GuidanceChange {
            student_id,
            previous,
            current: student.guidance_status,
            student,
        })
    }
}
