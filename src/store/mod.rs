//! Entity store seam.
//!
//! Adapters give at-least-once reads and writes with no multi-record
//! transactions. The two guarantees the engines lean on are conditional:
//! `insert_appointment` refuses a second live booking for the same
//! `(advisor_id, start_time)` and `transition_appointment` only moves a row
//! that is still in the expected state.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    AccountUpdate, Appointment, AppointmentStatus, Enrollment, Role, StudentUpdate, SystemStats,
    User,
};

#[cfg(test)]
pub(crate) mod faulty;
pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Which appointments to list. Unset fields do not filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppointmentFilter {
    pub student_id: Option<Uuid>,
    pub advisor_id: Option<Uuid>,
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Fails with `Conflict` if the id or email is taken.
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;

    /// Returns false when no such user existed.
    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn list_users(&self, role: Option<Role>) -> Result<Vec<User>, StoreError>;

    async fn enrolled_students_in_department(
        &self,
        department: &str,
    ) -> Result<Vec<User>, StoreError>;

    /// Rewrites name, email and (for students) advisor. `Conflict` if the
    /// email belongs to another user; false when `id` does not exist.
    async fn update_account(&self, id: Uuid, update: &AccountUpdate) -> Result<bool, StoreError>;

    /// Unconditional field overwrite. Returns false when `id` is not a student.
    async fn update_student(&self, id: Uuid, update: &StudentUpdate) -> Result<bool, StoreError>;

    /// Non-cancelled appointments of `advisor_id` starting within `[from, to]`.
    async fn appointments_starting_between(
        &self,
        advisor_id: Uuid,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn list_appointments(
        &self,
        filter: AppointmentFilter,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    /// Conditional write: `Conflict` if a non-cancelled appointment already
    /// holds the same advisor and start time.
    async fn insert_appointment(&self, appointment: &Appointment) -> Result<(), StoreError>;

    /// Moves `id` from `from` to `to`. Returns false if the row was not in `from`.
    async fn transition_appointment(
        &self,
        id: Uuid,
        from: AppointmentStatus,
        to: AppointmentStatus,
    ) -> Result<bool, StoreError>;

    /// Replaces the single record for `(student_id, semester, session)`.
    async fn upsert_enrollment(&self, enrollment: &Enrollment) -> Result<(), StoreError>;

    async fn get_enrollment(
        &self,
        student_id: Uuid,
        semester: &str,
        session: &str,
    ) -> Result<Option<Enrollment>, StoreError>;

    async fn system_stats(&self) -> Result<SystemStats, StoreError>;
}

/// Runs a store call under a deadline, surfacing expiry as `StoreError::Timeout`.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_call_times_out_instead_of_hanging() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StoreError>(())
        };
        let result = bounded(Duration::from_millis(10), slow).await;
        assert!(matches!(result, Err(StoreError::Timeout)));
    }

    #[tokio::test]
    async fn bounded_call_passes_result_through() {
        let result = bounded(Duration::from_secs(1), async { Ok::<_, StoreError>(7) }).await;
        assert_eq!(result.expect("value"), 7);
    }
}
