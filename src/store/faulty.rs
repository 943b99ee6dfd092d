use async_trait::async_trait;
use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    AccountUpdate, Appointment, AppointmentStatus, Enrollment, Role, StudentUpdate, SystemStats,
    User,
};
use crate::store::{AppointmentFilter, EntityStore, MemoryStore};

/// `MemoryStore` with switchable failures.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    /// `insert_user` fails as if the backend were down.
    pub reject_user_inserts: bool,
    /// `update_account` fails as if the backend were down.
    pub reject_account_updates: bool,
    /// `appointments_starting_between` sees nothing, so only the
    /// conditional insert can catch a taken slot.
    pub stale_calendar: bool,
}

fn unavailable() -> StoreError {
    StoreError::Unavailable("disk full".to_string())
}

#[async_trait]
impl EntityStore for FaultyStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.inner.get_user(id).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.inner.find_user_by_email(email).await
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        if self.reject_user_inserts {
            return Err(unavailable());
        }
        self.inner.insert_user(user).await
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_user(id).await
    }

    async fn list_users(&self, role: Option<Role>) -> Result<Vec<User>, StoreError> {
        self.inner.list_users(role).await
    }

    async fn enrolled_students_in_department(
        &self,
        department: &str,
    ) -> Result<Vec<User>, StoreError> {
        self.inner.enrolled_students_in_department(department).await
    }

    async fn update_account(&self, id: Uuid, update: &AccountUpdate) -> Result<bool, StoreError> {
        if self.reject_account_updates {
            return Err(unavailable());
        }
        self.inner.update_account(id, update).await
    }

    async fn update_student(&self, id: Uuid, update: &StudentUpdate) -> Result<bool, StoreError> {
        self.inner.update_student(id, update).await
    }

    async fn appointments_starting_between(
        &self,
        advisor_id: Uuid,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<Appointment>, StoreError> {
        if self.stale_calendar {
            return Ok(Vec::new());
        }
        self.inner
            .appointments_starting_between(advisor_id, from, to)
            .await
    }

    async fn list_appointments(
        &self,
        filter: AppointmentFilter,
    ) -> Result<Vec<Appointment>, StoreError> {
        self.inner.list_appointments(filter).await
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        self.inner.get_appointment(id).await
    }

    async fn insert_appointment(&self, appointment: &Appointment) -> Result<(), StoreError> {
        self.inner.insert_appointment(appointment).await
    }

    async fn transition_appointment(
        &self,
        id: Uuid,
        from: AppointmentStatus,
        to: AppointmentStatus,
    ) -> Result<bool, StoreError> {
        self.inner.transition_appointment(id, from, to).await
    }

    async fn upsert_enrollment(&self, enrollment: &Enrollment) -> Result<(), StoreError> {
        self.inner.upsert_enrollment(enrollment).await
    }

    async fn get_enrollment(
        &self,
        student_id: Uuid,
        semester: &str,
        session: &str,
    ) -> Result<Option<Enrollment>, StoreError> {
        self.inner.get_enrollment(student_id, semester, session).await
    }

    async fn system_stats(&self) -> Result<SystemStats, StoreError> {
        self.inner.system_stats().await
    }
}
