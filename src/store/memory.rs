use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    AccountUpdate, Appointment, AppointmentStatus, Enrollment, Profile, Role, StudentUpdate,
    SystemStats, User,
};
use crate::store::{AppointmentFilter, EntityStore};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    appointments: HashMap<Uuid, Appointment>,
    enrollments: HashMap<(Uuid, String, String), Enrollment>,
}

/// Process-local store with the same conditional-write rules as `PgStore`.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".to_string()))
    }
}

fn sorted_by_name(mut users: Vec<User>) -> Vec<User> {
    users.sort_by(|a, b| a.name.cmp(&b.name));
    users
}

fn sorted_by_start(mut appointments: Vec<Appointment>) -> Vec<Appointment> {
    appointments.sort_by_key(|a| a.start_time);
    appointments
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables()?.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .tables()?
            .users
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let taken = tables.users.contains_key(&user.id)
            || tables.users.values().any(|other| other.email == user.email);
        if taken {
            return Err(StoreError::Conflict);
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tables()?.users.remove(&id).is_some())
    }

    async fn list_users(&self, role: Option<Role>) -> Result<Vec<User>, StoreError> {
        let users = self
            .tables()?
            .users
            .values()
            .filter(|user| role.map_or(true, |role| user.role() == role))
            .cloned()
            .collect();
        Ok(sorted_by_name(users))
    }

    async fn enrolled_students_in_department(
        &self,
        department: &str,
    ) -> Result<Vec<User>, StoreError> {
        let users = self
            .tables()?
            .users
            .values()
            .filter(|user| {
                user.as_student().is_some_and(|student| {
                    student.is_enrolled && student.department.as_deref() == Some(department)
                })
            })
            .cloned()
            .collect();
        Ok(sorted_by_name(users))
    }

    async fn update_account(&self, id: Uuid, update: &AccountUpdate) -> Result<bool, StoreError> {
        let mut tables = self.tables()?;
        if tables
            .users
            .values()
            .any(|other| other.id != id && other.email == update.email)
        {
            return Err(StoreError::Conflict);
        }
        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(false);
        };
        update.apply_to(user);
        Ok(true)
    }

    async fn update_student(&self, id: Uuid, update: &StudentUpdate) -> Result<bool, StoreError> {
        let mut tables = self.tables()?;
        let Some(User {
            profile: Profile::Student(student),
            ..
        }) = tables.users.get_mut(&id)
        else {
            return Ok(false);
        };
        update.apply_to(student);
        Ok(true)
    }

    async fn appointments_starting_between(
        &self,
        advisor_id: Uuid,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<Appointment>, StoreError> {
        let appointments = self
            .tables()?
            .appointments
            .values()
            .filter(|a| {
                a.advisor_id == advisor_id
                    && a.status != AppointmentStatus::Cancelled
                    && a.start_time >= from
                    && a.start_time <= to
            })
            .cloned()
            .collect();
        Ok(sorted_by_start(appointments))
    }

    async fn list_appointments(
        &self,
        filter: AppointmentFilter,
    ) -> Result<Vec<Appointment>, StoreError> {
        let appointments = self
            .tables()?
            .appointments
            .values()
            .filter(|a| filter.student_id.map_or(true, |id| a.student_id == id))
            .filter(|a| filter.advisor_id.map_or(true, |id| a.advisor_id == id))
            .cloned()
            .collect();
        Ok(sorted_by_start(appointments))
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.tables()?.appointments.get(&id).cloned())
    }

    async fn insert_appointment(&self, appointment: &Appointment) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let slot_taken = tables.appointments.values().any(|existing| {
            existing.advisor_id == appointment.advisor_id
                && existing.start_time == appointment.start_time
                && existing.status != AppointmentStatus::Cancelled
        });
        if slot_taken || tables.appointments.contains_key(&appointment.id) {
            return Err(StoreError::Conflict);
        }
        tables.appointments.insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn transition_appointment(
        &self,
        id: Uuid,
        from: AppointmentStatus,
        to: AppointmentStatus,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables()?;
        match tables.appointments.get_mut(&id) {
            Some(appointment) if appointment.status == from => {
                appointment.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert_enrollment(&self, enrollment: &Enrollment) -> Result<(), StoreError> {
        let key = (
            enrollment.student_id,
            enrollment.semester.clone(),
            enrollment.session.clone(),
        );
        self.tables()?.enrollments.insert(key, enrollment.clone());
        Ok(())
    }

    async fn get_enrollment(
        &self,
        student_id: Uuid,
        semester: &str,
        session: &str,
    ) -> Result<Option<Enrollment>, StoreError> {
        let key = (student_id, semester.to_string(), session.to_string());
        Ok(self.tables()?.enrollments.get(&key).cloned())
    }

    async fn system_stats(&self) -> Result<SystemStats, StoreError> {
        let tables = self.tables()?;
        let mut stats = SystemStats::default();

        for user in tables.users.values() {
            match user.role() {
                Role::Student => stats.total_students += 1,
                Role::Advisor => stats.total_advisors += 1,
                Role::Admin => stats.total_admins += 1,
            }
        }

        for appointment in tables.appointments.values() {
            stats.total_appointments += 1;
            match appointment.status {
                AppointmentStatus::Scheduled => stats.scheduled_appointments += 1,
                AppointmentStatus::Completed => stats.completed_appointments += 1,
                AppointmentStatus::Cancelled => stats.cancelled_appointments += 1,
            }
        }

        Ok(stats)
    }
}
