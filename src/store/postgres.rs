use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    AccountUpdate, AdvisorData, Appointment, AppointmentStatus, Enrollment, GuidanceStatus,
    Profile, Role, StudentData, StudentUpdate, SystemStats, User,
};
use crate::store::{AppointmentFilter, EntityStore};

const USER_COLUMNS: &str = "id, name, email, role, created_at, advisor_id, gpa, department, \
     is_enrolled, guidance_status, last_summoned_at, last_seen_at, summoned_by_advisor_id, \
     seen_by_advisor_id, office_location, office_hours";

const APPOINTMENT_COLUMNS: &str =
    "id, student_id, advisor_id, start_time, end_time, status, created_at";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed store. All users share one table keyed by `role`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn corrupt(err: crate::error::PortalError) -> StoreError {
    StoreError::Unavailable(format!("corrupt row: {err}"))
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let role: String = row.try_get("role")?;
    let role: Role = role.parse().map_err(corrupt)?;

    let profile = match role {
        Role::Student => {
            let status: String = row.try_get("guidance_status")?;
            Profile::Student(StudentData {
                advisor_id: row.try_get("advisor_id")?,
                gpa: row.try_get("gpa")?,
                department: row.try_get("department")?,
                is_enrolled: row.try_get("is_enrolled")?,
                guidance_status: status.parse().map_err(corrupt)?,
                last_summoned_at: row.try_get("last_summoned_at")?,
                last_seen_at: row.try_get("last_seen_at")?,
                summoned_by_advisor_id: row.try_get("summoned_by_advisor_id")?,
                seen_by_advisor_id: row.try_get("seen_by_advisor_id")?,
            })
        }
        Role::Advisor => Profile::Advisor(AdvisorData {
            department: row.try_get("department")?,
            office_location: row.try_get("office_location")?,
            office_hours: row.try_get("office_hours")?,
        }),
        Role::Admin => Profile::Admin,
    };

    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        created_at: row.try_get("created_at")?,
        profile,
    })
}

fn appointment_from_row(row: &PgRow) -> Result<Appointment, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(Appointment {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        advisor_id: row.try_get("advisor_id")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        status: status.parse().map_err(corrupt)?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl EntityStore for PgStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM guidance_portal.users WHERE id = $1");
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM guidance_portal.users WHERE email = $1");
        let row = sqlx::query(&query).bind(email).fetch_optional(&self.pool).await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let student = user.as_student().cloned().unwrap_or_default();
        let advisor = user.as_advisor().cloned().unwrap_or_default();
        let department = match &user.profile {
            Profile::Student(data) => data.department.clone(),
            Profile::Advisor(data) => data.department.clone(),
            Profile::Admin => None,
        };

        sqlx::query(
            r#"
            INSERT INTO guidance_portal.users
            (id, name, email, role, created_at, advisor_id, gpa, department, is_enrolled,
             guidance_status, last_summoned_at, last_seen_at, summoned_by_advisor_id,
             seen_by_advisor_id, office_location, office_hours)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role().as_str())
        .bind(user.created_at)
        .bind(student.advisor_id)
        .bind(student.gpa)
        .bind(department)
        .bind(student.is_enrolled)
        .bind(student.guidance_status.as_str())
        .bind(student.last_summoned_at)
        .bind(student.last_seen_at)
        .bind(student.summoned_by_advisor_id)
        .bind(student.seen_by_advisor_id)
        .bind(advisor.office_location)
        .bind(advisor.office_hours)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM guidance_portal.users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_users(&self, role: Option<Role>) -> Result<Vec<User>, StoreError> {
        let mut query = format!("SELECT {USER_COLUMNS} FROM guidance_portal.users");
        if role.is_some() {
            query.push_str(" WHERE role = $1");
        }
        query.push_str(" ORDER BY name");

        let mut rows = sqlx::query(&query);
        if let Some(role) = role {
            rows = rows.bind(role.as_str());
        }

        rows.fetch_all(&self.pool)
            .await?
            .iter()
            .map(user_from_row)
            .collect()
    }

    async fn enrolled_students_in_department(
        &self,
        department: &str,
    ) -> Result<Vec<User>, StoreError> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM guidance_portal.users \
             WHERE role = 'student' AND department = $1 AND is_enrolled"
        );
        sqlx::query(&query)
            .bind(department)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(user_from_row)
            .collect()
    }

    async fn update_account(&self, id: Uuid, update: &AccountUpdate) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE guidance_portal.users SET
                name = $2,
                email = $3,
                advisor_id = CASE WHEN role = 'student'
                    THEN COALESCE($4, advisor_id)
                    ELSE advisor_id END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&update.name)
        .bind(&update.email)
        .bind(update.advisor_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_student(&self, id: Uuid, update: &StudentUpdate) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE guidance_portal.users SET
                guidance_status = COALESCE($2, guidance_status),
                last_summoned_at = COALESCE($3, last_summoned_at),
                summoned_by_advisor_id = COALESCE($4, summoned_by_advisor_id),
                last_seen_at = COALESCE($5, last_seen_at),
                seen_by_advisor_id = COALESCE($6, seen_by_advisor_id),
                gpa = COALESCE($7, gpa),
                advisor_id = COALESCE($8, advisor_id),
                is_enrolled = COALESCE($9, is_enrolled)
            WHERE id = $1 AND role = 'student'
            "#,
        )
        .bind(id)
        .bind(update.guidance_status.map(GuidanceStatus::as_str))
        .bind(update.last_summoned_at)
        .bind(update.summoned_by_advisor_id)
        .bind(update.last_seen_at)
        .bind(update.seen_by_advisor_id)
        .bind(update.gpa)
        .bind(update.advisor_id)
        .bind(update.is_enrolled)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn appointments_starting_between(
        &self,
        advisor_id: Uuid,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<Appointment>, StoreError> {
        let query = format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM guidance_portal.appointments \
             WHERE advisor_id = $1 AND start_time >= $2 AND start_time <= $3 \
             AND status <> 'cancelled' ORDER BY start_time"
        );
        sqlx::query(&query)
            .bind(advisor_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(appointment_from_row)
            .collect()
    }

    async fn list_appointments(
        &self,
        filter: AppointmentFilter,
    ) -> Result<Vec<Appointment>, StoreError> {
        let query = format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM guidance_portal.appointments \
             WHERE ($1::uuid IS NULL OR student_id = $1) \
             AND ($2::uuid IS NULL OR advisor_id = $2) \
             ORDER BY start_time"
        );
        sqlx::query(&query)
            .bind(filter.student_id)
            .bind(filter.advisor_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(appointment_from_row)
            .collect()
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let query = format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM guidance_portal.appointments WHERE id = $1"
        );
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(appointment_from_row).transpose()
    }

    async fn insert_appointment(&self, appointment: &Appointment) -> Result<(), StoreError> {
        // appointments_advisor_slot_uidx turns a lost race into a unique violation.
        sqlx::query(
            r#"
            INSERT INTO guidance_portal.appointments
            (id, student_id, advisor_id, start_time, end_time, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(appointment.id)
        .bind(appointment.student_id)
        .bind(appointment.advisor_id)
        .bind(appointment.start_time)
        .bind(appointment.end_time)
        .bind(appointment.status.as_str())
        .bind(appointment.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn transition_appointment(
        &self,
        id: Uuid,
        from: AppointmentStatus,
        to: AppointmentStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE guidance_portal.appointments SET status = $3 WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_enrollment(&self, enrollment: &Enrollment) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO guidance_portal.enrollments
            (student_id, semester, session, course_ids, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (student_id, semester, session) DO UPDATE
            SET course_ids = EXCLUDED.course_ids, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(enrollment.student_id)
        .bind(&enrollment.semester)
        .bind(&enrollment.session)
        .bind(&enrollment.course_ids)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_enrollment(
        &self,
        student_id: Uuid,
        semester: &str,
        session: &str,
    ) -> Result<Option<Enrollment>, StoreError> {
        let row = sqlx::query(
            "SELECT student_id, semester, session, course_ids FROM guidance_portal.enrollments \
             WHERE student_id = $1 AND semester = $2 AND session = $3",
        )
        .bind(student_id)
        .bind(semester)
        .bind(session)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Enrollment {
                student_id: row.try_get("student_id")?,
                semester: row.try_get("semester")?,
                session: row.try_get("session")?,
                course_ids: row.try_get("course_ids")?,
            })),
            None => Ok(None),
        }
    }

    async fn system_stats(&self) -> Result<SystemStats, StoreError> {
        let users = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE role = 'student') AS students,
                COUNT(*) FILTER (WHERE role = 'advisor') AS advisors,
                COUNT(*) FILTER (WHERE role = 'admin') AS admins
            FROM guidance_portal.users
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let appointments = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'scheduled') AS scheduled,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled
            FROM guidance_portal.appointments
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(SystemStats {
            total_students: users.try_get("students")?,
            total_advisors: users.try_get("advisors")?,
            total_admins: users.try_get("admins")?,
            total_appointments: appointments.try_get("total")?,
            scheduled_appointments: appointments.try_get("scheduled")?,
            completed_appointments: appointments.try_get("completed")?,
            cancelled_appointments: appointments.try_get("cancelled")?,
        })
    }
}
