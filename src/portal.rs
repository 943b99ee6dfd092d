//! The portal's public operations.
//!
//! Every entry point takes the caller's session credential and passes the
//! authorization gate before any business logic runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::auth::AuthorizationGate;
use crate::config::PortalConfig;
use crate::enrollment::{CourseRegistration, Registrar};
use crate::error::{PortalError, PortalResult};
use crate::guidance::{GuidanceChange, GuidanceEngine};
use crate::identity::{IdentityProvider, SessionVerifier};
use crate::models::{Appointment, Enrollment, Identity, Role, SlotOffer, SystemStats, User};
use crate::report;
use crate::roster::{NewUser, Roster, UserEdit};
use crate::scheduler::{day_bounds, parse_date, parse_id, BookingRequest, Scheduler};
use crate::store::{bounded, EntityStore};

pub struct Portal {
    gate: AuthorizationGate<Arc<dyn IdentityProvider>>,
    store: Arc<dyn EntityStore>,
    guidance: GuidanceEngine,
    scheduler: Scheduler,
    registrar: Registrar,
    roster: Roster,
    timeout: Duration,
}

impl Portal {
    pub fn new(
        store: Arc<dyn EntityStore>,
        identities: Arc<dyn IdentityProvider>,
        config: &PortalConfig,
    ) -> Self {
        let timeout = config.store_timeout;
        let verifier = SessionVerifier::new(Arc::clone(&identities), timeout);
        Self {
            gate: AuthorizationGate::new(verifier),
            guidance: GuidanceEngine::new(Arc::clone(&store), timeout),
            scheduler: Scheduler::new(Arc::clone(&store), timeout),
            registrar: Registrar::new(Arc::clone(&store), timeout),
            roster: Roster::new(Arc::clone(&store), identities, timeout),
            store,
            timeout,
        }
    }

    pub async fn whoami(&self, session: &str) -> PortalResult<Identity> {
        self.gate.verifier().verify(session).await
    }

    // ----- guidance -----

    /// Advisors may only list their own candidates.
    pub async fn list_guidance_candidates(
        &self,
        session: &str,
        advisor_id: &str,
    ) -> PortalResult<Vec<User>> {
        let advisor_id = Uuid::parse_str(advisor_id.trim()).unwrap_or(Uuid::nil());
        let caller = self.gate.require_self(session, Role::Advisor, advisor_id).await?;
        self.guidance.list_candidates(caller.subject_id).await
    }

    pub async fn summon(&self, session: &str, student_id: &str) -> PortalResult<GuidanceChange> {
        let caller = self.gate.require_role(session, &[Role::Advisor]).await?;
        let student_id = parse_id("student_id", student_id)?;
        self.guidance.summon(student_id, caller.subject_id).await
    }

    pub async fn mark_seen(&self, session: &str, student_id: &str) -> PortalResult<GuidanceChange> {
        let caller = self.gate.require_role(session, &[Role::Advisor]).await?;
        let student_id = parse_id("student_id", student_id)?;
        self.guidance.mark_seen(student_id, caller.subject_id).await
    }

    pub async fn reset_guidance(
        &self,
        session: &str,
        student_id: &str,
    ) -> PortalResult<GuidanceChange> {
        let caller = self
            .gate
            .require_role(session, &[Role::Advisor, Role::Admin])
            .await?;
        let student_id = parse_id("student_id", student_id)?;
        self.guidance.reset(student_id, caller.subject_id).await
    }

    pub async fn record_gpa(
        &self,
        session: &str,
        student_id: &str,
        gpa: f64,
    ) -> PortalResult<GuidanceChange> {
        self.gate.require_role(session, &[Role::Admin]).await?;
        let student_id = parse_id("student_id", student_id)?;
        self.guidance.record_gpa(student_id, gpa).await
    }

    // ----- scheduling -----

    pub async fn get_available_slots(
        &self,
        session: &str,
        advisor_id: &str,
        date: &str,
    ) -> PortalResult<Vec<SlotOffer>> {
        self.gate.require_role(session, &[Role::Student]).await?;
        let advisor_id = parse_id("advisor_id", advisor_id)?;
        let date = parse_date(date)?;
        self.scheduler.available_slots(advisor_id, date).await
    }

    pub async fn book(&self, session: &str, request: &BookingRequest) -> PortalResult<Appointment> {
        let caller = self.gate.require_role(session, &[Role::Student]).await?;
        let booking = request.validate()?;
        if booking.student_id != caller.subject_id {
            return Err(PortalError::unauthorized("students may only book for themselves"));
        }
        self.scheduler.book(booking).await
    }

    pub async fn complete_appointment(
        &self,
        session: &str,
        appointment_id: &str,
    ) -> PortalResult<Appointment> {
        let caller = self.gate.require_role(session, &[Role::Advisor]).await?;
        let appointment_id = parse_id("appointment_id", appointment_id)?;
        self.scheduler.complete(appointment_id, &caller).await
    }

    pub async fn cancel_appointment(
        &self,
        session: &str,
        appointment_id: &str,
    ) -> PortalResult<Appointment> {
        let caller = self
            .gate
            .require_role(session, &[Role::Student, Role::Advisor])
            .await?;
        let appointment_id = parse_id("appointment_id", appointment_id)?;
        self.scheduler.cancel(appointment_id, &caller).await
    }

    pub async fn my_appointments(&self, session: &str) -> PortalResult<Vec<Appointment>> {
        let caller = self
            .gate
            .require_role(session, &[Role::Student, Role::Advisor])
            .await?;
        self.scheduler.appointments_for(&caller).await
    }

    // ----- enrollment -----

    pub async fn register_courses(
        &self,
        session: &str,
        registration: &CourseRegistration,
    ) -> PortalResult<Enrollment> {
        let caller = self.gate.require_role(session, &[Role::Student]).await?;
        self.registrar.register(caller.subject_id, registration).await
    }

    /// The caller's registration for one term, if any.
    pub async fn enrolled_courses(
        &self,
        session: &str,
        semester: &str,
        academic_session: &str,
    ) -> PortalResult<Option<Enrollment>> {
        let caller = self.gate.require_role(session, &[Role::Student]).await?;
        self.registrar
            .current(caller.subject_id, semester, academic_session)
            .await
    }

    // ----- roster -----

    pub async fn create_user(&self, session: &str, new_user: NewUser) -> PortalResult<User> {
        self.gate.require_role(session, &[Role::Admin]).await?;
        self.roster.create_user(new_user).await
    }

    pub async fn update_user(
        &self,
        session: &str,
        user_id: &str,
        edit: UserEdit,
    ) -> PortalResult<User> {
        self.gate.require_role(session, &[Role::Admin]).await?;
        let user_id = parse_id("user_id", user_id)?;
        self.roster.update_user(user_id, edit).await
    }

    pub async fn assign_advisor(
        &self,
        session: &str,
        student_id: &str,
        advisor_id: &str,
    ) -> PortalResult<()> {
        self.gate.require_role(session, &[Role::Admin]).await?;
        let student_id = parse_id("student_id", student_id)?;
        let advisor_id = parse_id("advisor_id", advisor_id)?;
        self.roster.assign_advisor(student_id, advisor_id).await
    }

    pub async fn delete_user(&self, session: &str, user_id: &str) -> PortalResult<User> {
        let caller = self.gate.require_role(session, &[Role::Admin]).await?;
        let user_id = parse_id("user_id", user_id)?;
        if user_id == caller.subject_id {
            return Err(PortalError::invalid("admins cannot delete their own account"));
        }
        self.roster.delete_user(user_id).await
    }

    pub async fn find_user_by_email(&self, session: &str, email: &str) -> PortalResult<User> {
        self.gate.require_role(session, &[Role::Admin]).await?;
        self.roster.find_by_email(email).await
    }

    pub async fn list_users(&self, session: &str, role: Option<Role>) -> PortalResult<Vec<User>> {
        self.gate.require_role(session, &[Role::Admin]).await?;
        self.roster.list_users(role).await
    }

    pub async fn system_stats(&self, session: &str) -> PortalResult<SystemStats> {
        self.gate.require_role(session, &[Role::Admin]).await?;
        self.roster.system_stats().await
    }

    // ----- reporting -----

    /// Markdown summary of the caller's candidates and appointments in `[from, to]`.
    pub async fn guidance_report(
        &self,
        session: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> PortalResult<String> {
        let caller = self.gate.require_role(session, &[Role::Advisor]).await?;
        if to < from {
            return Err(PortalError::invalid("report window ends before it starts"));
        }

        let advisor = bounded(self.timeout, self.store.get_user(caller.subject_id))
            .await?
            .ok_or_else(|| PortalError::not_found("advisor"))?;
        let department = advisor.as_advisor().and_then(|a| a.department.clone());

        let candidates = self.guidance.list_candidates(caller.subject_id).await?;
        let (window_start, _) = day_bounds(from);
        let (_, window_end) = day_bounds(to);
        let appointments = self
            .scheduler
            .calendar(caller.subject_id, window_start, window_end)
            .await?;

        let mut names: HashMap<Uuid, String> = candidates
            .iter()
            .map(|user| (user.id, user.name.clone()))
            .collect();
        for appointment in &appointments {
            if names.contains_key(&appointment.student_id) {
                continue;
            }
            let student = bounded(self.timeout, self.store.get_user(appointment.student_id)).await?;
            if let Some(student) = student {
                names.insert(student.id, student.name);
            }
        }

        Ok(report::build_report(
            &advisor.name,
            department.as_deref(),
            from,
            to,
            &candidates,
            &appointments,
            &names,
        ))
    }
}
