//! Appointment slots and bookings.
//!
//! Every advisor offers the same fixed grid: half-hour slots from 9:00 up to
//! 17:00, labelled by local start time. Bookings always occupy exactly one
//! grid slot, so availability is a label comparison.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PortalError, PortalResult, StoreError};
use crate::locks::KeyedLocks;
use crate::models::{Appointment, AppointmentStatus, Identity, Role, SlotOffer};
use crate::store::{bounded, AppointmentFilter, EntityStore};

pub const DAY_START_HOUR: u32 = 9;
pub const DAY_END_HOUR: u32 = 17;
pub const SLOT_MINUTES: u32 = 30;

/// Start times of the daily grid, in order.
pub fn slot_grid() -> Vec<NaiveTime> {
    (DAY_START_HOUR..DAY_END_HOUR)
        .flat_map(|hour| [0, SLOT_MINUTES].map(move |minute| (hour, minute)))
        .filter_map(|(hour, minute)| NaiveTime::from_hms_opt(hour, minute, 0))
        .collect()
}

/// `9:00`, `9:30`, ... `16:30`.
pub fn slot_label(time: NaiveTime) -> String {
    format!("{}:{:02}", time.hour(), time.minute())
}

/// Accepts `H:MM` or `HH:MM` on the grid.
pub fn parse_slot_label(label: &str) -> PortalResult<NaiveTime> {
    let invalid = || PortalError::invalid(format!("{label:?} is not a bookable time slot"));
    let (hour, minute) = label.trim().split_once(':').ok_or_else(invalid)?;
    if hour.is_empty() || hour.len() > 2 || minute.len() != 2 {
        return Err(invalid());
    }
    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)?;
    if !slot_grid().contains(&time) {
        return Err(invalid());
    }
    Ok(time)
}

pub fn parse_date(value: &str) -> PortalResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| PortalError::invalid(format!("{value:?} is not a YYYY-MM-DD date")))
}

pub fn parse_id(field: &str, value: &str) -> PortalResult<Uuid> {
    Uuid::parse_str(value.trim())
        .map_err(|_| PortalError::invalid(format!("{field} is not a valid id")))
}

/// First and last instant of `date` used to fetch its bookings.
pub fn day_bounds(date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let start = date.and_time(NaiveTime::default());
    let end = start + chrono::Duration::days(1) - chrono::Duration::microseconds(1);
    (start, end)
}

/// Marks each grid slot unavailable when a booking starts at its label.
pub fn offers(booked: &[Appointment]) -> Vec<SlotOffer> {
    let taken: Vec<String> = booked
        .iter()
        .filter(|a| a.status != AppointmentStatus::Cancelled)
        .map(|a| slot_label(a.start_time.time()))
        .collect();

    slot_grid()
        .into_iter()
        .map(|time| {
            let label = slot_label(time);
            SlotOffer {
                available: !taken.contains(&label),
                label,
            }
        })
        .collect()
}

/// Booking request as it arrives from the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub student_id: String,
    pub advisor_id: String,
    pub date: String,
    pub time_label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Booking {
    pub student_id: Uuid,
    pub advisor_id: Uuid,
    pub date: NaiveDate,
    pub slot: NaiveTime,
}

impl Booking {
    pub fn start_time(&self) -> NaiveDateTime {
        self.date.and_time(self.slot)
    }

    pub fn label(&self) -> String {
        slot_label(self.slot)
    }
}

impl BookingRequest {
    pub fn validate(&self) -> PortalResult<Booking> {
        let missing: Vec<&str> = [
            ("student_id", &self.student_id),
            ("advisor_id", &self.advisor_id),
            ("date", &self.date),
            ("time_label", &self.time_label),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect();
        if !missing.is_empty() {
            return Err(PortalError::invalid(format!("missing {}", missing.join(", "))));
        }

        Ok(Booking {
            student_id: parse_id("student_id", &self.student_id)?,
            advisor_id: parse_id("advisor_id", &self.advisor_id)?,
            date: parse_date(&self.date)?,
            slot: parse_slot_label(&self.time_label)?,
        })
    }
}

pub struct Scheduler {
    store: Arc<dyn EntityStore>,
    timeout: Duration,
    advisors: KeyedLocks<Uuid>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn EntityStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            advisors: KeyedLocks::new(),
        }
    }

    pub async fn available_slots(
        &self,
        advisor_id: Uuid,
        date: NaiveDate,
    ) -> PortalResult<Vec<SlotOffer>> {
        self.require_advisor(advisor_id).await?;
        self.offers_for(advisor_id, date).await
    }

    /// Commits a booking. Availability is re-derived under the advisor's lock
    /// and the insert itself is conditional, so one slot yields one booking.
    pub async fn book(&self, booking: Booking) -> PortalResult<Appointment> {
        self.require_advisor(booking.advisor_id).await?;

        let _guard = self.advisors.lock(&booking.advisor_id).await;
        let label = booking.label();
        let conflict = || PortalError::SlotConflict {
            date: booking.date.to_string(),
            label: label.clone(),
        };

        let free = self
            .offers_for(booking.advisor_id, booking.date)
            .await?
            .iter()
            .any(|offer| offer.label == label && offer.available);
        if !free {
            tracing::warn!(
                advisor = %booking.advisor_id,
                date = %booking.date,
                slot = %label,
                "slot already taken"
            );
            return Err(conflict());
        }

        let start_time = booking.start_time();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            student_id: booking.student_id,
            advisor_id: booking.advisor_id,
            start_time,
            end_time: start_time + chrono::Duration::minutes(i64::from(SLOT_MINUTES)),
            status: AppointmentStatus::Scheduled,
            created_at: Utc::now(),
        };

        match bounded(self.timeout, self.store.insert_appointment(&appointment)).await {
            Ok(()) => {
                tracing::info!(
                    appointment = %appointment.id,
                    student = %booking.student_id,
                    advisor = %booking.advisor_id,
                    start = %start_time,
                    "appointment booked"
                );
                Ok(appointment)
            }
            Err(StoreError::Conflict) => {
                tracing::warn!(
                    advisor = %booking.advisor_id,
                    slot = %label,
                    "booking lost the race at write time"
                );
                Err(conflict())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// `scheduled -> completed`, by the advisor who owns the appointment.
    pub async fn complete(
        &self,
        appointment_id: Uuid,
        actor: &Identity,
    ) -> PortalResult<Appointment> {
        let appointment = self.load(appointment_id).await?;
        if actor.role != Role::Advisor || appointment.advisor_id != actor.subject_id {
            return Err(PortalError::unauthorized(
                "only the appointment's advisor can complete it",
            ));
        }
        self.move_to(appointment, AppointmentStatus::Completed).await
    }

    /// `scheduled -> cancelled`, by either party. The slot opens up again.
    pub async fn cancel(
        &self,
        appointment_id: Uuid,
        actor: &Identity,
    ) -> PortalResult<Appointment> {
        let appointment = self.load(appointment_id).await?;
        let party = match actor.role {
            Role::Student => appointment.student_id == actor.subject_id,
            Role::Advisor => appointment.advisor_id == actor.subject_id,
            Role::Admin => false,
        };
        if !party {
            return Err(PortalError::unauthorized(
                "only the student or advisor involved can cancel",
            ));
        }
        self.move_to(appointment, AppointmentStatus::Cancelled).await
    }

    /// The caller's own bookings (student) or calendar (advisor).
    pub async fn appointments_for(&self, actor: &Identity) -> PortalResult<Vec<Appointment>> {
        let filter = match actor.role {
            Role::Student => AppointmentFilter {
                student_id: Some(actor.subject_id),
                ..AppointmentFilter::default()
            },
            Role::Advisor => AppointmentFilter {
                advisor_id: Some(actor.subject_id),
                ..AppointmentFilter::default()
            },
            Role::Admin => {
                return Err(PortalError::unauthorized("admins have no appointment calendar"));
            }
        };
        Ok(bounded(self.timeout, self.store.list_appointments(filter)).await?)
    }

    /// Non-cancelled appointments of `advisor_id` starting within `[from, to]`.
    pub async fn calendar(
        &self,
        advisor_id: Uuid,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> PortalResult<Vec<Appointment>> {
        Ok(bounded(
            self.timeout,
            self.store.appointments_starting_between(advisor_id, from, to),
        )
        .await?)
    }

    async fn offers_for(&self, advisor_id: Uuid, date: NaiveDate) -> PortalResult<Vec<SlotOffer>> {
        let (from, to) = day_bounds(date);
        let booked = self.calendar(advisor_id, from, to).await?;
        Ok(offers(&booked))
    }

    async fn require_advisor(&self, advisor_id: Uuid) -> PortalResult<()> {
        let user = bounded(self.timeout, self.store.get_user(advisor_id)).await?;
        match user {
            Some(user) if user.role() == Role::Advisor => Ok(()),
            _ => Err(PortalError::invalid("unknown advisor")),
        }
    }

    async fn load(&self, appointment_id: Uuid) -> PortalResult<Appointment> {
        bounded(self.timeout, self.store.get_appointment(appointment_id))
            .await?
            .ok_or_else(|| PortalError::not_found("appointment"))
    }

    async fn move_to(
        &self,
        mut appointment: Appointment,
        to: AppointmentStatus,
    ) -> PortalResult<Appointment> {
        let from = appointment.status;
        if from.is_terminal() {
            return Err(PortalError::invalid(format!("appointment is already {from}")));
        }

        let moved = bounded(
            self.timeout,
            self.store.transition_appointment(appointment.id, from, to),
        )
        .await?;
        if !moved {
            let current = self.load(appointment.id).await?.status;
            return Err(PortalError::invalid(format!("appointment is already {current}")));
        }

        tracing::info!(
            appointment = %appointment.id,
            from = %from,
            to = %to,
            "appointment status changed"
        );
        appointment.status = to;
        Ok(appointment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AdvisorData, Profile, User};
    use crate::store::faulty::FaultyStore;
    use crate::store::MemoryStore;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 1).expect("date")
    }

    fn person(role: Role) -> User {
        let profile = match role {
            Role::Advisor => Profile::Advisor(AdvisorData::default()),
            Role::Student => Profile::Student(Default::default()),
            Role::Admin => Profile::Admin,
        };
        User {
            id: Uuid::new_v4(),
            name: format!("{role} user"),
            email: format!("{}@campus.edu", Uuid::new_v4().simple()),
            created_at: Utc::now(),
            profile,
        }
    }

    fn identity(user: &User) -> Identity {
        Identity {
            subject_id: user.id,
            role: user.role(),
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }

    async fn scheduler_with(users: &[User]) -> (Scheduler, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for user in users {
            store.insert_user(user).await.expect("insert");
        }
        (Scheduler::new(store.clone(), Duration::from_secs(1)), store)
    }

    fn booking(student: &User, advisor: &User, label: &str) -> Booking {
        Booking {
            student_id: student.id,
            advisor_id: advisor.id,
            date: date(),
            slot: parse_slot_label(label).expect("label"),
        }
    }

    #[test]
    fn grid_has_sixteen_labelled_slots() {
        let labels: Vec<String> = slot_grid().into_iter().map(slot_label).collect();
        assert_eq!(labels.len(), 16);
        assert_eq!(labels.first().map(String::as_str), Some("9:00"));
        assert_eq!(labels[1], "9:30");
        assert_eq!(labels.last().map(String::as_str), Some("16:30"));
    }

    #[test]
    fn labels_must_sit_on_the_grid() {
        assert_eq!(slot_label(parse_slot_label("09:30").expect("padded")), "9:30");
        assert!(parse_slot_label("9:15").is_err());
        assert!(parse_slot_label("17:00").is_err());
        assert!(parse_slot_label("8:30").is_err());
        assert!(parse_slot_label("930").is_err());
        assert!(parse_slot_label("9:3").is_err());
    }

    #[test]
    fn validation_names_missing_fields() {
        let request = BookingRequest {
            student_id: Uuid::new_v4().to_string(),
            date: "2025-11-01".to_string(),
            ..BookingRequest::default()
        };
        match request.validate() {
            Err(PortalError::InvalidRequest(reason)) => {
                assert!(reason.contains("advisor_id"));
                assert!(reason.contains("time_label"));
                assert!(!reason.contains("student_id"));
            }
            other => panic!("expected InvalidRequest, got {other:?}"),
        }

        let bad_date = BookingRequest {
            student_id: Uuid::new_v4().to_string(),
            advisor_id: Uuid::new_v4().to_string(),
            date: "01/11/2025".to_string(),
            time_label: "9:30".to_string(),
        };
        assert!(matches!(bad_date.validate(), Err(PortalError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn booking_marks_only_its_slot_unavailable() {
        let advisor = person(Role::Advisor);
        let student = person(Role::Student);
        let (scheduler, _) = scheduler_with(&[advisor.clone(), student.clone()]).await;

        let appointment = scheduler.book(booking(&student, &advisor, "10:00")).await.expect("book");
        assert_eq!(appointment.end_time - appointment.start_time, chrono::Duration::minutes(30));
        assert_eq!(appointment.status, AppointmentStatus::Scheduled);

        let slots = scheduler.available_slots(advisor.id, date()).await.expect("slots");
        assert_eq!(slots.len(), 16);
        for slot in &slots {
            assert_eq!(slot.available, slot.label != "10:00", "slot {}", slot.label);
        }

        let next_day = date().succ_opt().expect("next day");
        let tomorrow = scheduler.available_slots(advisor.id, next_day).await.expect("slots");
        assert!(tomorrow.iter().all(|slot| slot.available));
    }

    #[tokio::test]
    async fn second_booking_of_same_slot_conflicts() {
        let advisor = person(Role::Advisor);
        let first = person(Role::Student);
        let second = person(Role::Student);
        let (scheduler, _) =
            scheduler_with(&[advisor.clone(), first.clone(), second.clone()]).await;

        scheduler.book(booking(&first, &advisor, "9:30")).await.expect("first");
        let result = scheduler.book(booking(&second, &advisor, "9:30")).await;
        assert_eq!(
            result,
            Err(PortalError::SlotConflict {
                date: "2025-11-01".to_string(),
                label: "9:30".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn conditional_write_catches_a_slot_the_calendar_missed() {
        let advisor = person(Role::Advisor);
        let first = person(Role::Student);
        let second = person(Role::Student);
        let store = Arc::new(FaultyStore {
            stale_calendar: true,
            ..FaultyStore::default()
        });
        for user in [&advisor, &first, &second] {
            store.inner.insert_user(user).await.expect("insert");
        }
        let scheduler = Scheduler::new(store.clone(), Duration::from_secs(1));

        scheduler.book(booking(&first, &advisor, "13:00")).await.expect("first");
        let result = scheduler.book(booking(&second, &advisor, "13:00")).await;
        assert_eq!(
            result,
            Err(PortalError::SlotConflict {
                date: "2025-11-01".to_string(),
                label: "13:00".to_string(),
            })
        );

        let filter = AppointmentFilter {
            advisor_id: Some(advisor.id),
            ..AppointmentFilter::default()
        };
        let stored = store.inner.list_appointments(filter).await.expect("list");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].student_id, first.id);
    }

    #[tokio::test]
    async fn separate_schedulers_book_a_slot_once() {
        let advisor = person(Role::Advisor);
        let first = person(Role::Student);
        let second = person(Role::Student);
        let (one, store) =
            scheduler_with(&[advisor.clone(), first.clone(), second.clone()]).await;
        let two = Scheduler::new(store, Duration::from_secs(1));

        let (a, b) = tokio::join!(
            one.book(booking(&first, &advisor, "14:00")),
            two.book(booking(&second, &advisor, "14:00")),
        );
        let wins = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(wins, 1);
        assert!(matches!(a.err().or(b.err()), Some(PortalError::SlotConflict { .. })));
    }

    #[tokio::test]
    async fn unknown_advisor_is_invalid() {
        let student = person(Role::Student);
        let not_an_advisor = person(Role::Student);
        let (scheduler, _) = scheduler_with(&[student.clone(), not_an_advisor.clone()]).await;
        let result = scheduler.book(booking(&student, &not_an_advisor, "9:00")).await;
        assert!(matches!(result, Err(PortalError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn cancel_reopens_slot_and_terminal_states_stick() {
        let advisor = person(Role::Advisor);
        let student = person(Role::Student);
        let (scheduler, _) = scheduler_with(&[advisor.clone(), student.clone()]).await;

        let booked = scheduler.book(booking(&student, &advisor, "11:30")).await.expect("book");
        let cancelled = scheduler.cancel(booked.id, &identity(&student)).await.expect("cancel");
        assert_eq!(cancelled.status, AppointmentStatus::Cancelled);

        let again = scheduler.cancel(booked.id, &identity(&student)).await;
        assert!(matches!(again, Err(PortalError::InvalidRequest(_))));

        let rebooked = scheduler.book(booking(&student, &advisor, "11:30")).await.expect("rebook");
        let completed = scheduler
            .complete(rebooked.id, &identity(&advisor))
            .await
            .expect("complete");
        assert_eq!(completed.status, AppointmentStatus::Completed);
        assert!(matches!(
            scheduler.cancel(rebooked.id, &identity(&advisor)).await,
            Err(PortalError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn only_involved_parties_may_change_an_appointment() {
        let advisor = person(Role::Advisor);
        let student = person(Role::Student);
        let stranger = person(Role::Student);
        let (scheduler, _) =
            scheduler_with(&[advisor.clone(), student.clone(), stranger.clone()]).await;

        let booked = scheduler.book(booking(&student, &advisor, "15:00")).await.expect("book");
        assert!(matches!(
            scheduler.cancel(booked.id, &identity(&stranger)).await,
            Err(PortalError::Unauthorized(_))
        ));
        assert!(matches!(
            scheduler.complete(booked.id, &identity(&student)).await,
            Err(PortalError::Unauthorized(_))
        ));
        assert!(matches!(
            scheduler.complete(Uuid::new_v4(), &identity(&advisor)).await,
            Err(PortalError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn calendars_are_scoped_to_the_caller() {
        let advisor = person(Role::Advisor);
        let student = person(Role::Student);
        let other = person(Role::Student);
        let (scheduler, _) =
            scheduler_with(&[advisor.clone(), student.clone(), other.clone()]).await;

        scheduler.book(booking(&student, &advisor, "9:00")).await.expect("book");
        scheduler.book(booking(&other, &advisor, "9:30")).await.expect("book");

        let own = scheduler.appointments_for(&identity(&student)).await.expect("own");
        assert_eq!(own.len(), 1);
        let calendar = scheduler
            .appointments_for(&identity(&advisor))
            .await
            .expect("calendar");
        assert_eq!(calendar.len(), 2);
    }
}
