//! Admin-managed user roster.
//!
//! Each user exists twice: an identity at the provider and a profile in the
//! store. Neither side offers a transaction spanning both, so every
//! two-sided change is ordered and undone on the first side if the second
//! side fails.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PortalError, PortalResult, ProviderError};
use crate::guidance::{status_after_gpa, MAX_GPA};
use crate::identity::{within, IdentityProvider, NewIdentity};
use crate::models::{
    AccountUpdate, AdvisorData, Profile, Role, StudentData, StudentUpdate, SystemStats, User,
};
use crate::store::{bounded, EntityStore};

/// Admin input for a new account. Fields not relevant to `role` are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub advisor_id: Option<Uuid>,
    #[serde(default)]
    pub gpa: Option<f64>,
    #[serde(default)]
    pub is_enrolled: bool,
    #[serde(default)]
    pub office_location: Option<String>,
    #[serde(default)]
    pub office_hours: Option<String>,
}

impl NewUser {
    pub fn new(name: impl Into<String>, email: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            role,
            department: None,
            advisor_id: None,
            gpa: None,
            is_enrolled: false,
            office_location: None,
            office_hours: None,
        }
    }

    fn into_user(self, id: Uuid) -> User {
        let department = self.department.filter(|d| !d.trim().is_empty());
        let profile = match self.role {
            Role::Student => {
                let mut student = StudentData {
                    advisor_id: self.advisor_id,
                    department,
                    is_enrolled: self.is_enrolled,
                    ..StudentData::default()
                };
                if let Some(gpa) = self.gpa {
                    student.guidance_status = status_after_gpa(&student, gpa);
                    student.gpa = Some(gpa);
                }
                Profile::Student(student)
            }
            Role::Advisor => Profile::Advisor(AdvisorData {
                department,
                office_location: self.office_location,
                office_hours: self.office_hours,
            }),
            Role::Admin => Profile::Admin,
        };

        User {
            id,
            name: self.name.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            created_at: Utc::now(),
            profile,
        }
    }
}

fn provider_failure(err: ProviderError) -> PortalError {
    match err {
        ProviderError::Duplicate(_) => {
            PortalError::invalid("an account with this email already exists")
        }
        ProviderError::UnknownIdentity(_) => PortalError::not_found("identity"),
        other => {
            tracing::warn!(error = %other, "identity provider call failed");
            PortalError::TransientStore
        }
    }
}

pub struct Roster {
    store: Arc<dyn EntityStore>,
    identities: Arc<dyn IdentityProvider>,
    timeout: Duration,
}

/// Admin edit of an existing account. Unset fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEdit {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub advisor_id: Option<Uuid>,
}

fn validate_email(email: &str) -> PortalResult<()> {
    if email.contains('@') {
        Ok(())
    } else {
        Err(PortalError::invalid("a valid email is required"))
    }
}

impl Roster {
    pub fn new(
        store: Arc<dyn EntityStore>,
        identities: Arc<dyn IdentityProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            identities,
            timeout,
        }
    }

    /// Identity first, then profile; a failed profile write drops the identity.
    pub async fn create_user(&self, new_user: NewUser) -> PortalResult<User> {
        if new_user.name.trim().is_empty() {
            return Err(PortalError::invalid("name is required"));
        }
        validate_email(&new_user.email)?;
        if let Some(gpa) = new_user.gpa {
            if !gpa.is_finite() || !(0.0..=MAX_GPA).contains(&gpa) {
                return Err(PortalError::invalid(format!(
                    "gpa must be between 0.0 and {MAX_GPA:.1}"
                )));
            }
        }
        if new_user.role == Role::Student {
            if let Some(advisor_id) = new_user.advisor_id {
                self.require_advisor(advisor_id).await?;
            }
        }

        let user = new_user.into_user(Uuid::new_v4());
        let identity = NewIdentity {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role(),
        };
        within(self.timeout, self.identities.create_identity(&identity))
            .await
            .map_err(provider_failure)?;

        if let Err(err) = bounded(self.timeout, self.store.insert_user(&user)).await {
            tracing::warn!(
                user = %user.id,
                error = %err,
                "profile write failed, removing identity"
            );
            let undo = within(self.timeout, self.identities.delete_identity(user.id)).await;
            if let Err(undo) = undo {
                tracing::error!(
                    user = %user.id,
                    error = %undo,
                    "could not remove orphaned identity"
                );
            }
            return Err(err.into());
        }

        tracing::info!(user = %user.id, role = %user.role(), "user created");
        Ok(user)
    }

    /// Identity first, then profile; a failed profile write puts the old
    /// name and email back on the identity.
    pub async fn update_user(&self, id: Uuid, edit: UserEdit) -> PortalResult<User> {
        let mut user = bounded(self.timeout, self.store.get_user(id))
            .await?
            .ok_or_else(|| PortalError::not_found("user"))?;

        let name = match edit.name {
            Some(name) if name.trim().is_empty() => {
                return Err(PortalError::invalid("name is required"));
            }
            Some(name) => name.trim().to_string(),
            None => user.name.clone(),
        };
        let email = match edit.email {
            Some(email) => {
                validate_email(&email)?;
                email.trim().to_lowercase()
            }
            None => user.email.clone(),
        };
        if let Some(advisor_id) = edit.advisor_id {
            if user.role() != Role::Student {
                return Err(PortalError::invalid("only students have an advisor"));
            }
            self.require_advisor(advisor_id).await?;
        }

        let update = AccountUpdate {
            name,
            email,
            advisor_id: edit.advisor_id,
        };
        let identity_changed = update.name != user.name || update.email != user.email;
        if identity_changed {
            let renamed = self
                .identities
                .update_identity(id, &update.name, &update.email);
            within(self.timeout, renamed)
                .await
                .map_err(provider_failure)?;
        }

        let written = match bounded(self.timeout, self.store.update_account(id, &update)).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(PortalError::not_found("user")),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = written {
            if identity_changed {
                tracing::warn!(user = %id, error = %err, "profile edit failed, restoring identity");
                let undo = within(
                    self.timeout,
                    self.identities.update_identity(id, &user.name, &user.email),
                )
                .await;
                if let Err(undo) = undo {
                    tracing::error!(user = %id, error = %undo, "could not restore identity");
                }
            }
            return Err(err);
        }

        update.apply_to(&mut user);
        tracing::info!(user = %id, "user updated");
        Ok(user)
    }

    pub async fn assign_advisor(&self, student_id: Uuid, advisor_id: Uuid) -> PortalResult<()> {
        self.require_advisor(advisor_id).await?;
        let update = StudentUpdate {
            advisor_id: Some(advisor_id),
            ..StudentUpdate::default()
        };
        let written =
            bounded(self.timeout, self.store.update_student(student_id, &update)).await?;
        if !written {
            return Err(PortalError::not_found("student"));
        }
        tracing::info!(student = %student_id, advisor = %advisor_id, "advisor assigned");
        Ok(())
    }

    /// Profile first, then identity; a failed identity delete restores the profile.
    pub async fn delete_user(&self, id: Uuid) -> PortalResult<User> {
        let user = bounded(self.timeout, self.store.get_user(id))
            .await?
            .ok_or_else(|| PortalError::not_found("user"))?;

        if !bounded(self.timeout, self.store.delete_user(id)).await? {
            return Err(PortalError::not_found("user"));
        }

        match within(self.timeout, self.identities.delete_identity(id)).await {
            Ok(()) => {}
            Err(ProviderError::UnknownIdentity(_)) => {
                tracing::warn!(user = %id, "identity was already gone");
            }
            Err(err) => {
                tracing::warn!(
                    user = %id,
                    error = %err,
                    "identity delete failed, restoring profile"
                );
                if let Err(undo) = bounded(self.timeout, self.store.insert_user(&user)).await {
                    tracing::error!(user = %id, error = %undo, "could not restore deleted profile");
                }
                return Err(provider_failure(err));
            }
        }

        tracing::info!(user = %id, role = %user.role(), "user deleted");
        Ok(user)
    }

    pub async fn list_users(&self, role: Option<Role>) -> PortalResult<Vec<User>> {
        Ok(bounded(self.timeout, self.store.list_users(role)).await?)
    }

    pub async fn find_by_email(&self, email: &str) -> PortalResult<User> {
        let email = email.trim().to_lowercase();
        bounded(self.timeout, self.store.find_user_by_email(&email))
            .await?
            .ok_or_else(|| PortalError::not_found("user"))
    }

    pub async fn system_stats(&self) -> PortalResult<SystemStats> {
        Ok(bounded(self.timeout, self.store.system_stats()).await?)
    }

    async fn require_advisor(&self, advisor_id: Uuid) -> PortalResult<()> {
        match bounded(self.timeout, self.store.get_user(advisor_id)).await? {
            Some(user) if user.role() == Role::Advisor => Ok(()),
            _ => Err(PortalError::not_found("advisor")),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::identity::{MemoryIdentityProvider, SessionClaims};
    use crate::models::GuidanceStatus;
    use crate::store::faulty::FaultyStore;
    use crate::store::MemoryStore;

    /// Identity provider that accepts nothing and never answers.
    struct Unresponsive;

    #[async_trait]
    impl IdentityProvider for Unresponsive {
        async fn verify_session(&self, _credential: &str) -> Result<SessionClaims, ProviderError> {
            std::future::pending().await
        }

        async fn create_identity(&self, _identity: &NewIdentity) -> Result<(), ProviderError> {
            std::future::pending().await
        }

        async fn update_identity(
            &self,
            _id: Uuid,
            _name: &str,
            _email: &str,
        ) -> Result<(), ProviderError> {
            std::future::pending().await
        }

        async fn delete_identity(&self, _id: Uuid) -> Result<(), ProviderError> {
            std::future::pending().await
        }
    }

    fn roster() -> (Roster, Arc<MemoryIdentityProvider>) {
        roster_over(FaultyStore::default())
    }

    fn roster_over(store: FaultyStore) -> (Roster, Arc<MemoryIdentityProvider>) {
        let identities = Arc::new(MemoryIdentityProvider::new());
        let roster = Roster::new(Arc::new(store), identities.clone(), Duration::from_secs(1));
        (roster, identities)
    }

    #[tokio::test]
    async fn created_user_exists_on_both_sides() {
        let (roster, identities) = roster();
        let mut new_user = NewUser::new("Chioma", "Chioma@Campus.edu", Role::Student);
        new_user.department = Some("CS".to_string());
        new_user.gpa = Some(1.5);

        let user = roster.create_user(new_user).await.expect("create");
        assert!(identities.contains(user.id));
        assert_eq!(user.email, "chioma@campus.edu");
        let student = user.as_student().expect("student profile");
        assert_eq!(student.guidance_status, GuidanceStatus::NeedsGuidance);

        let found = roster.find_by_email("CHIOMA@campus.edu").await.expect("lookup");
        assert_eq!(found.id, user.id);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_by_the_provider() {
        let (roster, _) = roster();
        roster
            .create_user(NewUser::new("Dr. A", "a@campus.edu", Role::Advisor))
            .await
            .expect("first");
        let again = roster
            .create_user(NewUser::new("Dr. A again", "a@campus.edu", Role::Advisor))
            .await;
        assert!(matches!(again, Err(PortalError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn failed_profile_write_rolls_back_identity() {
        let (roster, _) = roster_over(FaultyStore {
            reject_user_inserts: true,
            ..FaultyStore::default()
        });

        let result = roster
            .create_user(NewUser::new("Amina", "amina@campus.edu", Role::Student))
            .await;
        assert_eq!(result, Err(PortalError::TransientStore));

        let retry = roster
            .create_user(NewUser::new("Amina", "amina@campus.edu", Role::Student))
            .await;
        assert_eq!(retry, Err(PortalError::TransientStore), "email was freed by the rollback");
    }

    #[tokio::test]
    async fn unresponsive_provider_surfaces_as_transient() {
        let roster = Roster::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Unresponsive),
            Duration::from_millis(20),
        );
        let created = tokio::time::timeout(
            Duration::from_secs(2),
            roster.create_user(NewUser::new("Amina", "amina@campus.edu", Role::Student)),
        )
        .await
        .expect("create returned before the outer bound");
        assert_eq!(created, Err(PortalError::TransientStore));
    }

    #[tokio::test]
    async fn delete_removes_profile_and_identity() {
        let (roster, identities) = roster();
        let user = roster
            .create_user(NewUser::new("Dr. B", "b@campus.edu", Role::Advisor))
            .await
            .expect("create");

        roster.delete_user(user.id).await.expect("delete");
        assert!(!identities.contains(user.id));
        assert!(matches!(roster.delete_user(user.id).await, Err(PortalError::NotFound(_))));
    }

    #[tokio::test]
    async fn edit_changes_both_sides() {
        let (roster, identities) = roster();
        let advisor = roster
            .create_user(NewUser::new("Dr. A", "a@campus.edu", Role::Advisor))
            .await
            .expect("advisor");
        let student = roster
            .create_user(NewUser::new("Chioma", "chioma@campus.edu", Role::Student))
            .await
            .expect("student");

        let edit = UserEdit {
            name: Some("Chioma Obi".to_string()),
            email: Some("C.Obi@Campus.edu".to_string()),
            advisor_id: Some(advisor.id),
        };
        let updated = roster.update_user(student.id, edit).await.expect("update");
        assert_eq!(updated.name, "Chioma Obi");
        assert_eq!(updated.email, "c.obi@campus.edu");
        assert_eq!(updated.as_student().and_then(|s| s.advisor_id), Some(advisor.id));

        let token = identities
            .issue_session(student.id, chrono::Duration::hours(1))
            .expect("session");
        let claims = identities.verify_session(&token).await.expect("claims");
        assert_eq!(claims.email, "c.obi@campus.edu");
        assert_eq!(claims.name, "Chioma Obi");

        let stored = roster.find_by_email("c.obi@campus.edu").await.expect("lookup");
        assert_eq!(stored.id, student.id);
    }

    #[tokio::test]
    async fn edit_rejects_taken_email_and_advisor_on_non_students() {
        let (roster, _) = roster();
        let advisor = roster
            .create_user(NewUser::new("Dr. A", "a@campus.edu", Role::Advisor))
            .await
            .expect("advisor");
        let other = roster
            .create_user(NewUser::new("Dr. B", "b@campus.edu", Role::Advisor))
            .await
            .expect("advisor");

        let taken = UserEdit {
            email: Some("a@campus.edu".to_string()),
            ..UserEdit::default()
        };
        assert!(matches!(
            roster.update_user(other.id, taken).await,
            Err(PortalError::InvalidRequest(_))
        ));

        let misplaced = UserEdit {
            advisor_id: Some(advisor.id),
            ..UserEdit::default()
        };
        assert!(matches!(
            roster.update_user(other.id, misplaced).await,
            Err(PortalError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn failed_profile_edit_restores_identity() {
        let (roster, identities) = roster_over(FaultyStore {
            reject_account_updates: true,
            ..FaultyStore::default()
        });
        let user = roster
            .create_user(NewUser::new("Dr. A", "a@campus.edu", Role::Advisor))
            .await
            .expect("create");

        let edit = UserEdit {
            email: Some("renamed@campus.edu".to_string()),
            ..UserEdit::default()
        };
        assert_eq!(roster.update_user(user.id, edit).await, Err(PortalError::TransientStore));

        let token = identities
            .issue_session(user.id, chrono::Duration::hours(1))
            .expect("session");
        let claims = identities.verify_session(&token).await.expect("claims");
        assert_eq!(claims.email, "a@campus.edu");
    }

    #[tokio::test]
    async fn assigning_requires_a_real_advisor() {
        let (roster, _) = roster();
        let student = roster
            .create_user(NewUser::new("Chioma", "chioma@campus.edu", Role::Student))
            .await
            .expect("student");
        let advisor = roster
            .create_user(NewUser::new("Dr. A", "a@campus.edu", Role::Advisor))
            .await
            .expect("advisor");

        assert!(matches!(
            roster.assign_advisor(student.id, student.id).await,
            Err(PortalError::NotFound(_))
        ));
        roster.assign_advisor(student.id, advisor.id).await.expect("assign");

        let stats = roster.system_stats().await.expect("stats");
        assert_eq!(stats.total_students, 1);
        assert_eq!(stats.total_advisors, 1);
    }
}
