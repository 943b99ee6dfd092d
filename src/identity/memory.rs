use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::ProviderError;
use crate::identity::{IdentityProvider, NewIdentity, SessionClaims};

struct IssuedSession {
    subject_id: Uuid,
    expires_at: DateTime<Utc>,
    revoked: bool,
}

#[derive(Default)]
struct Registry {
    identities: HashMap<Uuid, NewIdentity>,
    sessions: HashMap<String, IssuedSession>,
}

/// Identity provider kept in process memory. Can mint and revoke sessions.
#[derive(Default)]
pub struct MemoryIdentityProvider {
    registry: Mutex<Registry>,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mints a credential for an existing identity, valid for `ttl`.
    pub fn issue_session(&self, subject_id: Uuid, ttl: Duration) -> Result<String, ProviderError> {
        let mut registry = self.registry();
        if !registry.identities.contains_key(&subject_id) {
            return Err(ProviderError::UnknownIdentity(subject_id.to_string()));
        }
        let credential = format!("sess-{}", Uuid::new_v4().simple());
        registry.sessions.insert(
            credential.clone(),
            IssuedSession {
                subject_id,
                expires_at: Utc::now() + ttl,
                revoked: false,
            },
        );
        Ok(credential)
    }

    pub fn revoke(&self, credential: &str) {
        if let Some(session) = self.registry().sessions.get_mut(credential) {
            session.revoked = true;
        }
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.registry().identities.contains_key(&id)
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn verify_session(&self, credential: &str) -> Result<SessionClaims, ProviderError> {
        let registry = self.registry();
        let session = registry
            .sessions
            .get(credential)
            .ok_or(ProviderError::UnknownCredential)?;
        if session.revoked {
            return Err(ProviderError::Revoked);
        }
        if session.expires_at <= Utc::now() {
            return Err(ProviderError::Expired);
        }
        let identity = registry
            .identities
            .get(&session.subject_id)
            .ok_or_else(|| ProviderError::UnknownIdentity(session.subject_id.to_string()))?;

        Ok(SessionClaims {
            subject_id: identity.id,
            role: identity.role,
            name: identity.name.clone(),
            email: identity.email.clone(),
            expires_at: session.expires_at,
        })
    }

    async fn create_identity(&self, identity: &NewIdentity) -> Result<(), ProviderError> {
        let mut registry = self.registry();
        let duplicate = registry.identities.contains_key(&identity.id)
            || registry.identities.values().any(|known| known.email == identity.email);
        if duplicate {
            return Err(ProviderError::Duplicate(identity.email.clone()));
        }
        registry.identities.insert(identity.id, identity.clone());
        Ok(())
    }

    async fn update_identity(
        &self,
        id: Uuid,
        name: &str,
        email: &str,
    ) -> Result<(), ProviderError> {
        let mut registry = self.registry();
        if registry
            .identities
            .iter()
            .any(|(other, known)| *other != id && known.email == email)
        {
            return Err(ProviderError::Duplicate(email.to_string()));
        }
        let identity = registry
            .identities
            .get_mut(&id)
            .ok_or_else(|| ProviderError::UnknownIdentity(id.to_string()))?;
        identity.name = name.to_string();
        identity.email = email.to_string();
        Ok(())
    }

    async fn delete_identity(&self, id: Uuid) -> Result<(), ProviderError> {
        let mut registry = self.registry();
        if registry.identities.remove(&id).is_none() {
            return Err(ProviderError::UnknownIdentity(id.to_string()));
        }
        registry.sessions.retain(|_, session| session.subject_id != id);
        Ok(())
    }
}
