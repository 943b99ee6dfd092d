//! Identity provider seam and the session verifier built on it.
//!
//! The provider owns identities and sessions. The portal only asks it to
//! verify credentials and, for the admin roster, to create or drop identities.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PortalError, PortalResult, ProviderError};
use crate::models::{Identity, Role};

pub mod memory;
pub mod postgres;

pub use memory::MemoryIdentityProvider;
pub use postgres::PgIdentityProvider;

/// Decoded claims behind a session credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub subject_id: Uuid,
    pub role: Role,
    pub name: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIdentity {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolves a credential, rejecting expired and revoked sessions.
    async fn verify_session(&self, credential: &str) -> Result<SessionClaims, ProviderError>;

    async fn create_identity(&self, identity: &NewIdentity) -> Result<(), ProviderError>;

    /// Replaces the display name and email of an existing identity.
    async fn update_identity(
        &self,
        id: Uuid,
        name: &str,
        email: &str,
    ) -> Result<(), ProviderError>;

    async fn delete_identity(&self, id: Uuid) -> Result<(), ProviderError>;
}

#[async_trait]
impl<T: IdentityProvider + ?Sized> IdentityProvider for Arc<T> {
    async fn verify_session(&self, credential: &str) -> Result<SessionClaims, ProviderError> {
        (**self).verify_session(credential).await
    }

    async fn create_identity(&self, identity: &NewIdentity) -> Result<(), ProviderError> {
        (**self).create_identity(identity).await
    }

    async fn update_identity(
        &self,
        id: Uuid,
        name: &str,
        email: &str,
    ) -> Result<(), ProviderError> {
        (**self).update_identity(id, name, email).await
    }

    async fn delete_identity(&self, id: Uuid) -> Result<(), ProviderError> {
        (**self).delete_identity(id).await
    }
}

/// Runs a provider call under a deadline, surfacing expiry as `ProviderError::Timeout`.
pub async fn within<T, F>(limit: Duration, call: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout),
    }
}

/// Turns opaque credentials into verified identities.
#[derive(Clone)]
pub struct SessionVerifier<P> {
    provider: P,
    timeout: Duration,
}

impl<P: IdentityProvider> SessionVerifier<P> {
    pub fn new(provider: P, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Every failure collapses to `Unauthenticated`; the cause is only logged.
    pub async fn verify(&self, credential: &str) -> PortalResult<Identity> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(PortalError::Unauthenticated);
        }

        let claims = match within(self.timeout, self.provider.verify_session(credential)).await {
            Ok(claims) => claims,
            Err(err) => {
                tracing::debug!(error = %err, "session rejected");
                return Err(PortalError::Unauthenticated);
            }
        };

        if claims.expires_at <= Utc::now() {
            tracing::debug!(subject = %claims.subject_id, "session expired");
            return Err(PortalError::Unauthenticated);
        }

        Ok(Identity {
            subject_id: claims.subject_id,
            role: claims.role,
            name: claims.name,
            email: claims.email,
        })
    }
}
