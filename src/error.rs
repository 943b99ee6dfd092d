//! Error taxonomy shared by every portal operation.
//!
//! `PortalError` is what callers see. Its messages are safe to render to an
//! end user; infrastructure detail stays in the logs.

use thiserror::Error;

pub type PortalResult<T> = Result<T, PortalError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortalError {
    #[error("no valid session")]
    Unauthenticated,

    #[error("not allowed: {0}")]
    Unauthorized(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("slot {label} on {date} is no longer available")]
    SlotConflict { date: String, label: String },

    #[error("temporary storage failure, please retry")]
    TransientStore,
}

impl PortalError {
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized(reason.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest(reason.into())
    }

    /// Only infrastructure failures may be retried without user input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStore)
    }
}

/// Failures reported by an entity store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("write conflicts with an existing record")]
    Conflict,

    #[error("store call timed out")]
    Timeout,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

impl From<StoreError> for PortalError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => PortalError::invalid("a conflicting record already exists"),
            StoreError::Timeout | StoreError::Unavailable(_) => {
                tracing::warn!(error = %err, "store call failed");
                PortalError::TransientStore
            }
        }
    }
}

/// Failures reported by the identity provider. Never shown to callers.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("credential not recognised")]
    UnknownCredential,

    #[error("credential expired")]
    Expired,

    #[error("credential revoked")]
    Revoked,

    #[error("identity {0} already exists")]
    Duplicate(String),

    #[error("identity {0} not found")]
    UnknownIdentity(String),

    #[error("identity provider did not answer in time")]
    Timeout,

    #[error("identity backend failure: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for ProviderError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ProviderError::Duplicate(db.message().to_string())
            }
            _ => ProviderError::Backend(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_store_errors_are_retryable() {
        assert!(PortalError::TransientStore.is_retryable());
        assert!(!PortalError::Unauthenticated.is_retryable());
        assert!(!PortalError::SlotConflict {
            date: "2025-11-01".to_string(),
            label: "9:30".to_string(),
        }
        .is_retryable());
    }

    #[test]
    fn store_failures_do_not_leak_detail() {
        let err: PortalError =
            StoreError::Unavailable("connection reset by 10.0.0.4".into()).into();
        assert_eq!(err, PortalError::TransientStore);
        assert!(!err.to_string().contains("10.0.0.4"));
    }
}
