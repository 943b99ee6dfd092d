use uuid::Uuid;

use crate::error::{PortalError, PortalResult};
use crate::identity::{IdentityProvider, SessionVerifier};
use crate::models::{Identity, Role};

/// Authorization gate in front of every portal operation.
pub struct AuthorizationGate<P> {
    verifier: SessionVerifier<P>,
}

impl<P: IdentityProvider> AuthorizationGate<P> {
    pub fn new(verifier: SessionVerifier<P>) -> Self {
        Self { verifier }
    }

    pub fn verifier(&self) -> &SessionVerifier<P> {
        &self.verifier
    }

    /// Verifies the session and checks its role against `allowed`.
    pub async fn require_role(&self, credential: &str, allowed: &[Role]) -> PortalResult<Identity> {
        let identity = self.verifier.verify(credential).await?;
        if !allowed.contains(&identity.role) {
            tracing::info!(
                subject = %identity.subject_id,
                role = %identity.role,
                "role not permitted for operation"
            );
            return Err(PortalError::unauthorized(format!(
                "{} accounts cannot perform this action",
                identity.role
            )));
        }
        Ok(identity)
    }

    /// Like `require_role`, but the caller must also be `subject_id`.
    pub async fn require_self(
        &self,
        credential: &str,
        role: Role,
        subject_id: Uuid,
    ) -> PortalResult<Identity> {
        let identity = self.require_role(credential, &[role]).await?;
        if identity.subject_id != subject_id {
            tracing::info!(
                subject = %identity.subject_id,
                target = %subject_id,
                "caller acting on another account"
            );
            return Err(PortalError::unauthorized("you may only act on your own account"));
        }
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::identity::{MemoryIdentityProvider, NewIdentity};

    async fn gate_with(role: Role) -> (AuthorizationGate<MemoryIdentityProvider>, Uuid, String) {
        let provider = MemoryIdentityProvider::new();
        let id = Uuid::new_v4();
        provider
            .create_identity(&NewIdentity {
                id,
                name: "caller".to_string(),
                email: format!("{id}@campus.edu"),
                role,
            })
            .await
            .expect("identity");
        let token = provider.issue_session(id, Duration::hours(1)).expect("session");
        let verifier = SessionVerifier::new(provider, std::time::Duration::from_secs(1));
        (AuthorizationGate::new(verifier), id, token)
    }

    #[tokio::test]
    async fn wrong_role_is_unauthorized() {
        let (gate, _, token) = gate_with(Role::Admin).await;
        let result = gate.require_role(&token, &[Role::Advisor]).await;
        assert!(matches!(result, Err(PortalError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn missing_session_fails_before_role_check() {
        let (gate, _, _) = gate_with(Role::Advisor).await;
        let result = gate.require_role("nope", &[Role::Advisor]).await;
        assert_eq!(result, Err(PortalError::Unauthenticated));
    }

    #[tokio::test]
    async fn ownership_is_enforced() {
        let (gate, id, token) = gate_with(Role::Advisor).await;
        assert!(gate.require_self(&token, Role::Advisor, id).await.is_ok());
        let other = gate.require_self(&token, Role::Advisor, Uuid::new_v4()).await;
        assert!(matches!(other, Err(PortalError::Unauthorized(_))));
    }
}
