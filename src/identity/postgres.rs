use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::ProviderError;
use crate::identity::{IdentityProvider, NewIdentity, SessionClaims};
use crate::models::Role;

/// Reads sessions the identity service wrote into the `identity` schema.
/// Credentials are never stored; rows are keyed by their SHA-256 digest.
#[derive(Clone)]
pub struct PgIdentityProvider {
    pool: PgPool,
}

impl PgIdentityProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub fn credential_digest(credential: &str) -> String {
    format!("{:x}", Sha256::digest(credential.as_bytes()))
}

#[async_trait]
impl IdentityProvider for PgIdentityProvider {
    async fn verify_session(&self, credential: &str) -> Result<SessionClaims, ProviderError> {
        let row = sqlx::query(
            r#"
            SELECT i.id, i.name, i.email, i.role, s.expires_at, s.revoked_at
            FROM identity.sessions s
            JOIN identity.identities i ON i.id = s.subject_id
            WHERE s.token_hash = $1
            "#,
        )
        .bind(credential_digest(credential))
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ProviderError::UnknownCredential)?;

        let revoked_at: Option<DateTime<Utc>> = row.try_get("revoked_at")?;
        if revoked_at.is_some() {
            return Err(ProviderError::Revoked);
        }

        let expires_at: DateTime<Utc> = row.try_get("expires_at")?;
        if expires_at <= Utc::now() {
            return Err(ProviderError::Expired);
        }

        let role: String = row.try_get("role")?;
        let role: Role = role
            .parse()
            .map_err(|_| ProviderError::Backend(format!("unknown role {role:?}")))?;

        Ok(SessionClaims {
            subject_id: row.try_get("id")?,
            role,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            expires_at,
        })
    }

    async fn create_identity(&self, identity: &NewIdentity) -> Result<(), ProviderError> {
        sqlx::query(
            r#"
            INSERT INTO identity.identities (id, name, email, role)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(identity.id)
        .bind(&identity.name)
        .bind(&identity.email)
        .bind(identity.role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_identity(
        &self,
        id: Uuid,
        name: &str,
        email: &str,
    ) -> Result<(), ProviderError> {
        let result = sqlx::query(
            r#"
            UPDATE identity.identities
            SET name = $2, email = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ProviderError::UnknownIdentity(id.to_string()));
        }
        Ok(())
    }

    async fn delete_identity(&self, id: Uuid) -> Result<(), ProviderError> {
        let result = sqlx::query("DELETE FROM identity.identities WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ProviderError::UnknownIdentity(id.to_string()));
        }
        Ok(())
    }
}
