//! Connect-time authentication gate
//!
//! Policy: credentials are validated at transport-connect time, before any
//! registry state exists for the connection. A failed gate rejects the
//! connection outright; there is no lazy first-message authentication path.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{RelayError, Result};
use crate::service::UserDirectory;

/// JWT claims carried by the bearer credential
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Display name
    pub name: String,
    /// Expiration time (UTC timestamp)
    pub exp: usize,
    /// Issued at (UTC timestamp)
    pub iat: usize,
}

/// Stable identity resolved from a valid credential
#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub user_id: String,
    pub display_name: String,
}

/// Validates bearer credentials and resolves them to user identities
pub struct AuthGate {
    decoding_key: DecodingKey,
    validation: Validation,
    directory: Arc<dyn UserDirectory>,
}

impl AuthGate {
    pub fn new(jwt_secret: &str, directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation: Validation::default(),
            directory,
        }
    }

    /// Validate signature and expiry, then confirm the user exists and is
    /// active in the directory.
    pub async fn authenticate(&self, credential: &str) -> Result<UserIdentity> {
        let token_data = decode::<Claims>(credential, &self.decoding_key, &self.validation)
            .map_err(|e| RelayError::AuthError(format!("Invalid token: {}", e)))?;
        let claims = token_data.claims;

        let user = self
            .directory
            .lookup(&claims.sub)
            .await?
            .ok_or_else(|| RelayError::AuthError(format!("Unknown user: {}", claims.sub)))?;
        if !user.active {
            return Err(RelayError::AuthError(format!("User {} is inactive", user.id)));
        }

        // Directory display name wins over the token's snapshot
        Ok(UserIdentity {
            user_id: user.id,
            display_name: user.display_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::InMemoryUserDirectory;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &str = "test-jwt-secret-0123456789-never-use-in-production";

    fn mint_token(user_id: &str, ttl_secs: i64) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let claims = Claims {
            sub: user_id.to_string(),
            name: user_id.to_string(),
            exp: (now + ttl_secs).max(0) as usize,
            iat: now as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    async fn gate_with(users: &[(&str, bool)]) -> AuthGate {
        let directory = InMemoryUserDirectory::new();
        for (id, active) in users {
            directory.add_user(id, &format!("{} Display", id), *active).await;
        }
        AuthGate::new(SECRET, Arc::new(directory))
    }

    #[tokio::test]
    async fn test_valid_credential_resolves_identity() {
        let gate = gate_with(&[("alice", true)]).await;
        let identity = gate.authenticate(&mint_token("alice", 3600)).await.unwrap();
        assert_eq!(identity.user_id, "alice");
        assert_eq!(identity.display_name, "alice Display");
    }

    #[tokio::test]
    async fn test_expired_credential_is_rejected() {
        let gate = gate_with(&[("alice", true)]).await;
        let result = gate.authenticate(&mint_token("alice", -3600)).await;
        assert!(matches!(result, Err(RelayError::AuthError(_))));
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_users_are_rejected() {
        let gate = gate_with(&[("bob", false)]).await;
        assert!(gate.authenticate(&mint_token("alice", 3600)).await.is_err());
        assert!(gate.authenticate(&mint_token("bob", 3600)).await.is_err());
    }

    #[tokio::test]
    async fn test_garbage_credential_is_rejected() {
        let gate = gate_with(&[]).await;
        assert!(gate.authenticate("not-a-jwt").await.is_err());
    }
}
