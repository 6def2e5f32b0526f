//! Session token issuing and merging.
//!
//! The claims record is the compact per-request carrier of an identity. Once
//! issued it lives independently of the identity store: later changes to the
//! backing identity are not reflected until the next sign-in, and the
//! session mutation channel can change the claims without touching the store.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::auth::error::AuthError;
use crate::auth::identity::{Identity, Role};
use crate::auth::mutation::SessionUpdate;
use crate::config::AuthConfig;
use crate::types::IdentityId;

/// Claims carried in the session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub id: IdentityId,
    pub name: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
    pub role: Role,
    pub is_guest: bool,
    /// Issued at (Unix timestamp, seconds)
    pub iat: u64,
    /// Expiration time (Unix timestamp, seconds)
    pub exp: u64,
}

/// Signs, verifies and merges session claims.
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    max_age_seconds: u64,
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.token_secret.as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            max_age_seconds: config.session_max_age_seconds,
        }
    }

    /// Build claims for a freshly authenticated identity.
    pub fn issue(&self, identity: &Identity) -> Claims {
        self.issue_at(identity, now_seconds())
    }

    /// Build claims as of the given Unix time.
    pub fn issue_at(&self, identity: &Identity, now: u64) -> Claims {
        Claims {
            id: identity.id.clone(),
            name: identity.name.clone(),
            email: identity.email.clone(),
            image: identity.image.clone(),
            role: identity.role,
            is_guest: identity.is_guest,
            iat: now,
            exp: now.saturating_add(self.max_age_seconds),
        }
    }

    /// Apply a caller-supplied update to existing claims.
    ///
    /// The update is trusted as-is and is not checked against the identity
    /// store; only the guest flag is protected, since a full account never
    /// becomes a guest again. Everything else in the claims is kept.
    pub fn merge(&self, current: &Claims, update: &SessionUpdate) -> Claims {
        let mut merged = current.clone();
        if let Some(role) = update.role {
            merged.role = role;
        }
        if let Some(is_guest) = update.is_guest {
            merged.is_guest = current.is_guest && is_guest;
        }
        merged
    }

    /// Sign claims into a compact token.
    pub fn encode(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidToken(format!("Failed to sign token: {}", e)))
    }

    /// Verify a token and return its claims.
    pub fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

pub(crate) fn now_seconds() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
