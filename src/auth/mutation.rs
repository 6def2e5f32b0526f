//! Session mutation channel.
//!
//! Lets a session holder force new `role`/`isGuest` values into its own
//! claims without signing in again (used to signal a guest upgrade after an
//! out-of-band account link). The channel is only reachable through an
//! [`AuthenticatedSession`], which can only be obtained from a token that
//! verifies. What the payload says is not checked against the identity
//! store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::auth::error::AuthError;
use crate::auth::identity::Role;
use crate::auth::identity_store::IdentityStore;
use crate::auth::session::{SessionView, materialize};
use crate::auth::token::{Claims, TokenIssuer};
use crate::db::schema::{AuditAction, AuditLogCreate};
use crate::types::TokenFingerprint;

/// Caller-supplied claim overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub is_guest: Option<bool>,
}

impl SessionUpdate {
    pub fn is_empty(&self) -> bool {
        self.role.is_none() && self.is_guest.is_none()
    }
}

/// A session whose token has been verified.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    claims: Claims,
    fingerprint: TokenFingerprint,
}

impl AuthenticatedSession {
    /// Verify `token` and wrap its claims.
    pub fn from_token(issuer: &TokenIssuer, token: &str) -> Result<Self, AuthError> {
        let claims = issuer.decode(token)?;
        Ok(Self {
            claims,
            fingerprint: fingerprint_token(token),
        })
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn fingerprint(&self) -> &TokenFingerprint {
        &self.fingerprint
    }

    pub fn session(&self) -> SessionView {
        materialize(&self.claims)
    }
}

/// Result of a mutation: the merged claims, their token and the new view.
#[derive(Debug, Clone, Serialize)]
pub struct SessionUpdated {
    #[serde(skip)]
    pub claims: Claims,
    pub token: String,
    pub session: SessionView,
}

/// Applies [`SessionUpdate`]s to authenticated sessions.
pub struct SessionMutator<S> {
    issuer: Arc<TokenIssuer>,
    store: Arc<S>,
}

impl<S: IdentityStore> SessionMutator<S> {
    pub fn new(issuer: Arc<TokenIssuer>, store: Arc<S>) -> Self {
        Self { issuer, store }
    }

    /// Merge `update` into the session's claims and re-sign them.
    pub async fn update_session(
        &self,
        session: AuthenticatedSession,
        update: SessionUpdate,
    ) -> Result<SessionUpdated, AuthError> {
        let previous = session.claims;
        let claims = self.issuer.merge(&previous, &update);
        let token = self.issuer.encode(&claims)?;

        if claims != previous {
            info!(
                identity_id = %claims.id,
                role = %claims.role,
                is_guest = claims.is_guest,
                "Session claims updated"
            );
        }

        let entry = AuditLogCreate::for_identity(
            claims.id.as_str(),
            AuditAction::SessionUpdated,
            serde_json::json!({
                "previous_token": session.fingerprint.as_str(),
                "requested": update,
                "role": { "from": previous.role, "to": claims.role },
                "is_guest": { "from": previous.is_guest, "to": claims.is_guest },
            }),
        );
        if let Err(e) = self.store.audit_log(entry).await {
            warn!(identity_id = %claims.id, "Failed to audit session update: {}", e);
        }

        Ok(SessionUpdated {
            session: materialize(&claims),
            claims,
            token,
        })
    }
}

/// SHA-256 fingerprint of a token, safe to log.
pub fn fingerprint_token(token: &str) -> TokenFingerprint {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let result = hasher.finalize();
    TokenFingerprint::new(format!("{:x}", result))
}
