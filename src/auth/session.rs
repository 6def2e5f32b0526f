//! Session view projection.

use serde::{Deserialize, Serialize};

use crate::auth::identity::Role;
use crate::auth::token::Claims;
use crate::types::IdentityId;

/// The read-only session object handed to request handlers and clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub user: SessionUser,
    /// Expiry of the underlying token (RFC 3339, UTC)
    pub expires: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: IdentityId,
    pub name: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
    pub role: Role,
    pub is_guest: bool,
}

/// Project claims into the session view.
///
/// Depends on nothing but `claims`: no clock, no store.
pub fn materialize(claims: &Claims) -> SessionView {
    let expires = chrono::DateTime::from_timestamp(claims.exp.min(i64::MAX as u64) as i64, 0)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_default();

    SessionView {
        user: SessionUser {
            id: claims.id.clone(),
            name: claims.name.clone(),
            email: claims.email.clone(),
            image: claims.image.clone(),
            role: claims.role,
            is_guest: claims.is_guest,
        },
        expires,
    }
}
