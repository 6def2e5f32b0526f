//! NewType wrappers for strong typing across the identity layer.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., passing a provider account id where an identity id is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix carried by every guest identity id.
pub const GUEST_ID_PREFIX: &str = "guest_";

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Immutable identifier of an identity (e.g., "guest_3f2a..." or a bare UUID).
    ///
    /// Assigned once at creation and never rewritten. Guest identities carry
    /// the [`GUEST_ID_PREFIX`].
    IdentityId
);

newtype_string!(
    /// Account identifier as reported by an external identity provider.
    ///
    /// This is the OIDC `sub` claim for Google, Microsoft and Apple, and the
    /// numeric user id for GitHub. Only unique within a single provider.
    ProviderAccountId
);

newtype_string!(
    /// SHA-256 fingerprint of a session token.
    ///
    /// Session tokens are never written to the audit log. The fingerprint is
    /// enough to correlate entries belonging to the same token.
    TokenFingerprint
);

impl IdentityId {
    /// Generate a fresh guest identity id.
    pub fn new_guest() -> Self {
        Self(format!("{}{}", GUEST_ID_PREFIX, uuid::Uuid::new_v4().simple()))
    }

    /// Generate a fresh id for a provider-backed identity.
    pub fn new_member() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Whether this id was minted for a guest.
    pub fn is_guest(&self) -> bool {
        self.0.starts_with(GUEST_ID_PREFIX)
    }
}
