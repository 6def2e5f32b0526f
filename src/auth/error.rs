//! Authentication errors and the public error taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Authentication errors.
#[derive(Debug, Clone)]
pub enum AuthError {
    /// The provider rejected the credentials, or they were malformed
    InvalidCredentials(String),
    /// The provider id is not one this service knows about
    UnknownProvider(String),
    /// The provider is known but not configured for this deployment
    ProviderNotConfigured(String),
    /// The provider verified the account but sign-in is not permitted
    AccessDenied(String),
    /// No session token was presented
    Unauthenticated,
    /// The session token is invalid, tampered with or expired
    InvalidToken(String),
    /// Identity store failure
    Store(String),
    /// Provider key set could not be fetched or used
    Jwks(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCredentials(msg) => write!(f, "Invalid credentials: {}", msg),
            Self::UnknownProvider(id) => write!(f, "Unknown provider: {}", id),
            Self::ProviderNotConfigured(id) => write!(f, "Provider not configured: {}", id),
            Self::AccessDenied(msg) => write!(f, "Access denied: {}", msg),
            Self::Unauthenticated => write!(f, "Authentication required"),
            Self::InvalidToken(msg) => write!(f, "Invalid token: {}", msg),
            Self::Store(msg) => write!(f, "Identity store error: {}", msg),
            Self::Jwks(msg) => write!(f, "JWKS error: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Store(err.to_string())
    }
}

/// Classification of authentication failures exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthErrorKind {
    Configuration,
    AccessDenied,
    Verification,
    Default,
}

impl AuthErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "Configuration",
            Self::AccessDenied => "AccessDenied",
            Self::Verification => "Verification",
            Self::Default => "Default",
        }
    }

    /// Parse the `error` query value; anything unrecognised is `Default`.
    pub fn parse(value: &str) -> Self {
        match value {
            "Configuration" => Self::Configuration,
            "AccessDenied" => Self::AccessDenied,
            "Verification" => Self::Verification,
            _ => Self::Default,
        }
    }

    /// Message shown on the error destination.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Configuration => "There is a problem with the server configuration.",
            Self::AccessDenied => "You do not have permission to sign in.",
            Self::Verification => "The sign in could not be verified. Please try again.",
            Self::Default => "Unable to sign in.",
        }
    }
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AuthError {
    /// Map this failure onto the public taxonomy.
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::UnknownProvider(_) | Self::ProviderNotConfigured(_) | Self::Jwks(_) => {
                AuthErrorKind::Configuration
            }
            Self::AccessDenied(_) => AuthErrorKind::AccessDenied,
            Self::InvalidCredentials(_) | Self::InvalidToken(_) | Self::Unauthenticated => {
                AuthErrorKind::Verification
            }
            Self::Store(_) => AuthErrorKind::Default,
        }
    }

    /// Build the error destination for this failure, e.g. `/auth/error?error=Verification`.
    ///
    /// `error_page` may be a path or an absolute URL.
    pub fn destination(&self, error_page: &str) -> String {
        error_destination(error_page, self.kind())
    }
}

/// Append `error=<kind>` to the configured error page.
pub fn error_destination(error_page: &str, kind: AuthErrorKind) -> String {
    // Relative paths are resolved against a placeholder origin and stripped again.
    const PLACEHOLDER: &str = "http://localhost";

    let (mut url, relative) = match Url::parse(error_page) {
        Ok(url) => (url, false),
        Err(_) => match Url::parse(PLACEHOLDER).and_then(|base| base.join(error_page)) {
            Ok(url) => (url, true),
            Err(_) => return format!("{}?error={}", error_page, kind),
        },
    };

    url.query_pairs_mut().append_pair("error", kind.as_str());

    if relative {
        url.as_str().trim_start_matches(PLACEHOLDER).to_string()
    } else {
        url.to_string()
    }
}
