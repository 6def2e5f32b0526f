//! Sign-in providers and their verifiers.
//!
//! Provider verification (token signature, issuer and audience checks, API
//! lookups) is delegated to a [`ProviderVerifier`] per provider. The
//! resolver only sees the [`VerifiedProfile`] it hands back.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::error::AuthError;
use crate::auth::github::GithubVerifier;
use crate::auth::oidc::OidcVerifier;
use crate::config::AuthConfig;
use crate::types::ProviderAccountId;

/// Sign-in strategies accepted by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Guest,
    Google,
    Github,
    Microsoft,
    Apple,
}

impl ProviderId {
    pub const ALL: [ProviderId; 5] = [
        Self::Guest,
        Self::Google,
        Self::Github,
        Self::Microsoft,
        Self::Apple,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Google => "google",
            Self::Github => "github",
            Self::Microsoft => "microsoft",
            Self::Apple => "apple",
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Self::Guest)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| AuthError::UnknownProvider(s.to_string()))
    }
}

/// Provider-specific credentials presented at sign-in.
///
/// OIDC providers expect an `id_token`; GitHub expects an `access_token`.
/// Guests present nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderCredentials {
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

/// The profile a provider vouches for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedProfile {
    pub provider_account_id: ProviderAccountId,
    pub email: String,
    pub name: Option<String>,
    pub image: Option<String>,
}

/// Boxed future returned by [`ProviderVerifier::verify`].
pub type VerifyFuture<'a> =
    Pin<Box<dyn Future<Output = Result<VerifiedProfile, AuthError>> + Send + 'a>>;

/// Verifies credentials against one external identity provider.
pub trait ProviderVerifier: Send + Sync {
    fn verify<'a>(&'a self, credentials: &'a ProviderCredentials) -> VerifyFuture<'a>;
}

/// Verifiers for the providers enabled in this deployment.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    verifiers: HashMap<ProviderId, Arc<dyn ProviderVerifier>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the verifier for a provider.
    pub fn register(mut self, provider: ProviderId, verifier: Arc<dyn ProviderVerifier>) -> Self {
        self.verifiers.insert(provider, verifier);
        self
    }

    /// Build verifiers for every provider present in the config.
    pub fn from_config(config: &AuthConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("identity-gate/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut registry = Self::new();
        let providers = &config.providers;

        if let Some(google) = &providers.google {
            registry = registry.register(
                ProviderId::Google,
                Arc::new(OidcVerifier::google(&google.client_id, client.clone(), config)),
            );
        }
        if let Some(microsoft) = &providers.microsoft {
            registry = registry.register(
                ProviderId::Microsoft,
                Arc::new(OidcVerifier::microsoft(
                    &microsoft.client_id,
                    &microsoft.tenant,
                    client.clone(),
                    config,
                )),
            );
        }
        if let Some(apple) = &providers.apple {
            registry = registry.register(
                ProviderId::Apple,
                Arc::new(OidcVerifier::apple(&apple.client_id, client.clone(), config)),
            );
        }
        if let Some(github) = &providers.github {
            registry = registry.register(
                ProviderId::Github,
                Arc::new(GithubVerifier::new(&github.api_base_url, client.clone())),
            );
        }

        Ok(registry)
    }

    pub fn get(&self, provider: ProviderId) -> Option<&Arc<dyn ProviderVerifier>> {
        self.verifiers.get(&provider)
    }

    /// Providers that can be signed in with, guest included.
    pub fn enabled(&self) -> Vec<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|p| p.is_guest() || self.verifiers.contains_key(p))
            .collect()
    }
}
