//! ID token verification for OpenID Connect providers (Google, Microsoft, Apple).

use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::auth::error::AuthError;
use crate::auth::jwks::JwksCache;
use crate::auth::provider::{ProviderCredentials, ProviderVerifier, VerifiedProfile, VerifyFuture};
use crate::config::AuthConfig;
use crate::types::ProviderAccountId;

const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const APPLE_JWKS_URL: &str = "https://appleid.apple.com/auth/keys";
const MICROSOFT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Issuers accepted for a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuerRule {
    /// Any of these exact values
    Exact(Vec<String>),
    /// Multi-tenant Microsoft: `https://login.microsoftonline.com/<tenant-id>/v2.0`
    MicrosoftAnyTenant,
}

impl IssuerRule {
    pub fn accepts(&self, issuer: &str) -> bool {
        match self {
            Self::Exact(allowed) => allowed.iter().any(|a| a == issuer),
            Self::MicrosoftAnyTenant => issuer
                .strip_prefix(MICROSOFT_AUTHORITY)
                .and_then(|rest| rest.strip_prefix('/'))
                .and_then(|rest| rest.strip_suffix("/v2.0"))
                .is_some_and(|tenant| !tenant.is_empty() && !tenant.contains('/')),
        }
    }
}

/// Which claim vouches for the `email` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailPolicy {
    /// `email_verified` must be present and true (Google, Apple)
    VerifiedFlag,
    /// `xms_edov` must be true: the tenant owns the email's domain (Microsoft)
    VerifiedDomainOwner,
}

/// Claims read from a provider ID token.
#[derive(Debug, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    pub iss: String,
    pub email: Option<String>,
    /// Google sends a bool, Apple sends "true"/"false"
    pub email_verified: Option<Value>,
    /// Microsoft's email domain owner verified flag
    pub xms_edov: Option<Value>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

fn claim_is_true(claim: &Option<Value>) -> bool {
    match claim {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true" || s == "1",
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        _ => false,
    }
}

impl IdTokenClaims {
    /// The email this token vouches for, if any.
    ///
    /// A missing or unparseable verification claim disqualifies the address.
    pub fn verified_email(&self, policy: EmailPolicy) -> Option<String> {
        let verified = match policy {
            EmailPolicy::VerifiedFlag => claim_is_true(&self.email_verified),
            EmailPolicy::VerifiedDomainOwner => claim_is_true(&self.xms_edov),
        };
        if !verified {
            return None;
        }
        self.email.clone().filter(|e| !e.trim().is_empty())
    }

    pub fn into_profile(self, policy: EmailPolicy) -> Result<VerifiedProfile, AuthError> {
        let email = self.verified_email(policy).ok_or_else(|| {
            AuthError::AccessDenied("provider did not return a verified email".to_string())
        })?;

        Ok(VerifiedProfile {
            provider_account_id: ProviderAccountId::new(self.sub),
            email,
            name: self.name,
            image: self.picture,
        })
    }
}

/// Verifies RS256 ID tokens against a provider's published keys.
pub struct OidcVerifier {
    provider: &'static str,
    client_id: String,
    issuers: IssuerRule,
    email_policy: EmailPolicy,
    jwks: JwksCache,
}

impl OidcVerifier {
    pub fn new(
        provider: &'static str,
        client_id: impl Into<String>,
        issuers: IssuerRule,
        email_policy: EmailPolicy,
        jwks: JwksCache,
    ) -> Self {
        Self {
            provider,
            client_id: client_id.into(),
            issuers,
            email_policy,
            jwks,
        }
    }

    pub fn google(client_id: &str, client: reqwest::Client, config: &AuthConfig) -> Self {
        Self::new(
            "google",
            client_id,
            IssuerRule::Exact(vec![
                "https://accounts.google.com".to_string(),
                "accounts.google.com".to_string(),
            ]),
            EmailPolicy::VerifiedFlag,
            JwksCache::new(
                GOOGLE_JWKS_URL,
                config.jwks_cache_seconds,
                config.allow_stale_jwks,
                client,
            ),
        )
    }

    pub fn apple(client_id: &str, client: reqwest::Client, config: &AuthConfig) -> Self {
        Self::new(
            "apple",
            client_id,
            IssuerRule::Exact(vec!["https://appleid.apple.com".to_string()]),
            EmailPolicy::VerifiedFlag,
            JwksCache::new(
                APPLE_JWKS_URL,
                config.jwks_cache_seconds,
                config.allow_stale_jwks,
                client,
            ),
        )
    }

    pub fn microsoft(
        client_id: &str,
        tenant: &str,
        client: reqwest::Client,
        config: &AuthConfig,
    ) -> Self {
        let issuers = match tenant {
            "common" | "organizations" | "consumers" => IssuerRule::MicrosoftAnyTenant,
            tenant => IssuerRule::Exact(vec![format!("{}/{}/v2.0", MICROSOFT_AUTHORITY, tenant)]),
        };

        Self::new(
            "microsoft",
            client_id,
            issuers,
            EmailPolicy::VerifiedDomainOwner,
            JwksCache::new(
                format!("{}/{}/discovery/v2.0/keys", MICROSOFT_AUTHORITY, tenant),
                config.jwks_cache_seconds,
                config.allow_stale_jwks,
                client,
            ),
        )
    }

    pub fn issuers(&self) -> &IssuerRule {
        &self.issuers
    }

    pub fn email_policy(&self) -> EmailPolicy {
        self.email_policy
    }

    pub fn jwks(&self) -> &JwksCache {
        &self.jwks
    }

    async fn verify_id_token(&self, token: &str) -> Result<VerifiedProfile, AuthError> {
        let header = decode_header(token)
            .map_err(|e| AuthError::InvalidCredentials(format!("Invalid ID token header: {}", e)))?;

        let decoding_key = self
            .jwks
            .get_key(header.kid.as_deref())
            .await
            .map_err(|e| AuthError::Jwks(e.to_string()))?;

        // Issuer is checked separately so multi-tenant rules can apply.
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.client_id]);

        let claims = decode::<IdTokenClaims>(token, &decoding_key, &validation)
            .map_err(|e| {
                AuthError::InvalidCredentials(format!("ID token verification failed: {}", e))
            })?
            .claims;

        if !self.issuers.accepts(&claims.iss) {
            return Err(AuthError::InvalidCredentials(format!(
                "Unexpected issuer: {}",
                claims.iss
            )));
        }

        debug!(provider = self.provider, subject = %claims.sub, "ID token verified");
        claims.into_profile(self.email_policy)
    }
}

impl ProviderVerifier for OidcVerifier {
    fn verify<'a>(&'a self, credentials: &'a ProviderCredentials) -> VerifyFuture<'a> {
        Box::pin(async move {
            let token = credentials.id_token.as_deref().ok_or_else(|| {
                AuthError::InvalidCredentials(format!("{} sign-in requires an id_token", self.provider))
            })?;
            self.verify_id_token(token).await
        })
    }
}
