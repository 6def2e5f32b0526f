//! Process-wide authentication configuration.
//!
//! The configuration is loaded once at startup, validated, and then shared
//! immutably behind an `Arc` by every component that needs it.

use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf};

use crate::auth::jwks::DEFAULT_CACHE_TTL_SECONDS;

/// Default session lifetime (30 days).
pub const DEFAULT_SESSION_MAX_AGE_SECONDS: u64 = 30 * 24 * 60 * 60;

/// Longest accepted session lifetime (10 years).
pub const MAX_SESSION_MAX_AGE_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// Default destination for authentication errors.
pub const DEFAULT_ERROR_PAGE: &str = "/auth/error";

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// The single email address allowed to hold the ADMIN role.
    /// `None` disables promotion entirely.
    #[serde(default)]
    pub admin_email: Option<String>,
    /// HMAC secret used to sign session tokens.
    pub token_secret: String,
    /// Session token lifetime in seconds.
    #[serde(default = "default_session_max_age")]
    pub session_max_age_seconds: u64,
    /// Path or URL that authentication failures are routed to.
    #[serde(default = "default_error_page")]
    pub error_page: String,
    /// External identity providers enabled for sign-in.
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// JWKS cache TTL in seconds.
    #[serde(default = "default_jwks_cache_seconds")]
    pub jwks_cache_seconds: u64,
    /// Whether to allow a stale JWKS cache when a refresh fails.
    #[serde(default = "default_allow_stale_jwks")]
    pub allow_stale_jwks: bool,
}

/// Per-provider settings. A provider is enabled when its entry is present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub google: Option<OidcClientConfig>,
    #[serde(default)]
    pub microsoft: Option<MicrosoftClientConfig>,
    #[serde(default)]
    pub apple: Option<OidcClientConfig>,
    #[serde(default)]
    pub github: Option<GithubClientConfig>,
}

/// OIDC relying-party settings for Google and Apple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcClientConfig {
    /// OAuth client id; expected as the `aud` of every ID token.
    pub client_id: String,
}

/// Microsoft Entra ID settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicrosoftClientConfig {
    pub client_id: String,
    /// Tenant segment of the authority; `common` accepts any tenant.
    #[serde(default = "default_microsoft_tenant")]
    pub tenant: String,
}

/// GitHub OAuth app settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubClientConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    /// Base URL of the GitHub REST API.
    #[serde(default = "default_github_api_base")]
    pub api_base_url: String,
}

fn default_session_max_age() -> u64 {
    DEFAULT_SESSION_MAX_AGE_SECONDS
}

fn default_error_page() -> String {
    DEFAULT_ERROR_PAGE.to_string()
}

fn default_jwks_cache_seconds() -> u64 {
    DEFAULT_CACHE_TTL_SECONDS
}

fn default_allow_stale_jwks() -> bool {
    true
}

fn default_microsoft_tenant() -> String {
    "common".to_string()
}

fn default_github_api_base() -> String {
    "https://api.github.com".to_string()
}

impl AuthConfig {
    /// Create a config with the given signing secret and no providers.
    pub fn new(token_secret: impl Into<String>) -> Self {
        Self {
            admin_email: None,
            token_secret: token_secret.into(),
            session_max_age_seconds: DEFAULT_SESSION_MAX_AGE_SECONDS,
            error_page: DEFAULT_ERROR_PAGE.to_string(),
            providers: ProvidersConfig::default(),
            jwks_cache_seconds: DEFAULT_CACHE_TTL_SECONDS,
            allow_stale_jwks: true,
        }
    }

    /// Set the admin email.
    pub fn with_admin_email(mut self, email: impl Into<String>) -> Self {
        self.admin_email = Some(email.into());
        self
    }

    /// Parse a JSON config document, expanding `${VAR}` references.
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let expanded = expand_env_vars(raw);
        let config: AuthConfig = serde_json::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Build the config from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let token_secret = env::var("AUTH_SECRET")
            .map_err(|_| anyhow::anyhow!("AUTH_SECRET must be set"))?;

        let mut config = Self::new(token_secret);
        config.admin_email = non_empty_var("ADMIN_EMAIL");

        if let Some(age) = non_empty_var("SESSION_MAX_AGE_SECONDS") {
            config.session_max_age_seconds = age.parse()?;
        }
        if let Some(page) = non_empty_var("AUTH_ERROR_PAGE") {
            config.error_page = page;
        }

        config.providers.google =
            non_empty_var("GOOGLE_CLIENT_ID").map(|client_id| OidcClientConfig { client_id });
        config.providers.apple =
            non_empty_var("APPLE_CLIENT_ID").map(|client_id| OidcClientConfig { client_id });
        config.providers.microsoft =
            non_empty_var("MICROSOFT_CLIENT_ID").map(|client_id| MicrosoftClientConfig {
                client_id,
                tenant: non_empty_var("MICROSOFT_TENANT").unwrap_or_else(default_microsoft_tenant),
            });
        if let Some(client_id) = non_empty_var("GITHUB_CLIENT_ID") {
            config.providers.github = Some(GithubClientConfig {
                client_id: Some(client_id),
                api_base_url: default_github_api_base(),
            });
        }

        config.validate()?;
        Ok(config)
    }

    /// Load the config once at startup: from the JSON file when one can be
    /// found, otherwise from the environment.
    pub fn load() -> anyhow::Result<Self> {
        match resolve_auth_json_path() {
            Some(path) => {
                let raw = fs::read_to_string(&path)?;
                tracing::info!(path = %path.display(), "Loading auth config file");
                Self::from_json(&raw)
            }
            None => Self::from_env(),
        }
    }

    /// Reject configurations that cannot issue tokens safely.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.token_secret.trim().is_empty() {
            return Err(anyhow::anyhow!("token_secret must not be empty"));
        }
        if self.session_max_age_seconds == 0 {
            return Err(anyhow::anyhow!("session_max_age_seconds must be positive"));
        }
        if self.session_max_age_seconds > MAX_SESSION_MAX_AGE_SECONDS {
            return Err(anyhow::anyhow!(
                "session_max_age_seconds must be at most {}",
                MAX_SESSION_MAX_AGE_SECONDS
            ));
        }
        if let Some(email) = &self.admin_email
            && email.trim().is_empty()
        {
            return Err(anyhow::anyhow!("admin_email must not be blank when set"));
        }
        Ok(())
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Locate the auth config file: `AUTH_CONFIG`, then `$XDG_CONFIG_HOME/identity-gate/auth.json`,
/// then `./auth.json`.
pub fn resolve_auth_json_path() -> Option<PathBuf> {
    if let Ok(p) = env::var("AUTH_CONFIG") {
        return Some(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("identity-gate").join("auth.json");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    let candidate = PathBuf::from("auth.json");
    if candidate.exists() {
        return Some(candidate);
    }

    None
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}
