//! Provider signing-key cache.
//!
//! OIDC providers publish the RSA keys that sign their ID tokens as a JSON
//! Web Key Set. Keys are fetched on demand, cached for a TTL and, when a
//! refresh fails, served stale for up to [`MAX_STALE_CACHE_SECONDS`]. An
//! unknown `kid` forces a refresh at most once per
//! [`MIN_REFRESH_INTERVAL_SECONDS`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Default cache TTL in seconds (1 hour).
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;

/// Maximum stale cache age in seconds (24 hours).
pub const MAX_STALE_CACHE_SECONDS: u64 = 86400;

/// Minimum time between fetches forced by an unknown `kid`.
pub const MIN_REFRESH_INTERVAL_SECONDS: u64 = 60;

/// A single JSON Web Key.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA")
    pub kty: String,
    /// Key ID, matched against the token header `kid`
    pub kid: Option<String>,
    /// Algorithm (e.g., "RS256")
    pub alg: Option<String>,
    /// Key use ("sig" or "enc")
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus (base64url encoded)
    pub n: Option<String>,
    /// RSA exponent (base64url encoded)
    pub e: Option<String>,
}

/// A JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

#[derive(Default)]
struct KeySet {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Option<Instant>,
    last_attempt: Option<Instant>,
}

/// Thread-safe JWKS cache for one provider.
pub struct JwksCache {
    jwks_url: String,
    cache_ttl: Duration,
    allow_stale: bool,
    min_refresh_interval: Duration,
    state: RwLock<KeySet>,
    client: reqwest::Client,
}

impl JwksCache {
    pub fn new(
        jwks_url: impl Into<String>,
        cache_ttl_seconds: u64,
        allow_stale: bool,
        client: reqwest::Client,
    ) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            cache_ttl: Duration::from_secs(cache_ttl_seconds),
            allow_stale,
            min_refresh_interval: Duration::from_secs(MIN_REFRESH_INTERVAL_SECONDS),
            state: RwLock::new(KeySet::default()),
            client,
        }
    }

    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Get the decoding key for `kid`.
    ///
    /// Without a `kid` the only cached key is returned, if there is exactly
    /// one. Refreshes when the cache is stale, or when the key is unknown
    /// (keys rotate) and no fetch was attempted within the refresh interval.
    pub async fn get_key(&self, kid: Option<&str>) -> Result<DecodingKey, JwksCacheError> {
        let (fresh, throttled) = {
            let state = self.state.read().await;
            (
                state
                    .fetched_at
                    .is_some_and(|t| t.elapsed() <= self.cache_ttl),
                state
                    .last_attempt
                    .is_some_and(|t| t.elapsed() < self.min_refresh_interval),
            )
        };

        if fresh {
            if let Some(key) = self.lookup(kid).await {
                return Ok(key);
            }
            if throttled {
                debug!(url = %self.jwks_url, kid, "Unknown key id; refresh throttled");
                return Err(Self::missing(kid));
            }
        }

        match self.fetch_keys().await {
            Ok(()) => self.lookup(kid).await.ok_or_else(|| Self::missing(kid)),
            Err(e) => {
                if self.allow_stale {
                    let stale_ok = self.state.read().await.fetched_at.is_some_and(|t| {
                        t.elapsed() < Duration::from_secs(MAX_STALE_CACHE_SECONDS)
                    });

                    if stale_ok && let Some(key) = self.lookup(kid).await {
                        warn!(url = %self.jwks_url, "JWKS fetch failed, using stale cache: {}", e);
                        return Ok(key);
                    }
                }

                Err(e)
            }
        }
    }

    fn missing(kid: Option<&str>) -> JwksCacheError {
        match kid {
            Some(k) => JwksCacheError::KeyNotFound(k.to_string()),
            None => JwksCacheError::NoKeysAvailable,
        }
    }

    async fn lookup(&self, kid: Option<&str>) -> Option<DecodingKey> {
        let state = self.state.read().await;

        match kid {
            Some(k) => state.keys.get(k).cloned(),
            None if state.keys.len() == 1 => state.keys.values().next().cloned(),
            None => None,
        }
    }

    /// Fetch keys from the JWKS endpoint, replacing the cache.
    pub async fn fetch_keys(&self) -> Result<(), JwksCacheError> {
        debug!("Fetching JWKS from {}", self.jwks_url);
        self.state.write().await.last_attempt = Some(Instant::now());

        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| JwksCacheError::FetchError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(JwksCacheError::FetchError(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let document: JwksDocument = response
            .json()
            .await
            .map_err(|e| JwksCacheError::ParseError(e.to_string()))?;

        let keys = Self::decoding_keys(document)?;
        let count = keys.len();
        self.install_keys(keys).await;

        debug!(url = %self.jwks_url, "Cached {} signing keys", count);
        Ok(())
    }

    /// Replace the cached keys as if they had just been fetched.
    pub async fn install_keys(&self, keys: HashMap<String, DecodingKey>) {
        let now = Instant::now();
        let mut state = self.state.write().await;
        state.keys = keys;
        state.fetched_at = Some(now);
        state.last_attempt = Some(now);
    }

    /// Convert the usable signature keys of a document.
    pub fn decoding_keys(
        document: JwksDocument,
    ) -> Result<HashMap<String, DecodingKey>, JwksCacheError> {
        let mut keys = HashMap::new();

        for jwk in document.keys {
            if jwk.kty != "RSA" {
                debug!("Skipping non-RSA key: {:?}", jwk.kty);
                continue;
            }
            if jwk.key_use.as_deref() == Some("enc") {
                debug!("Skipping encryption key");
                continue;
            }

            match Self::jwk_to_decoding_key(&jwk) {
                Ok(key) => {
                    let kid = jwk.kid.unwrap_or_else(|| "default".to_string());
                    keys.insert(kid, key);
                }
                Err(e) => warn!("Failed to parse JWK: {}", e),
            }
        }

        if keys.is_empty() {
            return Err(JwksCacheError::NoValidKeys);
        }
        Ok(keys)
    }

    fn jwk_to_decoding_key(jwk: &Jwk) -> Result<DecodingKey, JwksCacheError> {
        let n = jwk
            .n
            .as_ref()
            .ok_or_else(|| JwksCacheError::ParseError("Missing 'n' in RSA key".to_string()))?;
        let e = jwk
            .e
            .as_ref()
            .ok_or_else(|| JwksCacheError::ParseError("Missing 'e' in RSA key".to_string()))?;

        DecodingKey::from_rsa_components(n, e)
            .map_err(|e| JwksCacheError::ParseError(format!("Invalid RSA components: {}", e)))
    }

    /// Number of cached keys.
    pub async fn key_count(&self) -> usize {
        self.state.read().await.keys.len()
    }
}

/// Errors that can occur when working with the JWKS cache.
#[derive(Debug, Clone)]
pub enum JwksCacheError {
    /// Failed to fetch JWKS from endpoint.
    FetchError(String),
    /// Failed to parse JWKS response.
    ParseError(String),
    /// No valid keys found in JWKS.
    NoValidKeys,
    /// Key with specified kid not found.
    KeyNotFound(String),
    /// No key could be chosen from the cache.
    NoKeysAvailable,
}

impl std::fmt::Display for JwksCacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FetchError(msg) => write!(f, "Failed to fetch JWKS: {}", msg),
            Self::ParseError(msg) => write!(f, "Failed to parse JWKS: {}", msg),
            Self::NoValidKeys => write!(f, "No valid keys found in JWKS"),
            Self::KeyNotFound(kid) => write!(f, "Key not found: {}", kid),
            Self::NoKeysAvailable => write!(f, "No keys available in cache"),
        }
    }
}

impl std::error::Error for JwksCacheError {}
