//! GitHub access token verification.
//!
//! GitHub is not an OIDC provider: the access token obtained by the client
//! is checked by calling the REST API as that user.

use serde::Deserialize;
use tracing::debug;

use crate::auth::error::AuthError;
use crate::auth::provider::{ProviderCredentials, ProviderVerifier, VerifiedProfile, VerifyFuture};
use crate::types::ProviderAccountId;

#[derive(Debug, Deserialize)]
pub struct GithubUser {
    pub id: u64,
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GithubEmail {
    pub email: String,
    pub primary: bool,
    pub verified: bool,
}

/// Pick the address to sign in with: the primary verified email, else any
/// verified one.
pub fn select_email(emails: &[GithubEmail]) -> Option<String> {
    emails
        .iter()
        .find(|e| e.primary && e.verified)
        .or_else(|| emails.iter().find(|e| e.verified))
        .map(|e| e.email.clone())
}

pub struct GithubVerifier {
    api_base_url: String,
    client: reqwest::Client,
}

impl GithubVerifier {
    pub fn new(api_base_url: &str, client: reqwest::Client) -> Self {
        Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        access_token: &str,
    ) -> Result<T, AuthError> {
        let response = self
            .client
            .get(format!("{}{}", self.api_base_url, path))
            .bearer_auth(access_token)
            .header(http::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| AuthError::InvalidCredentials(format!("GitHub request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AuthError::InvalidCredentials(
                "GitHub rejected the access token".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(AuthError::InvalidCredentials(format!(
                "HTTP {} from GitHub {}",
                status, path
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::InvalidCredentials(format!("Invalid GitHub response: {}", e)))
    }

    async fn verify_access_token(&self, access_token: &str) -> Result<VerifiedProfile, AuthError> {
        let user: GithubUser = self.get("/user", access_token).await?;

        // The public profile email is optional; fall back to the verified list.
        let email = match user.email.clone() {
            Some(email) => Some(email),
            None => {
                let emails: Vec<GithubEmail> = self.get("/user/emails", access_token).await?;
                select_email(&emails)
            }
        }
        .ok_or_else(|| {
            AuthError::AccessDenied("GitHub account has no verified email".to_string())
        })?;

        debug!(login = %user.login, "GitHub access token verified");

        Ok(VerifiedProfile {
            provider_account_id: ProviderAccountId::new(user.id.to_string()),
            email,
            name: user.name.or(Some(user.login)),
            image: user.avatar_url,
        })
    }
}

impl ProviderVerifier for GithubVerifier {
    fn verify<'a>(&'a self, credentials: &'a ProviderCredentials) -> VerifyFuture<'a> {
        Box::pin(async move {
            let token = credentials.access_token.as_deref().ok_or_else(|| {
                AuthError::InvalidCredentials("github sign-in requires an access_token".to_string())
            })?;
            self.verify_access_token(token).await
        })
    }
}
