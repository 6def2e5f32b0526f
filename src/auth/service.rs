//! Entry points used by the HTTP layer and the CLI.

use std::sync::Arc;

use tracing::debug;

use crate::auth::error::AuthError;
use crate::auth::identity_store::IdentityStore;
use crate::auth::mutation::{AuthenticatedSession, SessionMutator, SessionUpdate, SessionUpdated};
use crate::auth::pipeline::{SignInPipeline, SignInReport, SignInRequest};
use crate::auth::promotion::{AdminPromotion, PromotionCandidate, PromotionHook, PromotionOutcome};
use crate::auth::provider::{ProviderCredentials, ProviderId, ProviderRegistry};
use crate::auth::resolver::CredentialResolver;
use crate::auth::session::SessionView;
use crate::auth::token::TokenIssuer;
use crate::config::AuthConfig;

/// Sign-in, session lookup and session mutation over one identity store.
pub struct AuthService<S> {
    config: Arc<AuthConfig>,
    store: Arc<S>,
    issuer: Arc<TokenIssuer>,
    pipeline: SignInPipeline<S>,
    mutator: SessionMutator<S>,
}

impl<S: IdentityStore> AuthService<S> {
    pub fn new(config: Arc<AuthConfig>, store: Arc<S>, providers: ProviderRegistry) -> Self {
        let issuer = Arc::new(TokenIssuer::new(&config));
        let pipeline = SignInPipeline::new(
            store.clone(),
            CredentialResolver::new(store.clone(), providers),
            AdminPromotion::new(config.admin_email.clone()),
            issuer.clone(),
        );
        let mutator = SessionMutator::new(issuer.clone(), store.clone());

        Self {
            config,
            store,
            issuer,
            pipeline,
            mutator,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    pub fn pipeline(&self) -> &SignInPipeline<S> {
        &self.pipeline
    }

    pub fn enabled_providers(&self) -> Vec<ProviderId> {
        self.pipeline.resolver().providers().enabled()
    }

    /// Sign in with `provider`.
    ///
    /// `current_token` is the caller's existing session token, if any. An
    /// invalid one is ignored.
    pub async fn sign_in(
        &self,
        provider: ProviderId,
        credentials: ProviderCredentials,
        current_token: Option<&str>,
    ) -> Result<SignInReport, AuthError> {
        let current = current_token.and_then(|token| {
            AuthenticatedSession::from_token(&self.issuer, token)
                .inspect_err(|e| debug!("Ignoring current session on sign-in: {}", e))
                .ok()
        });

        self.pipeline
            .sign_in(SignInRequest::new(provider, credentials).with_current(current))
            .await
    }

    /// Verify a session token.
    pub fn authenticate(&self, token: Option<&str>) -> Result<AuthenticatedSession, AuthError> {
        let token = token.ok_or(AuthError::Unauthenticated)?;
        AuthenticatedSession::from_token(&self.issuer, token)
    }

    /// The session view for a token, or `None` when there is no valid session.
    pub fn session(&self, token: Option<&str>) -> Option<SessionView> {
        self.authenticate(token).ok().map(|s| s.session())
    }

    /// Apply a session update for the holder of `token`.
    pub async fn update_session(
        &self,
        token: Option<&str>,
        update: SessionUpdate,
    ) -> Result<SessionUpdated, AuthError> {
        let session = self.authenticate(token)?;
        self.apply_update(session, update).await
    }

    /// Apply a session update for an already authenticated caller.
    pub async fn apply_update(
        &self,
        session: AuthenticatedSession,
        update: SessionUpdate,
    ) -> Result<SessionUpdated, AuthError> {
        self.mutator.update_session(session, update).await
    }

    /// Promote the identity holding the configured admin email, if it exists.
    pub async fn promote_admin(&self) -> PromotionOutcome {
        let promotion = self.pipeline.promotion();
        match promotion.admin_email() {
            Some(email) => {
                promotion
                    .ensure_promoted(
                        self.store.as_ref(),
                        PromotionCandidate::Email(email),
                        PromotionHook::Operator,
                    )
                    .await
            }
            None => PromotionOutcome::Disabled,
        }
    }
}
