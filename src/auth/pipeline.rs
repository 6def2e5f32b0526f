//! The sign-in pipeline.
//!
//! A sign-in runs through named stages, each usable on its own:
//!
//! ```text
//! resolve -> promote (sign-in hook) -> link -> promote (identity-created hook) -> issue -> materialize
//! ```
//!
//! Promotion never fails a sign-in. Its outcomes are collected in the
//! [`SignInReport`] so callers and tests can see when the admin role could
//! not be applied.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::auth::error::AuthError;
use crate::auth::identity::{Identity, Role};
use crate::auth::identity_store::IdentityStore;
use crate::auth::mutation::AuthenticatedSession;
use crate::auth::promotion::{AdminPromotion, PromotionCandidate, PromotionHook, PromotionOutcome};
use crate::auth::provider::{ProviderCredentials, ProviderId, VerifiedProfile};
use crate::auth::resolver::{CredentialResolver, LinkedIdentity};
use crate::auth::session::{SessionView, materialize};
use crate::auth::token::{Claims, TokenIssuer};
use crate::db::schema::{AuditAction, AuditLogCreate};

/// One sign-in attempt.
#[derive(Debug, Clone)]
pub struct SignInRequest {
    pub provider: ProviderId,
    pub credentials: ProviderCredentials,
    /// The caller's current session, if it presented a valid token
    pub current: Option<AuthenticatedSession>,
}

impl SignInRequest {
    pub fn new(provider: ProviderId, credentials: ProviderCredentials) -> Self {
        Self {
            provider,
            credentials,
            current: None,
        }
    }

    pub fn with_current(mut self, current: Option<AuthenticatedSession>) -> Self {
        self.current = current;
        self
    }
}

/// What the resolve stage produced.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Guest sign-in on top of a full session: that session is kept
    Existing(AuthenticatedSession),
    /// A freshly provisioned guest
    Guest(Identity),
    /// A provider vouched for this profile
    Verified(VerifiedProfile),
}

/// Everything a sign-in did.
#[derive(Debug, Clone, Serialize)]
pub struct SignInReport {
    pub provider: ProviderId,
    pub identity_id: String,
    #[serde(skip)]
    pub claims: Claims,
    pub token: String,
    pub session: SessionView,
    pub is_new_identity: bool,
    pub reused_session: bool,
    pub promotions: Vec<(PromotionHook, PromotionOutcome)>,
}

impl SignInReport {
    /// Promotion attempts where the email matched but the role was not applied.
    pub fn promotion_failures(&self) -> impl Iterator<Item = &PromotionOutcome> {
        self.promotions
            .iter()
            .map(|(_, outcome)| outcome)
            .filter(|outcome| outcome.is_soft_failure())
    }
}

pub struct SignInPipeline<S> {
    store: Arc<S>,
    resolver: CredentialResolver<S>,
    promotion: AdminPromotion,
    issuer: Arc<TokenIssuer>,
}

impl<S: IdentityStore> SignInPipeline<S> {
    pub fn new(
        store: Arc<S>,
        resolver: CredentialResolver<S>,
        promotion: AdminPromotion,
        issuer: Arc<TokenIssuer>,
    ) -> Self {
        Self {
            store,
            resolver,
            promotion,
            issuer,
        }
    }

    pub fn resolver(&self) -> &CredentialResolver<S> {
        &self.resolver
    }

    pub fn promotion(&self) -> &AdminPromotion {
        &self.promotion
    }

    /// Run every stage for one sign-in attempt.
    pub async fn sign_in(&self, request: SignInRequest) -> Result<SignInReport, AuthError> {
        let provider = request.provider;
        let mut promotions = Vec::new();

        let (claims, is_new_identity, reused_session) = match self.resolve(&request).await? {
            Resolution::Existing(session) => {
                debug!(identity_id = %session.claims().id, "Guest sign-in with an active session; keeping it");
                (session.claims().clone(), false, true)
            }
            Resolution::Guest(guest) => (self.issuer.issue(&guest), true, false),
            Resolution::Verified(profile) => {
                let candidate = PromotionCandidate::Account {
                    provider: provider.as_str(),
                    account: &profile.provider_account_id,
                    email: &profile.email,
                };
                promotions.push((
                    PromotionHook::SignIn,
                    self.promote(candidate, PromotionHook::SignIn).await,
                ));

                let LinkedIdentity {
                    mut identity,
                    is_new,
                } = self.link(provider, &profile).await?;

                if is_new {
                    let outcome = self.on_identity_created(&mut identity).await;
                    promotions.push((PromotionHook::IdentityCreated, outcome));
                }

                (self.issuer.issue(&identity), is_new, false)
            }
        };

        let token = self.issuer.encode(&claims)?;
        let session = materialize(&claims);

        if !reused_session {
            info!(
                identity_id = %claims.id,
                provider = %provider,
                role = %claims.role,
                is_guest = claims.is_guest,
                is_new = is_new_identity,
                "Signed in"
            );
            self.audit_sign_in(provider, &claims, is_new_identity).await;
        }

        Ok(SignInReport {
            provider,
            identity_id: claims.id.to_string(),
            claims,
            token,
            session,
            is_new_identity,
            reused_session,
            promotions,
        })
    }

    /// Resolve stage: provision a guest, keep the current session, or verify
    /// the provider credentials.
    pub async fn resolve(&self, request: &SignInRequest) -> Result<Resolution, AuthError> {
        if request.provider.is_guest() {
            // A guest sign-in never replaces a full session.
            if let Some(current) = &request.current
                && !current.claims().is_guest
            {
                return Ok(Resolution::Existing(current.clone()));
            }
            return Ok(Resolution::Guest(self.resolver.create_guest().await?));
        }

        let profile = self
            .resolver
            .verify(request.provider, &request.credentials)
            .await?;
        Ok(Resolution::Verified(profile))
    }

    /// Promote stage, run with the verified email before linking.
    pub async fn promote(
        &self,
        candidate: PromotionCandidate<'_>,
        hook: PromotionHook,
    ) -> PromotionOutcome {
        self.promotion
            .ensure_promoted(self.store.as_ref(), candidate, hook)
            .await
    }

    /// Link stage.
    pub async fn link(
        &self,
        provider: ProviderId,
        profile: &VerifiedProfile,
    ) -> Result<LinkedIdentity, AuthError> {
        self.resolver.link(provider, profile).await
    }

    /// Identity-created hook: promote a brand-new identity and reflect the
    /// result in the in-memory copy that is about to be issued.
    pub async fn on_identity_created(&self, identity: &mut Identity) -> PromotionOutcome {
        let outcome = self
            .promote(PromotionCandidate::Identity(&*identity), PromotionHook::IdentityCreated)
            .await;
        if outcome.is_admin() {
            identity.role = Role::Admin;
        }
        outcome
    }

    async fn audit_sign_in(&self, provider: ProviderId, claims: &Claims, is_new: bool) {
        let entry = AuditLogCreate::for_identity(
            claims.id.as_str(),
            AuditAction::SignIn,
            serde_json::json!({
                "provider": provider.as_str(),
                "role": claims.role,
                "is_guest": claims.is_guest,
                "is_new": is_new,
            }),
        );
        if let Err(e) = self.store.audit_log(entry).await {
            warn!(identity_id = %claims.id, "Failed to audit sign-in: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity_store::SurrealIdentityStore;
    use crate::auth::provider::{ProviderRegistry, ProviderVerifier, VerifyFuture};
    use crate::config::AuthConfig;
    use crate::db::{DatabaseConfig, create_connection, ensure_schema};
    use crate::types::ProviderAccountId;

    struct FixedVerifier(VerifiedProfile);

    impl ProviderVerifier for FixedVerifier {
        fn verify<'a>(&'a self, _credentials: &'a ProviderCredentials) -> VerifyFuture<'a> {
            Box::pin(async move { Ok(self.0.clone()) })
        }
    }

    async fn pipeline(admin_email: Option<&str>, email: &str) -> SignInPipeline<SurrealIdentityStore> {
        let config = DatabaseConfig {
            url: "memory".to_string(),
            ..Default::default()
        };
        let db = create_connection(config).await.unwrap();
        ensure_schema(&db).await.unwrap();
        let store = Arc::new(SurrealIdentityStore::new(db));

        let registry = ProviderRegistry::new().register(
            ProviderId::Google,
            Arc::new(FixedVerifier(VerifiedProfile {
                provider_account_id: ProviderAccountId::new("g-1"),
                email: email.to_string(),
                name: Some("Ada".to_string()),
                image: None,
            })),
        );

        SignInPipeline::new(
            store.clone(),
            CredentialResolver::new(store, registry),
            AdminPromotion::new(admin_email.map(str::to_string)),
            Arc::new(TokenIssuer::new(&AuthConfig::new("test-secret"))),
        )
    }

    #[tokio::test]
    async fn test_resolve_guest_without_session() {
        let pipeline = pipeline(None, "ada@example.com").await;
        let request = SignInRequest::new(ProviderId::Guest, ProviderCredentials::default());

        let resolution = pipeline.resolve(&request).await.unwrap();
        assert!(matches!(resolution, Resolution::Guest(ref g) if g.is_guest));
    }

    #[tokio::test]
    async fn test_first_sign_in_reports_both_hooks() {
        let pipeline = pipeline(Some("ada@example.com"), "ada@example.com").await;
        let request = SignInRequest::new(ProviderId::Google, ProviderCredentials::default());

        let report = pipeline.sign_in(request).await.unwrap();

        assert!(report.is_new_identity);
        assert_eq!(
            report.promotions,
            vec![
                (PromotionHook::SignIn, PromotionOutcome::IdentityMissing),
                (
                    PromotionHook::IdentityCreated,
                    PromotionOutcome::Promoted(report.claims.id.clone())
                ),
            ]
        );
        assert_eq!(report.session.user.role, Role::Admin);
        assert_eq!(report.promotion_failures().count(), 1);
    }

    #[tokio::test]
    async fn test_repeat_sign_in_runs_only_sign_in_hook() {
        let pipeline = pipeline(Some("ada@example.com"), "ada@example.com").await;

        pipeline
            .sign_in(SignInRequest::new(ProviderId::Google, ProviderCredentials::default()))
            .await
            .unwrap();
        let report = pipeline
            .sign_in(SignInRequest::new(ProviderId::Google, ProviderCredentials::default()))
            .await
            .unwrap();

        assert!(!report.is_new_identity);
        assert_eq!(
            report.promotions,
            vec![(PromotionHook::SignIn, PromotionOutcome::AlreadyAdmin)]
        );
        assert_eq!(report.claims.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_sign_in_hook_finds_identity_by_account() {
        let pipeline = pipeline(Some("ada@example.com"), "ada@example.com").await;
        let profile = VerifiedProfile {
            provider_account_id: ProviderAccountId::new("g-1"),
            email: "ada.old@example.com".to_string(),
            name: None,
            image: None,
        };
        // Linked earlier under a different email.
        let LinkedIdentity { identity, .. } =
            pipeline.link(ProviderId::Google, &profile).await.unwrap();

        let report = pipeline
            .sign_in(SignInRequest::new(ProviderId::Google, ProviderCredentials::default()))
            .await
            .unwrap();

        assert!(!report.is_new_identity);
        assert_eq!(report.claims.id, identity.id);
        assert_eq!(
            report.promotions,
            vec![(PromotionHook::SignIn, PromotionOutcome::Promoted(identity.id.clone()))]
        );
        assert_eq!(report.claims.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_on_identity_created_updates_role_in_memory() {
        let pipeline = pipeline(Some("ada@example.com"), "ada@example.com").await;
        let profile = VerifiedProfile {
            provider_account_id: ProviderAccountId::new("g-9"),
            email: "ada@example.com".to_string(),
            name: None,
            image: None,
        };

        let LinkedIdentity { mut identity, .. } =
            pipeline.link(ProviderId::Google, &profile).await.unwrap();
        assert_eq!(identity.role, Role::User);

        let outcome = pipeline.on_identity_created(&mut identity).await;
        assert!(outcome.is_admin());
        assert_eq!(identity.role, Role::Admin);
    }
}
