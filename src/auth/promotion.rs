//! Admin promotion rule.
//!
//! An identity whose verified email equals the configured admin email is
//! promoted to [`Role::Admin`]. The rule runs from two hook points in the
//! sign-in pipeline: the sign-in stage (before the provider account is
//! linked, so the identity may not exist yet; it is looked up by provider
//! account first, then by email) and the identity-created stage
//! (only on an identity's first sign-in). Both hooks, and the operator
//! command, call [`AdminPromotion::ensure_promoted`], which is idempotent and
//! never fails the sign-in: write failures come back as a
//! [`PromotionOutcome`] instead of an error, and are not retried.

use serde::Serialize;
use tracing::{info, warn};

use crate::auth::identity::{Identity, Role};
use crate::auth::identity_store::IdentityStore;
use crate::db::schema::{AuditAction, AuditLogCreate};
use crate::types::{IdentityId, ProviderAccountId};

/// Where in the pipeline a promotion attempt was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionHook {
    SignIn,
    IdentityCreated,
    /// Run by an operator outside any sign-in
    Operator,
}

impl PromotionHook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SignIn => "sign_in",
            Self::IdentityCreated => "identity_created",
            Self::Operator => "operator",
        }
    }
}

/// What a promotion attempt found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum PromotionOutcome {
    /// No admin email is configured
    Disabled,
    /// Guest, no email, or email does not match
    NotEligible,
    /// The identity already holds the ADMIN role
    AlreadyAdmin,
    /// The ADMIN role was written
    Promoted(IdentityId),
    /// The email matches but no identity exists yet
    IdentityMissing,
    /// The email matches but the store read or write failed
    WriteFailed(String),
}

impl PromotionOutcome {
    /// Whether the identity is known to hold ADMIN after this attempt.
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::AlreadyAdmin | Self::Promoted(_))
    }

    /// Whether the email matched but the role could not be applied.
    pub fn is_soft_failure(&self) -> bool {
        matches!(self, Self::IdentityMissing | Self::WriteFailed(_))
    }
}

/// Who to promote: an identity already loaded, or whatever identity the
/// store holds for a verified email.
#[derive(Debug, Clone, Copy)]
pub enum PromotionCandidate<'a> {
    Identity(&'a Identity),
    Email(&'a str),
    /// A provider vouched for `email` on this account. The identity already
    /// linked to the account is preferred over an email match, since its
    /// stored email may predate the verified one.
    Account {
        provider: &'a str,
        account: &'a ProviderAccountId,
        email: &'a str,
    },
}

/// The promotion rule, configured with at most one admin email.
#[derive(Debug, Clone, Default)]
pub struct AdminPromotion {
    admin_email: Option<String>,
}

impl AdminPromotion {
    pub fn new(admin_email: Option<String>) -> Self {
        Self { admin_email }
    }

    pub fn admin_email(&self) -> Option<&str> {
        self.admin_email.as_deref()
    }

    /// Whether `email` is the configured admin email.
    pub fn matches(&self, email: &str) -> bool {
        self.admin_email.as_deref() == Some(email)
    }

    /// Make sure an eligible identity holds the ADMIN role.
    pub async fn ensure_promoted<S: IdentityStore>(
        &self,
        store: &S,
        candidate: PromotionCandidate<'_>,
        hook: PromotionHook,
    ) -> PromotionOutcome {
        if self.admin_email.is_none() {
            return PromotionOutcome::Disabled;
        }

        let email = match candidate {
            PromotionCandidate::Identity(identity) if identity.is_guest => None,
            PromotionCandidate::Identity(identity) => identity.email.as_deref(),
            PromotionCandidate::Email(email) => Some(email),
            PromotionCandidate::Account { email, .. } => Some(email),
        };
        let Some(email) = email.filter(|e| self.matches(e)) else {
            return PromotionOutcome::NotEligible;
        };

        let identity = match candidate {
            PromotionCandidate::Identity(identity) => identity.clone(),
            PromotionCandidate::Email(email) => match store.find_by_email(email).await {
                Ok(Some(identity)) => identity,
                Ok(None) => {
                    info!(hook = hook.as_str(), "Admin email has no identity yet; promotion deferred");
                    return PromotionOutcome::IdentityMissing;
                }
                Err(e) => return self.write_failed(store, None, hook, e.to_string()).await,
            },
            PromotionCandidate::Account {
                provider,
                account,
                email,
            } => match self.find_linked(store, provider, account, email).await {
                Ok(Some(identity)) if identity.is_guest => return PromotionOutcome::NotEligible,
                Ok(Some(identity)) => identity,
                Ok(None) => {
                    info!(hook = hook.as_str(), "Admin email has no identity yet; promotion deferred");
                    return PromotionOutcome::IdentityMissing;
                }
                Err(e) => return self.write_failed(store, None, hook, e.to_string()).await,
            },
        };

        if identity.role == Role::Admin {
            return PromotionOutcome::AlreadyAdmin;
        }

        match store.set_role(&identity.id, Role::Admin).await {
            Ok(Some(_)) => {
                info!(identity_id = %identity.id, hook = hook.as_str(), "Promoted identity to ADMIN");
                let entry = AuditLogCreate::for_identity(
                    identity.id.as_str(),
                    AuditAction::AdminPromoted,
                    serde_json::json!({ "hook": hook.as_str(), "email": email }),
                );
                if let Err(e) = store.audit_log(entry).await {
                    warn!(identity_id = %identity.id, "Failed to audit promotion: {}", e);
                }
                PromotionOutcome::Promoted(identity.id)
            }
            Ok(None) => {
                info!(identity_id = %identity.id, hook = hook.as_str(), "Identity vanished before promotion");
                PromotionOutcome::IdentityMissing
            }
            Err(e) => {
                self.write_failed(store, Some(&identity.id), hook, e.to_string())
                    .await
            }
        }
    }

    async fn find_linked<S: IdentityStore>(
        &self,
        store: &S,
        provider: &str,
        account: &ProviderAccountId,
        email: &str,
    ) -> anyhow::Result<Option<Identity>> {
        if let Some(identity) = store.find_by_account(provider, account).await? {
            return Ok(Some(identity));
        }
        store.find_by_email(email).await
    }

    async fn write_failed<S: IdentityStore>(
        &self,
        store: &S,
        identity_id: Option<&IdentityId>,
        hook: PromotionHook,
        reason: String,
    ) -> PromotionOutcome {
        warn!(
            identity_id = identity_id.map(|id| id.as_str()),
            hook = hook.as_str(),
            "Admin promotion failed: {}",
            reason
        );

        let entry = AuditLogCreate {
            user_id: identity_id.map(|id| id.to_string()),
            action: AuditAction::PromotionFailed.as_str().to_string(),
            resource_type: "identity".to_string(),
            resource_id: identity_id.map(|id| id.to_string()),
            details: Some(serde_json::json!({ "hook": hook.as_str(), "reason": reason })),
        };
        if let Err(e) = store.audit_log(entry).await {
            warn!("Failed to audit promotion failure: {}", e);
        }

        PromotionOutcome::WriteFailed(reason)
    }
}
