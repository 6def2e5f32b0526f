//! Identity and session lifecycle.
//!
//! A visitor signs in either as a disposable guest or through an external
//! identity provider. Every sign-in runs the [`SignInPipeline`]:
//!
//! - **resolve**: provision a guest, or verify the provider credentials
//! - **promote**: apply the admin email rule (never fails the sign-in)
//! - **link**: find or create the identity behind a verified profile
//! - **issue**: sign a claims token for the identity
//! - **materialize**: project the claims into the [`SessionView`]
//!
//! Once issued, the claims live in the token. The [`SessionMutator`] can
//! rewrite `role`/`isGuest` for the holder of a valid token without another
//! sign-in.
//!
//! ## Usage
//!
//! ```ignore
//! let service = AuthService::new(config, store, ProviderRegistry::from_config(&config)?);
//!
//! let report = service
//!     .sign_in(ProviderId::Guest, ProviderCredentials::default(), None)
//!     .await?;
//! let session = service.session(Some(&report.token));
//! ```

pub mod error;
pub mod github;
pub mod guest;
pub mod identity;
pub mod identity_store;
pub mod jwks;
pub mod mutation;
pub mod oidc;
pub mod pipeline;
pub mod promotion;
pub mod provider;
pub mod resolver;
pub mod service;
pub mod session;
pub mod token;

#[cfg(test)]
mod integration_tests;

pub use error::{AuthError, AuthErrorKind, error_destination};
pub use guest::GuestProvisioner;
pub use identity::{Identity, Role};
pub use identity_store::{IdentityStore, SurrealIdentityStore};
pub use jwks::{DEFAULT_CACHE_TTL_SECONDS, JwksCache, JwksCacheError};
pub use mutation::{AuthenticatedSession, SessionMutator, SessionUpdate, SessionUpdated};
pub use pipeline::{SignInPipeline, SignInReport, SignInRequest};
pub use promotion::{AdminPromotion, PromotionCandidate, PromotionHook, PromotionOutcome};
pub use provider::{
    ProviderCredentials, ProviderId, ProviderRegistry, ProviderVerifier, VerifiedProfile,
};
pub use resolver::{CredentialResolver, LinkedIdentity};
pub use service::AuthService;
pub use session::{SessionUser, SessionView, materialize};
pub use token::{Claims, TokenIssuer};
