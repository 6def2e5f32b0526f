//! Credential resolution.
//!
//! Turns a sign-in attempt into an [`Identity`]: guests are provisioned,
//! external providers are verified by their [`ProviderVerifier`] and the
//! returned profile is linked to a stored identity.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::auth::error::AuthError;
use crate::auth::guest::GuestProvisioner;
use crate::auth::identity::{Identity, Role};
use crate::auth::identity_store::IdentityStore;
use crate::auth::provider::{ProviderCredentials, ProviderId, ProviderRegistry, VerifiedProfile};
use crate::db::schema::{AuditAction, AuditLogCreate, IdentityCreate};
use crate::types::IdentityId;

/// A stored identity matched to a verified profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedIdentity {
    pub identity: Identity,
    /// Created by this sign-in
    pub is_new: bool,
}

pub struct CredentialResolver<S> {
    store: Arc<S>,
    guests: GuestProvisioner<S>,
    providers: ProviderRegistry,
}

impl<S: IdentityStore> CredentialResolver<S> {
    pub fn new(store: Arc<S>, providers: ProviderRegistry) -> Self {
        Self {
            guests: GuestProvisioner::new(store.clone()),
            store,
            providers,
        }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Resolve a sign-in attempt to an identity.
    pub async fn authenticate(
        &self,
        provider: ProviderId,
        credentials: &ProviderCredentials,
    ) -> Result<LinkedIdentity, AuthError> {
        if provider.is_guest() {
            let identity = self.guests.create_guest().await?;
            return Ok(LinkedIdentity {
                identity,
                is_new: true,
            });
        }

        let profile = self.verify(provider, credentials).await?;
        self.link(provider, &profile).await
    }

    /// Create a fresh guest identity.
    pub async fn create_guest(&self) -> Result<Identity, AuthError> {
        Ok(self.guests.create_guest().await?)
    }

    /// Check credentials with the provider's verifier.
    pub async fn verify(
        &self,
        provider: ProviderId,
        credentials: &ProviderCredentials,
    ) -> Result<VerifiedProfile, AuthError> {
        let verifier = self
            .providers
            .get(provider)
            .ok_or_else(|| AuthError::ProviderNotConfigured(provider.to_string()))?;

        let profile = verifier.verify(credentials).await?;
        debug!(provider = %provider, account = %profile.provider_account_id, "Provider credentials verified");
        Ok(profile)
    }

    /// Find or create the identity for a verified profile.
    ///
    /// Lookup order: provider account link, then a non-guest identity with
    /// the same email (which gets the link added), then a new identity.
    pub async fn link(
        &self,
        provider: ProviderId,
        profile: &VerifiedProfile,
    ) -> Result<LinkedIdentity, AuthError> {
        let provider_name = provider.as_str();

        if let Some(identity) = self
            .store
            .find_by_account(provider_name, &profile.provider_account_id)
            .await?
        {
            return Ok(LinkedIdentity {
                identity,
                is_new: false,
            });
        }

        if let Some(identity) = self.store.find_by_email(&profile.email).await? {
            if let Err(e) = self
                .store
                .link_account(&identity.id, provider_name, &profile.provider_account_id)
                .await
            {
                return self.adopt_winner(provider_name, profile, e).await;
            }
            info!(identity_id = %identity.id, provider = provider_name, "Linked provider account to existing identity");
            self.audit(&identity.id, AuditAction::AccountLinked, provider, profile)
                .await;
            return Ok(LinkedIdentity {
                identity,
                is_new: false,
            });
        }

        let identity = self
            .store
            .create_identity(IdentityCreate {
                identity_id: IdentityId::new_member().into_inner(),
                name: profile.name.clone(),
                email: Some(profile.email.clone()),
                image: profile.image.clone(),
                role: Role::User.as_str().to_string(),
                is_guest: false,
            })
            .await?;

        if let Err(e) = self
            .store
            .link_account(&identity.id, provider_name, &profile.provider_account_id)
            .await
        {
            return self.undo_create(identity, provider_name, profile, e).await;
        }

        info!(identity_id = %identity.id, provider = provider_name, "Created identity");
        self.audit(&identity.id, AuditAction::IdentityCreated, provider, profile)
            .await;

        Ok(LinkedIdentity {
            identity,
            is_new: true,
        })
    }

    /// The account link write failed, most likely because a concurrent
    /// sign-in of the same account linked it first. Resolve to that identity.
    async fn adopt_winner(
        &self,
        provider_name: &str,
        profile: &VerifiedProfile,
        error: anyhow::Error,
    ) -> Result<LinkedIdentity, AuthError> {
        match self
            .store
            .find_by_account(provider_name, &profile.provider_account_id)
            .await?
        {
            Some(identity) => {
                debug!(identity_id = %identity.id, provider = provider_name, "Account linked concurrently; using that identity");
                Ok(LinkedIdentity {
                    identity,
                    is_new: false,
                })
            }
            None => Err(error.into()),
        }
    }

    /// Linking a just-created identity failed. Unless the account ended up
    /// linked to it anyway, delete it so no unlinked duplicate-email
    /// identity is left behind.
    async fn undo_create(
        &self,
        created: Identity,
        provider_name: &str,
        profile: &VerifiedProfile,
        error: anyhow::Error,
    ) -> Result<LinkedIdentity, AuthError> {
        let linked = self
            .store
            .find_by_account(provider_name, &profile.provider_account_id)
            .await?;

        if let Some(identity) = &linked
            && identity.id == created.id
        {
            return Ok(LinkedIdentity {
                identity: created,
                is_new: true,
            });
        }

        if let Err(e) = self.store.delete_identity(&created.id).await {
            warn!(identity_id = %created.id, "Failed to remove unlinked identity: {}", e);
        }

        match linked {
            Some(identity) => {
                debug!(identity_id = %identity.id, provider = provider_name, "Account linked concurrently; using that identity");
                Ok(LinkedIdentity {
                    identity,
                    is_new: false,
                })
            }
            None => Err(error.into()),
        }
    }

    async fn audit(
        &self,
        identity_id: &IdentityId,
        action: AuditAction,
        provider: ProviderId,
        profile: &VerifiedProfile,
    ) {
        let entry = AuditLogCreate::for_identity(
            identity_id.as_str(),
            action,
            serde_json::json!({
                "provider": provider.as_str(),
                "provider_account_id": profile.provider_account_id.as_str(),
            }),
        );
        if let Err(e) = self.store.audit_log(entry).await {
            warn!(identity_id = %identity_id, "Failed to write audit entry: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity_store::SurrealIdentityStore;
    use crate::auth::provider::{ProviderVerifier, VerifyFuture};
    use crate::db::{DatabaseConfig, create_connection, ensure_schema};
    use crate::types::ProviderAccountId;

    struct FixedVerifier(VerifiedProfile);

    impl ProviderVerifier for FixedVerifier {
        fn verify<'a>(&'a self, _credentials: &'a ProviderCredentials) -> VerifyFuture<'a> {
            Box::pin(async move { Ok(self.0.clone()) })
        }
    }

    struct RejectingVerifier;

    impl ProviderVerifier for RejectingVerifier {
        fn verify<'a>(&'a self, _credentials: &'a ProviderCredentials) -> VerifyFuture<'a> {
            Box::pin(async { Err(AuthError::InvalidCredentials("bad token".to_string())) })
        }
    }

    fn profile(account: &str, email: &str) -> VerifiedProfile {
        VerifiedProfile {
            provider_account_id: ProviderAccountId::new(account),
            email: email.to_string(),
            name: Some("Ada".to_string()),
            image: None,
        }
    }

    async fn setup(registry: ProviderRegistry) -> (CredentialResolver<SurrealIdentityStore>, Arc<SurrealIdentityStore>) {
        let config = DatabaseConfig {
            url: "memory".to_string(),
            ..Default::default()
        };
        let db = create_connection(config).await.unwrap();
        ensure_schema(&db).await.unwrap();
        let store = Arc::new(SurrealIdentityStore::new(db));
        (CredentialResolver::new(store.clone(), registry), store)
    }

    #[tokio::test]
    async fn test_guest_ignores_credentials() {
        let (resolver, _) = setup(ProviderRegistry::new()).await;
        let credentials = ProviderCredentials {
            id_token: Some("ignored".to_string()),
            access_token: None,
        };

        let linked = resolver
            .authenticate(ProviderId::Guest, &credentials)
            .await
            .unwrap();

        assert!(linked.is_new);
        assert!(linked.identity.is_guest);
        assert_eq!(linked.identity.role, Role::User);
    }

    #[tokio::test]
    async fn test_unconfigured_provider() {
        let (resolver, _) = setup(ProviderRegistry::new()).await;
        let result = resolver
            .authenticate(ProviderId::Google, &ProviderCredentials::default())
            .await;
        assert!(matches!(result, Err(AuthError::ProviderNotConfigured(_))));
    }

    #[tokio::test]
    async fn test_rejected_credentials_create_nothing() {
        let registry =
            ProviderRegistry::new().register(ProviderId::Github, Arc::new(RejectingVerifier));
        let (resolver, store) = setup(registry).await;

        let result = resolver
            .authenticate(ProviderId::Github, &ProviderCredentials::default())
            .await;

        assert!(matches!(result, Err(AuthError::InvalidCredentials(_))));
        assert_eq!(store.count_identities().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_returning_account_resolves_same_identity() {
        let registry = ProviderRegistry::new().register(
            ProviderId::Google,
            Arc::new(FixedVerifier(profile("g-1", "ada@example.com"))),
        );
        let (resolver, store) = setup(registry).await;
        let creds = ProviderCredentials::default();

        let first = resolver.authenticate(ProviderId::Google, &creds).await.unwrap();
        let second = resolver.authenticate(ProviderId::Google, &creds).await.unwrap();

        assert!(first.is_new);
        assert!(!second.is_new);
        assert_eq!(first.identity.id, second.identity.id);
        assert!(!first.identity.is_guest);
        assert_eq!(first.identity.email.as_deref(), Some("ada@example.com"));
        assert_eq!(store.count_identities().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_links_share_one_identity() {
        let (resolver, store) = setup(ProviderRegistry::new()).await;
        let ada = profile("g-1", "ada@example.com");

        let (a, b, c) = tokio::join!(
            resolver.link(ProviderId::Google, &ada),
            resolver.link(ProviderId::Google, &ada),
            resolver.link(ProviderId::Google, &ada),
        );
        let linked = [a.unwrap(), b.unwrap(), c.unwrap()];

        assert!(linked.iter().all(|l| l.identity.id == linked[0].identity.id));
        assert!(linked.iter().filter(|l| l.is_new).count() <= 1);
        assert_eq!(store.count_identities().await.unwrap(), 1);

        let found = store.find_by_email("ada@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, linked[0].identity.id);
    }

    #[tokio::test]
    async fn test_second_provider_links_by_email() {
        let (resolver, store) = setup(ProviderRegistry::new()).await;

        let google = resolver
            .link(ProviderId::Google, &profile("g-1", "ada@example.com"))
            .await
            .unwrap();
        let github = resolver
            .link(ProviderId::Github, &profile("42", "ada@example.com"))
            .await
            .unwrap();

        assert!(!github.is_new);
        assert_eq!(github.identity.id, google.identity.id);

        let by_account = store
            .find_by_account("github", &ProviderAccountId::new("42"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_account.id, google.identity.id);

        let logs = store
            .get_audit_log(google.identity.id.as_str(), 10)
            .await
            .unwrap();
        assert!(logs.iter().any(|l| l.action == "account_linked"));
        assert!(logs.iter().any(|l| l.action == "identity_created"));
    }
}
