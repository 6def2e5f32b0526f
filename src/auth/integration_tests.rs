//! End-to-end sign-in and session scenarios against an in-memory store.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;

use crate::auth::identity::{Identity, Role};
use crate::auth::identity_store::{IdentityStore, SurrealIdentityStore};
use crate::auth::mutation::SessionUpdate;
use crate::auth::promotion::{PromotionHook, PromotionOutcome};
use crate::auth::provider::{
    ProviderCredentials, ProviderId, ProviderRegistry, ProviderVerifier, VerifiedProfile,
    VerifyFuture,
};
use crate::auth::service::AuthService;
use crate::auth::session::materialize;
use crate::config::AuthConfig;
use crate::db::schema::{AuditLogCreate, IdentityCreate};
use crate::db::{DatabaseConfig, create_connection, ensure_schema};
use crate::types::{GUEST_ID_PREFIX, IdentityId, ProviderAccountId};

const ADMIN: &str = "owner@example.com";

struct StaticVerifier(VerifiedProfile);

impl ProviderVerifier for StaticVerifier {
    fn verify<'a>(&'a self, _credentials: &'a ProviderCredentials) -> VerifyFuture<'a> {
        Box::pin(async move { Ok(self.0.clone()) })
    }
}

/// Delegates to SurrealDB but rejects every role write.
struct RoleWritesFail {
    inner: SurrealIdentityStore,
}

impl IdentityStore for RoleWritesFail {
    async fn create_identity(&self, create: IdentityCreate) -> Result<Identity> {
        self.inner.create_identity(create).await
    }

    async fn get_identity(&self, id: &IdentityId) -> Result<Option<Identity>> {
        self.inner.get_identity(id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>> {
        self.inner.find_by_email(email).await
    }

    async fn find_by_account(
        &self,
        provider: &str,
        account: &ProviderAccountId,
    ) -> Result<Option<Identity>> {
        self.inner.find_by_account(provider, account).await
    }

    async fn link_account(
        &self,
        identity_id: &IdentityId,
        provider: &str,
        account: &ProviderAccountId,
    ) -> Result<()> {
        self.inner.link_account(identity_id, provider, account).await
    }

    async fn delete_identity(&self, id: &IdentityId) -> Result<()> {
        self.inner.delete_identity(id).await
    }

    async fn set_role(&self, _id: &IdentityId, _role: Role) -> Result<Option<Identity>> {
        anyhow::bail!("transaction conflict")
    }

    async fn audit_log(&self, entry: AuditLogCreate) -> Result<()> {
        self.inner.audit_log(entry).await
    }
}

/// Delegates to SurrealDB but misses the first account lookup, as a sign-in
/// racing a concurrent first sign-in of the same account would.
struct LateAccountLink {
    inner: SurrealIdentityStore,
    missed: AtomicBool,
}

impl IdentityStore for LateAccountLink {
    async fn create_identity(&self, create: IdentityCreate) -> Result<Identity> {
        self.inner.create_identity(create).await
    }

    async fn get_identity(&self, id: &IdentityId) -> Result<Option<Identity>> {
        self.inner.get_identity(id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>> {
        self.inner.find_by_email(email).await
    }

    async fn find_by_account(
        &self,
        provider: &str,
        account: &ProviderAccountId,
    ) -> Result<Option<Identity>> {
        if !self.missed.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_by_account(provider, account).await
    }

    async fn link_account(
        &self,
        identity_id: &IdentityId,
        provider: &str,
        account: &ProviderAccountId,
    ) -> Result<()> {
        self.inner.link_account(identity_id, provider, account).await
    }

    async fn delete_identity(&self, id: &IdentityId) -> Result<()> {
        self.inner.delete_identity(id).await
    }

    async fn set_role(&self, id: &IdentityId, role: Role) -> Result<Option<Identity>> {
        self.inner.set_role(id, role).await
    }

    async fn audit_log(&self, entry: AuditLogCreate) -> Result<()> {
        self.inner.audit_log(entry).await
    }
}

async fn memory_store() -> SurrealIdentityStore {
    let config = DatabaseConfig {
        url: "memory".to_string(),
        ..Default::default()
    };
    let db = create_connection(config).await.unwrap();
    ensure_schema(&db).await.unwrap();
    SurrealIdentityStore::new(db)
}

fn google_profile(account: &str, email: &str) -> VerifiedProfile {
    VerifiedProfile {
        provider_account_id: ProviderAccountId::new(account),
        email: email.to_string(),
        name: Some("Ada Lovelace".to_string()),
        image: Some("https://example.com/ada.png".to_string()),
    }
}

fn service_with<S: IdentityStore>(
    store: Arc<S>,
    admin_email: Option<&str>,
    profile: VerifiedProfile,
) -> AuthService<S> {
    let mut config = AuthConfig::new("integration-secret");
    config.admin_email = admin_email.map(str::to_string);

    let providers =
        ProviderRegistry::new().register(ProviderId::Google, Arc::new(StaticVerifier(profile)));
    AuthService::new(Arc::new(config), store, providers)
}

async fn google_sign_in<S: IdentityStore>(service: &AuthService<S>) -> crate::auth::SignInReport {
    service
        .sign_in(ProviderId::Google, ProviderCredentials::default(), None)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_guest_sign_in_is_user_guest() {
    let store = Arc::new(memory_store().await);
    let service = service_with(store.clone(), Some(ADMIN), google_profile("g-1", ADMIN));

    let report = service
        .sign_in(ProviderId::Guest, ProviderCredentials::default(), None)
        .await
        .unwrap();

    assert!(report.session.user.is_guest);
    assert_eq!(report.session.user.role, Role::User);
    assert!(report.session.user.id.as_str().starts_with(GUEST_ID_PREFIX));
    assert!(report.promotions.is_empty());

    let stored = store
        .get_identity(&report.session.user.id)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.is_guest);
}

#[tokio::test]
async fn test_concurrent_guest_sign_ins_are_distinct() {
    let store = Arc::new(memory_store().await);
    let service = Arc::new(service_with(store.clone(), None, google_profile("g-1", ADMIN)));

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .sign_in(ProviderId::Guest, ProviderCredentials::default(), None)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        let report = handle.await.unwrap();
        ids.insert(report.identity_id);
    }

    assert_eq!(ids.len(), 12);
    assert_eq!(store.count_identities().await.unwrap(), 12);
}

#[tokio::test]
async fn test_admin_email_is_promoted_and_stays_admin() {
    let store = Arc::new(memory_store().await);
    let service = service_with(store.clone(), Some(ADMIN), google_profile("g-1", ADMIN));

    let first = google_sign_in(&service).await;
    assert!(first.is_new_identity);
    assert_eq!(first.session.user.role, Role::Admin);
    assert!(!first.session.user.is_guest);

    for _ in 0..3 {
        let again = google_sign_in(&service).await;
        assert_eq!(again.identity_id, first.identity_id);
        assert_eq!(again.session.user.role, Role::Admin);
        assert_eq!(
            again.promotions,
            vec![(PromotionHook::SignIn, PromotionOutcome::AlreadyAdmin)]
        );
    }

    let stored = store
        .get_identity(&first.session.user.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.role, Role::Admin);

    let logs = store.get_audit_log(&first.identity_id, 50).await.unwrap();
    assert_eq!(logs.iter().filter(|l| l.action == "admin_promoted").count(), 1);
    assert_eq!(logs.iter().filter(|l| l.action == "sign_in").count(), 4);
}

#[tokio::test]
async fn test_account_now_reporting_admin_email_is_promoted() {
    let store = Arc::new(memory_store().await);

    let before = service_with(
        store.clone(),
        Some(ADMIN),
        google_profile("g-1", "old@example.com"),
    );
    let existing = google_sign_in(&before).await;
    assert_eq!(existing.session.user.role, Role::User);

    // Same provider account, now vouching for the admin email
    let after = service_with(store.clone(), Some(ADMIN), google_profile("g-1", ADMIN));
    let report = google_sign_in(&after).await;

    assert!(!report.is_new_identity);
    assert_eq!(report.identity_id, existing.identity_id);
    assert_eq!(report.session.user.role, Role::Admin);
    assert_eq!(
        report.promotions,
        vec![(
            PromotionHook::SignIn,
            PromotionOutcome::Promoted(existing.session.user.id.clone())
        )]
    );

    let again = google_sign_in(&after).await;
    assert_eq!(
        again.promotions,
        vec![(PromotionHook::SignIn, PromotionOutcome::AlreadyAdmin)]
    );
    assert_eq!(store.count_identities().await.unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_first_sign_ins_create_one_identity() {
    let store = Arc::new(memory_store().await);
    let service = Arc::new(service_with(
        store.clone(),
        None,
        google_profile("g-1", "ada@example.com"),
    ));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { google_sign_in(&service).await })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        let report = handle.await.unwrap();
        assert!(!report.session.user.is_guest);
        ids.insert(report.identity_id);
    }

    assert_eq!(ids.len(), 1);
    assert_eq!(store.count_identities().await.unwrap(), 1);
}

#[tokio::test]
async fn test_lost_link_race_removes_created_identity() {
    let inner = memory_store().await;

    let first = service_with(
        Arc::new(inner.clone()),
        None,
        google_profile("g-1", "ada@example.com"),
    );
    let winner = google_sign_in(&first).await;

    // Misses the existing link, and the new email matches no identity, so
    // this sign-in creates an identity whose link write then fails.
    let racing = Arc::new(LateAccountLink {
        inner: inner.clone(),
        missed: AtomicBool::new(false),
    });
    let late = service_with(racing, None, google_profile("g-1", "ada.new@example.com"));
    let report = google_sign_in(&late).await;

    assert!(!report.is_new_identity);
    assert_eq!(report.identity_id, winner.identity_id);
    assert_eq!(inner.count_identities().await.unwrap(), 1);
    assert!(inner.find_by_email("ada.new@example.com").await.unwrap().is_none());
}

#[tokio::test]
async fn test_other_email_stays_user() {
    let store = Arc::new(memory_store().await);
    let service = service_with(
        store.clone(),
        Some(ADMIN),
        google_profile("g-2", "someone@example.com"),
    );

    for _ in 0..3 {
        let report = google_sign_in(&service).await;
        assert_eq!(report.session.user.role, Role::User);
        assert!(
            report
                .promotions
                .iter()
                .all(|(_, outcome)| *outcome == PromotionOutcome::NotEligible)
        );
    }
}

#[tokio::test]
async fn test_materialize_is_deterministic() {
    let store = Arc::new(memory_store().await);
    let service = service_with(store, None, google_profile("g-1", "ada@example.com"));
    let report = google_sign_in(&service).await;

    let a = serde_json::to_vec(&materialize(&report.claims)).unwrap();
    let b = serde_json::to_vec(&materialize(&report.claims)).unwrap();
    assert_eq!(a, b);

    // The view read back from the token is the one returned at sign-in
    let reread = service.session(Some(&report.token)).unwrap();
    assert_eq!(serde_json::to_vec(&reread).unwrap(), a);
}

#[tokio::test]
async fn test_guest_upgrade_through_mutation() {
    let store = Arc::new(memory_store().await);
    let service = service_with(store, None, google_profile("g-1", "ada@example.com"));

    let guest = Identity {
        id: IdentityId::new("guest_x"),
        name: Some("Quiet Heron 0042".to_string()),
        email: None,
        image: None,
        role: Role::User,
        is_guest: true,
    };
    let claims = service.issuer().issue(&guest);
    let token = service.issuer().encode(&claims).unwrap();

    let updated = service
        .update_session(
            Some(&token),
            SessionUpdate {
                role: None,
                is_guest: Some(false),
            },
        )
        .await
        .unwrap();

    assert!(!updated.session.user.is_guest);
    assert_eq!(updated.session.user.id.as_str(), "guest_x");
    assert_eq!(updated.session.user.role, Role::User);
    assert_eq!(updated.session.user.name.as_deref(), Some("Quiet Heron 0042"));
    assert_eq!(updated.claims.exp, claims.exp);

    // A later attempt to flip the flag back is ignored
    let again = service
        .update_session(
            Some(&updated.token),
            SessionUpdate {
                role: None,
                is_guest: Some(true),
            },
        )
        .await
        .unwrap();
    assert!(!again.session.user.is_guest);
}

#[tokio::test]
async fn test_guest_sign_in_keeps_member_session() {
    let store = Arc::new(memory_store().await);
    let service = service_with(store.clone(), Some(ADMIN), google_profile("g-1", ADMIN));

    let member = google_sign_in(&service).await;
    assert_eq!(member.session.user.role, Role::Admin);

    let report = service
        .sign_in(
            ProviderId::Guest,
            ProviderCredentials::default(),
            Some(&member.token),
        )
        .await
        .unwrap();

    assert!(report.reused_session);
    assert!(!report.is_new_identity);
    assert_eq!(report.claims, member.claims);
    assert_eq!(report.session.user.role, Role::Admin);
    assert!(!report.session.user.is_guest);
    assert_eq!(store.count_identities().await.unwrap(), 1);
}

#[tokio::test]
async fn test_guest_sign_in_over_guest_session_provisions_new_guest() {
    let store = Arc::new(memory_store().await);
    let service = service_with(store.clone(), None, google_profile("g-1", ADMIN));

    let first = service
        .sign_in(ProviderId::Guest, ProviderCredentials::default(), None)
        .await
        .unwrap();
    let second = service
        .sign_in(
            ProviderId::Guest,
            ProviderCredentials::default(),
            Some(&first.token),
        )
        .await
        .unwrap();

    assert!(!second.reused_session);
    assert_ne!(first.identity_id, second.identity_id);
    assert_eq!(store.count_identities().await.unwrap(), 2);
}

#[tokio::test]
async fn test_failed_role_write_leaves_existing_identity_user() {
    let inner = memory_store().await;

    // Signed up before the admin email was configured
    let before = service_with(
        Arc::new(inner.clone()),
        None,
        google_profile("g-1", ADMIN),
    );
    let existing = google_sign_in(&before).await;
    assert_eq!(existing.session.user.role, Role::User);

    let failing = Arc::new(RoleWritesFail {
        inner: inner.clone(),
    });
    let after = service_with(failing, Some(ADMIN), google_profile("g-1", ADMIN));
    let report = google_sign_in(&after).await;

    assert!(!report.is_new_identity);
    assert_eq!(report.promotions.len(), 1);
    assert!(matches!(
        report.promotions[0],
        (PromotionHook::SignIn, PromotionOutcome::WriteFailed(_))
    ));
    assert_eq!(report.promotion_failures().count(), 1);
    assert_eq!(report.session.user.role, Role::User);

    let stored = inner
        .get_identity(&existing.session.user.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.role, Role::User);

    let logs = inner.get_audit_log(&existing.identity_id, 50).await.unwrap();
    assert!(logs.iter().any(|l| l.action == "promotion_failed"));
}

#[tokio::test]
async fn test_operator_promotion_closes_the_gap() {
    let store = Arc::new(memory_store().await);

    let before = service_with(store.clone(), None, google_profile("g-1", ADMIN));
    let existing = google_sign_in(&before).await;
    assert_eq!(existing.session.user.role, Role::User);

    let after = service_with(store.clone(), Some(ADMIN), google_profile("g-1", ADMIN));
    let outcome = after.promote_admin().await;
    assert_eq!(
        outcome,
        PromotionOutcome::Promoted(existing.session.user.id.clone())
    );

    // The old token still carries USER until the next sign-in
    let stale = after.session(Some(&existing.token)).unwrap();
    assert_eq!(stale.user.role, Role::User);

    let fresh = google_sign_in(&after).await;
    assert_eq!(fresh.session.user.role, Role::Admin);
}

#[tokio::test]
async fn test_unconfigured_provider_maps_to_configuration_error() {
    let store = Arc::new(memory_store().await);
    let service = service_with(store, None, google_profile("g-1", ADMIN));

    let err = service
        .sign_in(ProviderId::Apple, ProviderCredentials::default(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), crate::auth::AuthErrorKind::Configuration);
    assert_eq!(
        err.destination(&service.config().error_page),
        "/auth/error?error=Configuration"
    );
}

#[test]
fn test_unknown_provider_id_maps_to_configuration_error() {
    let err = "myspace".parse::<ProviderId>().unwrap_err();
    assert_eq!(err.kind(), crate::auth::AuthErrorKind::Configuration);
    assert_eq!(err.destination("/auth/error"), "/auth/error?error=Configuration");
}
