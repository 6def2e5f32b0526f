//! Identity storage.
//!
//! [`IdentityStore`] is the seam between the sign-in pipeline and the
//! persisted identity records. [`SurrealIdentityStore`] is the production
//! implementation.

use std::future::Future;

use anyhow::Result;

use crate::auth::identity::{Identity, Role};
use crate::db::Db;
use crate::db::schema::{
    AccountRecord, AuditLogCreate, AuditLogRecord, IdentityCreate, IdentityRecord,
};
use crate::types::{IdentityId, ProviderAccountId};

/// Backing store for identities, provider account links and audit entries.
///
/// All methods return `Send` futures so the store can be shared across
/// request handlers on a multi-threaded runtime.
pub trait IdentityStore: Send + Sync + 'static {
    /// Persist a new identity.
    fn create_identity(&self, create: IdentityCreate)
    -> impl Future<Output = Result<Identity>> + Send;

    /// Look up an identity by its id.
    fn get_identity(&self, id: &IdentityId)
    -> impl Future<Output = Result<Option<Identity>>> + Send;

    /// Look up a non-guest identity by email.
    fn find_by_email(&self, email: &str)
    -> impl Future<Output = Result<Option<Identity>>> + Send;

    /// Look up the identity linked to a provider account.
    fn find_by_account(
        &self,
        provider: &str,
        account: &ProviderAccountId,
    ) -> impl Future<Output = Result<Option<Identity>>> + Send;

    /// Link a provider account to an identity.
    fn link_account(
        &self,
        identity_id: &IdentityId,
        provider: &str,
        account: &ProviderAccountId,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove an identity. Used to undo a creation whose account link lost a
    /// race; provider account links are left alone.
    fn delete_identity(&self, id: &IdentityId) -> impl Future<Output = Result<()>> + Send;

    /// Set the role of an identity. Returns `None` when no such identity exists.
    fn set_role(
        &self,
        id: &IdentityId,
        role: Role,
    ) -> impl Future<Output = Result<Option<Identity>>> + Send;

    /// Write an audit log entry.
    fn audit_log(&self, entry: AuditLogCreate) -> impl Future<Output = Result<()>> + Send;
}

/// SurrealDB-backed identity store.
#[derive(Clone)]
pub struct SurrealIdentityStore {
    db: Db,
}

impl SurrealIdentityStore {
    /// Create a new identity store.
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Get recent audit log entries for an identity, newest first.
    pub async fn get_audit_log(&self, user_id: &str, limit: u32) -> Result<Vec<AuditLogRecord>> {
        let user_id = user_id.to_string();

        let query = r#"
            SELECT * FROM audit_log
            WHERE user_id = $user_id
            ORDER BY created_at DESC
            LIMIT $limit
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("user_id", user_id))
            .bind(("limit", limit))
            .await?;

        let logs: Vec<AuditLogRecord> = res.take(0)?;
        Ok(logs)
    }

    /// Count identities, guests included.
    pub async fn count_identities(&self) -> Result<usize> {
        let mut res = self
            .db
            .query("SELECT count() AS total FROM identity GROUP ALL")
            .await?;

        #[derive(serde::Deserialize)]
        struct Count {
            total: usize,
        }

        let counts: Vec<Count> = res.take(0)?;
        Ok(counts.first().map(|c| c.total).unwrap_or(0))
    }

    async fn select_one(
        &self,
        query: &'static str,
        key: &'static str,
        value: String,
    ) -> Result<Option<Identity>> {
        let mut res = self.db.query(query).bind((key, value)).await?;

        let records: Vec<IdentityRecord> = res.take(0)?;
        records.into_iter().next().map(Identity::try_from).transpose()
    }
}

impl IdentityStore for SurrealIdentityStore {
    async fn create_identity(&self, create: IdentityCreate) -> Result<Identity> {
        let query = r#"
            CREATE identity CONTENT {
                identity_id: $identity_id,
                name: $name,
                email: $email,
                image: $image,
                role: $role,
                is_guest: $is_guest
            }
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("identity_id", create.identity_id))
            .bind(("name", create.name))
            .bind(("email", create.email))
            .bind(("image", create.image))
            .bind(("role", create.role))
            .bind(("is_guest", create.is_guest))
            .await?
            .check()?;

        let records: Vec<IdentityRecord> = res.take(0)?;
        records
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Failed to create identity"))
            .and_then(Identity::try_from)
    }

    async fn get_identity(&self, id: &IdentityId) -> Result<Option<Identity>> {
        self.select_one(
            "SELECT * FROM identity WHERE identity_id = $identity_id LIMIT 1",
            "identity_id",
            id.to_string(),
        )
        .await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>> {
        self.select_one(
            "SELECT * FROM identity WHERE email = $email AND is_guest = false LIMIT 1",
            "email",
            email.to_string(),
        )
        .await
    }

    async fn find_by_account(
        &self,
        provider: &str,
        account: &ProviderAccountId,
    ) -> Result<Option<Identity>> {
        let query = r#"
            SELECT * FROM account
            WHERE provider = $provider
              AND provider_account_id = $provider_account_id
            LIMIT 1
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("provider", provider.to_string()))
            .bind(("provider_account_id", account.to_string()))
            .await?;

        let accounts: Vec<AccountRecord> = res.take(0)?;
        match accounts.into_iter().next() {
            Some(link) => self.get_identity(&IdentityId::new(link.identity_id)).await,
            None => Ok(None),
        }
    }

    async fn link_account(
        &self,
        identity_id: &IdentityId,
        provider: &str,
        account: &ProviderAccountId,
    ) -> Result<()> {
        let query = r#"
            CREATE account CONTENT {
                identity_id: $identity_id,
                provider: $provider,
                provider_account_id: $provider_account_id
            }
        "#;

        self.db
            .query(query)
            .bind(("identity_id", identity_id.to_string()))
            .bind(("provider", provider.to_string()))
            .bind(("provider_account_id", account.to_string()))
            .await?
            .check()?;

        Ok(())
    }

    async fn delete_identity(&self, id: &IdentityId) -> Result<()> {
        self.db
            .query("DELETE identity WHERE identity_id = $identity_id")
            .bind(("identity_id", id.to_string()))
            .await?
            .check()?;

        Ok(())
    }

    async fn set_role(&self, id: &IdentityId, role: Role) -> Result<Option<Identity>> {
        let query = r#"
            UPDATE identity SET
                role = $role
            WHERE identity_id = $identity_id
            RETURN AFTER
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("identity_id", id.to_string()))
            .bind(("role", role.as_str().to_string()))
            .await?
            .check()?;

        let records: Vec<IdentityRecord> = res.take(0)?;
        records.into_iter().next().map(Identity::try_from).transpose()
    }

    async fn audit_log(&self, entry: AuditLogCreate) -> Result<()> {
        let query = r#"
            CREATE audit_log CONTENT {
                user_id: $user_id,
                action: $action,
                resource_type: $resource_type,
                resource_id: $resource_id,
                details: $details
            }
        "#;

        self.db
            .query(query)
            .bind(("user_id", entry.user_id))
            .bind(("action", entry.action))
            .bind(("resource_type", entry.resource_type))
            .bind(("resource_id", entry.resource_id))
            .bind(("details", entry.details))
            .await?
            .check()?;

        Ok(())
    }
}
