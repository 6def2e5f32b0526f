use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::{RecordId, sql::Datetime};

/// Persisted identity record (table: `identity`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Database identifier
    pub id: RecordId,
    /// Immutable public identity id (e.g. "guest_3f2a...")
    pub identity_id: String,
    /// Display name
    pub name: Option<String>,
    /// Verified email; the linking key for provider-backed identities
    pub email: Option<String>,
    /// Avatar URL
    pub image: Option<String>,
    /// "USER" or "ADMIN"
    pub role: String,
    /// Whether this is a disposable guest identity
    pub is_guest: bool,
    /// When the identity was created
    pub created_at: Option<Datetime>,
    /// Last update time
    pub updated_at: Option<Datetime>,
}

/// Payload for creating a new identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityCreate {
    pub identity_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
    pub role: String,
    pub is_guest: bool,
}

/// Persisted link between a provider account and an identity (table: `account`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: RecordId,
    pub identity_id: String,
    /// Provider name, e.g. "google"
    pub provider: String,
    /// Account id reported by the provider
    pub provider_account_id: String,
    pub created_at: Option<Datetime>,
}

/// Audit log action types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A guest identity was provisioned
    GuestCreated,
    /// An identity signed in
    SignIn,
    /// A provider-backed identity was created on first sign-in
    IdentityCreated,
    /// A provider account was linked to an existing identity
    AccountLinked,
    /// An identity was promoted to ADMIN
    AdminPromoted,
    /// A promotion attempt could not be written
    PromotionFailed,
    /// Claims were changed through the session mutation channel
    SessionUpdated,
}

impl AuditAction {
    pub fn as_str(&self) -> &str {
        match self {
            Self::GuestCreated => "guest_created",
            Self::SignIn => "sign_in",
            Self::IdentityCreated => "identity_created",
            Self::AccountLinked => "account_linked",
            Self::AdminPromoted => "admin_promoted",
            Self::PromotionFailed => "promotion_failed",
            Self::SessionUpdated => "session_updated",
        }
    }
}

/// Persisted audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogRecord {
    /// Database identifier
    pub id: RecordId,
    /// Identity id (None when the identity does not exist yet)
    pub user_id: Option<String>,
    /// The action that was performed
    pub action: String,
    /// Type of resource affected
    pub resource_type: String,
    /// ID of the resource affected
    pub resource_id: Option<String>,
    /// Additional context
    pub details: Option<Value>,
    /// When the action occurred
    pub created_at: Option<Datetime>,
}

/// Payload for creating an audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogCreate {
    pub user_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: Option<Value>,
}

impl AuditLogCreate {
    /// Entry about an identity, with the identity as the affected resource.
    pub fn for_identity(identity_id: &str, action: AuditAction, details: Value) -> Self {
        Self {
            user_id: Some(identity_id.to_string()),
            action: action.as_str().to_string(),
            resource_type: "identity".to_string(),
            resource_id: Some(identity_id.to_string()),
            details: Some(details),
        }
    }
}
