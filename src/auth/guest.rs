//! Guest identity provisioning.
//!
//! Guests are disposable: every call creates a brand-new identity with no
//! credentials and no external linking key. Nothing deduplicates concurrent
//! or retried calls; callers that want at-most-once provisioning must
//! suppress duplicate invocations themselves.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::identity::{Identity, Role};
use crate::auth::identity_store::IdentityStore;
use crate::db::schema::{AuditAction, AuditLogCreate, IdentityCreate};
use crate::types::IdentityId;

const ADJECTIVES: &[&str] = &[
    "Brave", "Calm", "Clever", "Curious", "Daring", "Eager", "Gentle", "Happy", "Jolly", "Keen",
    "Lively", "Lucky", "Mellow", "Nimble", "Quiet", "Rapid", "Sly", "Sunny", "Swift", "Witty",
];

const ANIMALS: &[&str] = &[
    "Badger", "Bison", "Crane", "Falcon", "Ferret", "Gecko", "Heron", "Ibex", "Lemur", "Lynx",
    "Marten", "Newt", "Otter", "Panda", "Puffin", "Raven", "Stoat", "Tapir", "Walrus", "Wombat",
];

/// Generate a random guest display name, e.g. "Swift Otter 4821".
pub fn random_guest_name() -> String {
    let bytes = *Uuid::new_v4().as_bytes();
    let adjective = ADJECTIVES[bytes[0] as usize % ADJECTIVES.len()];
    let animal = ANIMALS[bytes[1] as usize % ANIMALS.len()];
    let number = u16::from_be_bytes([bytes[2], bytes[3]]) % 10_000;
    format!("{} {} {:04}", adjective, animal, number)
}

/// Creates guest identities.
pub struct GuestProvisioner<S> {
    store: Arc<S>,
}

impl<S> Clone for GuestProvisioner<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: IdentityStore> GuestProvisioner<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Create and persist a new guest identity.
    pub async fn create_guest(&self) -> Result<Identity> {
        let create = IdentityCreate {
            identity_id: IdentityId::new_guest().into_inner(),
            name: Some(random_guest_name()),
            email: None,
            image: None,
            role: Role::User.as_str().to_string(),
            is_guest: true,
        };

        let guest = self.store.create_identity(create).await?;
        debug!(identity_id = %guest.id, name = ?guest.name, "Provisioned guest identity");

        let entry = AuditLogCreate::for_identity(
            guest.id.as_str(),
            AuditAction::GuestCreated,
            serde_json::json!({ "name": guest.name }),
        );
        if let Err(e) = self.store.audit_log(entry).await {
            warn!(identity_id = %guest.id, "Failed to audit guest creation: {}", e);
        }

        Ok(guest)
    }
}
