// Core modules
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod types;

// Re-export key types and functions
pub use auth::{
    AuthError, AuthService, Identity, PromotionOutcome, ProviderCredentials, ProviderId,
    ProviderRegistry, Role, SessionUpdate, SessionView, SurrealIdentityStore,
};
pub use config::AuthConfig;
pub use db::{DatabaseConfig, create_connection, ensure_schema};

use std::sync::Arc;
use anyhow::Result;

/// Convenience function to create a fully configured auth service.
///
/// Connects to the database, makes sure the schema exists, builds a verifier
/// for every configured provider and returns the service ready to be shared
/// by request handlers.
pub async fn create_service(
    db_config: DatabaseConfig,
    auth_config: AuthConfig,
) -> Result<Arc<AuthService<SurrealIdentityStore>>> {
    auth_config.validate()?;

    let db = create_connection(db_config).await?;
    ensure_schema(&db).await?;

    let providers = ProviderRegistry::from_config(&auth_config)?;
    let store = Arc::new(SurrealIdentityStore::new(db));

    Ok(Arc::new(AuthService::new(
        Arc::new(auth_config),
        store,
        providers,
    )))
}
