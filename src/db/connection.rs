use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;

pub type Db = Surreal<Any>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::var("SURREALDB_URL")
                .unwrap_or_else(|_| "memory".to_string()),
            namespace: env::var("SURREALDB_NAMESPACE")
                .unwrap_or_else(|_| "identity".to_string()),
            database: env::var("SURREALDB_DATABASE")
                .unwrap_or_else(|_| "gate".to_string()),
            username: env::var("SURREALDB_USERNAME").ok(),
            password: env::var("SURREALDB_PASSWORD").ok(),
        }
    }
}

pub async fn create_connection(config: DatabaseConfig) -> Result<Db> {
    let db = surrealdb::engine::any::connect(config.url).await?;

    // Sign in if credentials are provided
    if let (Some(username), Some(password)) = (config.username, config.password) {
        db.signin(Root {
            username: &username,
            password: &password,
        })
        .await?;
    }

    db.use_ns(config.namespace).use_db(config.database).await?;

    Ok(db)
}

pub async fn ensure_schema(db: &Db) -> Result<()> {
    let schema_queries = vec![
        // Identities: guests and provider-backed members
        "DEFINE TABLE IF NOT EXISTS identity SCHEMALESS;
         DEFINE FIELD IF NOT EXISTS identity_id ON TABLE identity TYPE string;
         DEFINE FIELD IF NOT EXISTS role ON TABLE identity TYPE string DEFAULT 'USER';
         DEFINE FIELD IF NOT EXISTS is_guest ON TABLE identity TYPE bool DEFAULT false;
         DEFINE FIELD IF NOT EXISTS created_at ON TABLE identity VALUE $before OR time::now();
         DEFINE FIELD IF NOT EXISTS updated_at ON TABLE identity VALUE time::now();",

        // Links from a provider account to the identity it signs in as
        "DEFINE TABLE IF NOT EXISTS account SCHEMALESS;
         DEFINE FIELD IF NOT EXISTS identity_id ON TABLE account TYPE string;
         DEFINE FIELD IF NOT EXISTS provider ON TABLE account TYPE string;
         DEFINE FIELD IF NOT EXISTS provider_account_id ON TABLE account TYPE string;
         DEFINE FIELD IF NOT EXISTS created_at ON TABLE account VALUE $before OR time::now();",

        // Security-relevant events
        "DEFINE TABLE IF NOT EXISTS audit_log SCHEMALESS;
         DEFINE FIELD IF NOT EXISTS created_at ON TABLE audit_log VALUE $before OR time::now();",

        // Indexes
        "DEFINE INDEX IF NOT EXISTS identity_id_unique ON TABLE identity COLUMNS identity_id UNIQUE;
         DEFINE INDEX IF NOT EXISTS identity_email ON TABLE identity COLUMNS email;
         DEFINE INDEX IF NOT EXISTS account_provider_unique ON TABLE account COLUMNS provider, provider_account_id UNIQUE;
         DEFINE INDEX IF NOT EXISTS account_identity ON TABLE account COLUMNS identity_id;
         DEFINE INDEX IF NOT EXISTS audit_log_user ON TABLE audit_log COLUMNS user_id;",
    ];

    for query in schema_queries {
        db.query(query).await?.check()?;
    }

    Ok(())
}
