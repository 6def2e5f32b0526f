use anyhow::Result;
use clap::{Parser, Subcommand};
use identity_gate::{AuthConfig, DatabaseConfig, PromotionOutcome, create_service};
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "identity-gate")]
#[command(about = "Guest and provider sign-in with session tokens")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the sign-in and session HTTP server
    Serve {
        /// Bind address, e.g. 0.0.0.0:8080
        #[arg(long, default_value = "0.0.0.0:8080", env = "IDENTITY_GATE_BIND")]
        bind: String,
        #[arg(long, default_value = "memory", env = "SURREALDB_URL")]
        db_url: String,
        /// Admin email, overriding the config file and ADMIN_EMAIL
        #[arg(long)]
        admin_email: Option<String>,
    },
    /// Initialize the database
    Init {
        #[arg(long, default_value = "memory", env = "SURREALDB_URL")]
        db_url: String,
    },
    /// Grant ADMIN to the existing identity holding the admin email
    PromoteAdmin {
        #[arg(long, default_value = "memory", env = "SURREALDB_URL")]
        db_url: String,
        /// Admin email, overriding the config file and ADMIN_EMAIL
        #[arg(long)]
        admin_email: Option<String>,
    },
}

fn load_auth_config(admin_email: Option<String>) -> Result<AuthConfig> {
    let mut config = AuthConfig::load()?;
    if let Some(email) = admin_email {
        config = config.with_admin_email(email);
    }
    config.validate()?;

    match &config.admin_email {
        Some(email) => info!("Admin promotion enabled for {}", email),
        None => info!("No admin email configured; promotion disabled"),
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("identity_gate=info".parse()?)
                .add_directive("surrealdb=warn".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            db_url,
            admin_email,
        } => {
            let db_config = DatabaseConfig {
                url: db_url,
                ..Default::default()
            };
            info!("Using database url for server: {}", db_config.url);

            let auth_config = load_auth_config(admin_email)?;
            let service = create_service(db_config, auth_config).await?;

            let providers = service
                .enabled_providers()
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            info!("Enabled providers: {}", providers);

            let app = identity_gate::api::create_router(service);
            let listener = tokio::net::TcpListener::bind(&bind).await?;

            info!("Server listening on http://{}", bind);
            axum::serve(listener, app).await?;
        }
        Commands::Init { db_url } => {
            let db_config = DatabaseConfig {
                url: db_url,
                ..Default::default()
            };
            info!("Using database url for initialization: {}", db_config.url);

            info!("Initializing database...");
            let db = identity_gate::create_connection(db_config).await?;
            identity_gate::ensure_schema(&db).await?;
            info!("Database initialized successfully");
        }
        Commands::PromoteAdmin {
            db_url,
            admin_email,
        } => {
            let db_config = DatabaseConfig {
                url: db_url,
                ..Default::default()
            };
            let auth_config = load_auth_config(admin_email)?;
            let service = create_service(db_config, auth_config).await?;

            match service.promote_admin().await {
                PromotionOutcome::Disabled => {
                    println!("No admin email configured. Set ADMIN_EMAIL or pass --admin-email.");
                }
                PromotionOutcome::NotEligible => {
                    println!("The admin email is not eligible for promotion.");
                }
                PromotionOutcome::AlreadyAdmin => {
                    println!("Identity already holds the ADMIN role.");
                }
                PromotionOutcome::Promoted(id) => {
                    println!("Promoted identity {} to ADMIN.", id);
                    println!("Existing sessions keep their role until the next sign-in.");
                }
                PromotionOutcome::IdentityMissing => {
                    println!("No identity with the admin email yet. It will be promoted on first sign-in.");
                }
                PromotionOutcome::WriteFailed(reason) => {
                    warn!("Promotion failed: {}", reason);
                    anyhow::bail!("promotion failed: {}", reason);
                }
            }
        }
    }

    Ok(())
}
