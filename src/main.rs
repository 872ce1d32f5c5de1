use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use knowmint_gate::api_keys::{generate_api_key, ApiCredential, CredentialStore, SqliteCredentialStore};
use knowmint_gate::catalog::{CatalogStore, Category};
use knowmint_gate::config::GatewayConfig;
use knowmint_gate::db::Database;
use knowmint_gate::gate::Permission;
use knowmint_gate::validation::validate_expires_at;

#[derive(Parser)]
#[command(name = "knowmint-gate")]
#[command(about = "API key, permission and rate-limit gate for the KnowMint REST API")]
#[command(version)]
struct Cli {
    /// Path to gateway.json (default: <data dir>/gateway.json if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Data directory holding the database and config
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// SQLite database file (default: <data dir>/knowmint.db)
    #[arg(long, global = true)]
    database: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Listen address (e.g. 0.0.0.0:8787)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Issue an API key and print it once
    IssueKey {
        /// Owning user id
        #[arg(long)]
        user_id: String,
        /// Label shown in key listings
        #[arg(long)]
        name: String,
        /// Comma-separated capabilities
        #[arg(long, value_delimiter = ',', default_value = "read,write,admin")]
        permissions: Vec<Permission>,
        /// ISO 8601 expiry (date or date-time)
        #[arg(long)]
        expires_at: Option<String>,
    },
    /// Insert or update a catalog category
    AddCategory {
        #[arg(long)]
        name: String,
        #[arg(long)]
        slug: String,
        #[arg(long)]
        icon: Option<String>,
    },
}

fn load_config(cli: &Cli) -> Result<GatewayConfig> {
    let mut config = GatewayConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(db) = &cli.database {
        config.database_path = Some(db.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so issue-key output stays clean on stdout
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(addr) = bind {
                config.bind_addr = addr;
            }
            config.validate()?;

            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("cannot listen for ctrl-c: {e}");
                    return;
                }
                tracing::info!("shutdown requested");
                signal.cancel();
            });

            knowmint_gate::serve(config, shutdown).await?;
        }
        Commands::IssueKey {
            user_id,
            name,
            permissions,
            expires_at,
        } => {
            let expires_at = expires_at.map(serde_json::Value::String);
            let expires_at = validate_expires_at(expires_at.as_ref(), Utc::now())
                .map_err(|msg| anyhow::anyhow!(msg))?;

            let db = Database::open(&config.database_path())?;
            let store = SqliteCredentialStore::new(db);
            let key = generate_api_key();
            let credential = ApiCredential::new(
                &user_id,
                &name,
                key.hash,
                permissions.iter().map(|p| p.as_str().to_string()).collect(),
                expires_at,
            );
            store.insert(credential.clone()).await?;

            tracing::info!(key_id = %credential.id, user_id = %user_id, "issued API key");
            println!("{}", key.raw);
        }
        Commands::AddCategory { name, slug, icon } => {
            let db = Database::open(&config.database_path())?;
            CatalogStore::new(db)
                .upsert_category(Category {
                    id: uuid::Uuid::new_v4().to_string(),
                    name,
                    slug: slug.clone(),
                    icon,
                })
                .await?;
            tracing::info!(slug = %slug, "category saved");
        }
    }

    Ok(())
}
