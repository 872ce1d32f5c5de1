pub mod accounts;
pub mod api_keys;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod gate;
pub mod routes;
pub mod usage;
pub mod validation;
pub mod wallet;

use std::sync::Arc;

use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::accounts::AccountStore;
use crate::api_keys::{CredentialStore, SqliteCredentialStore};
use crate::catalog::CatalogStore;
use crate::config::GatewayConfig;
use crate::db::Database;
use crate::error::GateResult;
use crate::gate::ApiGate;

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<ApiGate>,
    pub credentials: Arc<dyn CredentialStore>,
    pub accounts: AccountStore,
    pub catalog: CatalogStore,
}

/// A wired-up service: route state plus its background tasks.
///
/// Must be started inside a tokio runtime. Background tasks stop when the
/// shutdown token fires; [`Gateway::shutdown`] fires it and waits for them.
pub struct Gateway {
    pub state: AppState,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Gateway {
    pub fn start(config: &GatewayConfig, db: Database, shutdown: CancellationToken) -> Self {
        let credentials: Arc<dyn CredentialStore> = Arc::new(SqliteCredentialStore::new(db.clone()));
        let accounts = AccountStore::new(db.clone());
        let catalog = CatalogStore::new(db);

        let (usage, usage_future) = usage::writer::create(credentials.clone(), shutdown.clone());
        let mut tasks = vec![tokio::spawn(usage_future)];

        let gate = Arc::new(ApiGate::new(config, credentials.clone(), usage));
        if let Some(handle) = gate.start_maintenance(config.cleanup_interval(), shutdown.clone()) {
            tasks.push(handle);
        }
        tasks.push(spawn_challenge_purge(
            accounts.clone(),
            config.cleanup_interval(),
            shutdown.clone(),
        ));

        Self {
            state: AppState {
                gate,
                credentials,
                accounts,
                catalog,
            },
            shutdown,
            tasks,
        }
    }

    pub fn router(&self) -> Router {
        routes::build_router(self.state.clone())
    }

    /// Stop background work, flushing pending last-used writes.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                log::error!("Background task ended abnormally: {}", e);
            }
        }
    }
}

fn spawn_challenge_purge(
    accounts: AccountStore,
    interval: std::time::Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match accounts.purge_expired_challenges(chrono::Utc::now()).await {
                        Ok(0) => {}
                        Ok(n) => log::debug!("Purged {} expired wallet challenges", n),
                        Err(e) => log::warn!("Challenge purge failed: {}", e),
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    })
}

/// Open the configured database, bind, and serve until `shutdown` fires.
pub async fn serve(config: GatewayConfig, shutdown: CancellationToken) -> GateResult<()> {
    let db = Database::open(&config.database_path())?;
    let gateway = Gateway::start(&config, db, shutdown.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    log::info!("KnowMint API gate listening on {}", config.bind_addr);

    let token = shutdown.clone();
    axum::serve(listener, gateway.router())
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

    gateway.shutdown().await;
    log::info!("KnowMint API gate stopped");
    Ok(())
}
