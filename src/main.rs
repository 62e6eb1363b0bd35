mod calls;
mod config;
mod db_types;
mod error;
mod guard;
mod handlers;
mod provider;
mod store;
mod tasks;
mod types;
mod vapi;
mod vapi_types;

use crate::calls::CallService;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::store::{CallStore, MemoryCallStore, PgCallStore};
use crate::tasks::TranscriptReconciler;
use crate::types::AppState;

use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::prelude::*;

pub mod consts {
    pub const DEFAULT_PAGE_LIMIT: i64 = 20;
    pub const MAX_PAGE_LIMIT: i64 = 100;
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true),
        )
        .with(Targets::new().with_targets([
            ("hyper", LevelFilter::OFF),
            ("callpilot_rs", config.log_level),
        ]));
    tracing::subscriber::set_global_default(subscriber)?;

    if config.vapi.webhook_secret.is_none() {
        warn!("VAPI_WEBHOOK_SECRET is not set; webhook signatures will not be verified");
    }

    let store: Arc<dyn CallStore> = match &config.database_url {
        Some(url) => {
            let store = PgCallStore::connect(url, config.db_max_connections).await?;
            store.migrate().await?;
            info!(max_connections = config.db_max_connections, "connected to postgres");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL is not set; calls are kept in memory and lost on restart");
            Arc::new(MemoryCallStore::new())
        }
    };

    let provider = provider::build_provider(&config)?;
    let reconciler =
        TranscriptReconciler::spawn(provider.clone(), store.clone(), &config.reconciler);
    let app_state = Arc::new(AppState {
        service: CallService::new(provider, store, reconciler),
    });

    info!(addr=%config.bind_addr, "listening");
    axum::Server::bind(&config.bind_addr)
        .serve(handlers::router(app_state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error=%e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
