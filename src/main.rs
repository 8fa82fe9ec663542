//! Document list sync service.
//!
//! Keeps one workspace's document list reconciled with the document service
//! and serves the result over a small inspection API.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use doclist_sync::config::Config;
use doclist_sync::overlay::LogNotifier;
use doclist_sync::session::ListController;
use doclist_sync::source::HttpDocumentSource;
use doclist_sync::store::{load_list_settings, KeyValueStore, ListSettings, SqliteStore};
use doclist_sync::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting document list sync");
    tracing::info!("Document service: {}", config.api_url);
    tracing::info!("Workspace: {}", config.workspace_id);
    tracing::info!("Settings database: {:?}", config.settings_db);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.api_key.is_none() {
        tracing::warn!("No API key configured (DOCSYNC_API_KEY). Requests are unauthenticated!");
    }

    // Restore list settings
    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&config.settings_db).await?);
    let settings = load_list_settings(store.as_ref(), &config.workspace_id)
        .await?
        .unwrap_or_else(|| ListSettings::new(config.page_size));
    tracing::info!(
        "List settings: page size {}, sort {}",
        settings.page_size,
        settings.query.sort
    );

    // Start the list session
    let source = Arc::new(HttpDocumentSource::new(&config.api_url, config.api_key.as_deref())?);
    let controller = Arc::new(
        ListController::new(source, config.tuning.clone()).with_store(store.clone()),
    );
    if let Err(err) = controller.set_key(settings.to_key(&config.workspace_id)).await {
        // the API reports NOT_READY until a query is set again
        tracing::error!("Initial list load failed: {}", err);
    }

    let state = AppState::new(
        config.workspace_id.clone(),
        controller.clone(),
        store,
        Arc::new(LogNotifier),
    );
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    controller.shutdown().await;
    tracing::info!("Stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
    }
}
