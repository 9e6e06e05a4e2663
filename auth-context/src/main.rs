use auth_context::{
    build_router,
    config::AuthContextConfig,
    models::OrgRole,
    services::{
        CacheStore, DirectoryProvider, FileDirectorySettings, MemoryCache, MemoryStore,
        MultiDirectoryFactory, RedisService, UnavailableConnector,
    },
    AppState, Collaborators,
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Fail fast on invalid configuration
    let config = AuthContextConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting auth context service"
    );

    let cache: Arc<dyn CacheStore> = match &config.redis.url {
        Some(url) => Arc::new(RedisService::new(url).await?),
        None => {
            tracing::warn!("No Redis URL configured, using in-process identity cache");
            Arc::new(MemoryCache::new())
        }
    };

    let store = Arc::new(MemoryStore::new());
    if let Ok(password) = std::env::var("ADMIN_PASSWORD") {
        let admin = store.add_user("admin", "admin@localhost", &password, OrgRole::Admin)?;
        tracing::info!(user_id = admin.id, "Seeded admin user");
    }

    let directory = DirectoryProvider::new(
        config.directory.clone(),
        Arc::new(FileDirectorySettings::new(config.directory.config_file.clone())),
        Arc::new(MultiDirectoryFactory::new(Arc::new(UnavailableConnector))),
    );
    if config.directory.enabled {
        tracing::warn!("Directory login enabled without a directory connector; dials will fail");
    }

    let bind_address = config.common.bind_address();
    let state = AppState::new(
        config.clone(),
        Collaborators::in_memory(store, cache, directory),
    );
    let shutdown = state.shutdown.clone();
    let app = build_router(state);

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %bind_address, "Listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        shutdown.cancel();
    })
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}
