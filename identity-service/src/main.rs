use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use identity_service::{
    build_router,
    config::IdentityConfig,
    services::{
        AttemptService, GrantService, IdentityService, MemoryDenyList, MongoStore,
        OrgGraphValidator, OrganizationService, SessionManager,
    },
    AppState,
};
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use service_core::observability::logging::init_tracing;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration, fail fast if invalid.
    let config = IdentityConfig::from_env()?;

    init_tracing(&config.service_name, &config.log_level);

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity service"
    );

    // Storage.
    let store = MongoStore::connect(&config.mongodb.uri, &config.mongodb.database).await?;
    store.initialize_indexes().await?;
    let store: Arc<dyn identity_service::services::IdentityStore> = Arc::new(store);
    tracing::info!("Database initialized");

    // Core services.
    let attempts = Arc::new(AttemptService::new(&config.attempt));
    let sessions = Arc::new(SessionManager::new(&config.cookie)?);
    let graph = OrgGraphValidator::new(store.clone());
    let grants = GrantService::new(
        &config.grant,
        graph.clone(),
        Arc::new(MemoryDenyList::new()),
    );
    let sms = Arc::new(identity_service::services::LogSmsProvider::new());
    let identity = IdentityService::new(store.clone(), attempts.clone(), sms);
    let organizations = OrganizationService::new(store.clone(), graph.clone());

    // Rate limiters.
    let login_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.login_attempts,
        config.rate_limit.login_window_seconds,
    );
    let register_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.register_attempts,
        config.rate_limit.register_window_seconds,
    );
    let ip_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );

    let state = AppState {
        config: config.clone(),
        store,
        attempts: attempts.clone(),
        sessions,
        grants,
        graph,
        identity,
        organizations,
        login_rate_limiter,
        register_rate_limiter,
        ip_rate_limiter,
    };

    // Reclaim expired attempts periodically; expiry is also enforced on
    // every access, this keeps memory bounded.
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let reaped = attempts.reap_expired();
            if reaped > 0 {
                tracing::debug!(reaped, "Reaped expired authentication attempts");
            }
        }
    });

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(%addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
