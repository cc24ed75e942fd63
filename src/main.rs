use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vidcall::config::Config;
use vidcall::domain::invitation::InvitationStore;
use vidcall::infrastructure::persistence::InMemoryInvitationStore;
use vidcall::infrastructure::signaling::SignalingBus;
use vidcall::interface::api::{build_router, init_metrics, AppState};

#[cfg(feature = "postgres")]
use vidcall::infrastructure::persistence::{create_pool, run_migrations, PgInvitationStore, PoolSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    info!("Starting vidcall signaling server");
    info!(
        "Call policy: ring {}s, negotiation {}s, cap {}s, provider {}",
        config.calls.ring_timeout_secs,
        config.calls.negotiation_timeout_secs,
        config.calls.duration_cap_secs,
        config.provider.kind
    );

    let store = create_store(&config).await?;
    let bus = SignalingBus::new(store.clone(), config.provider.kind);

    info!("Initializing Prometheus metrics exporter");
    let prometheus_handle = init_metrics()?;

    let state = AppState {
        store,
        bus: bus.clone(),
    };
    let app = build_router(state, prometheus_handle);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("REST API server started on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down...");
            bus.close();
        })
        .await?;

    info!("Server stopped");
    Ok(())
}

/// PostgreSQL when configured, otherwise in memory
async fn create_store(config: &Config) -> anyhow::Result<Arc<dyn InvitationStore>> {
    #[cfg(feature = "postgres")]
    if let Some(ref url) = config.database.url {
        info!("Initializing database connection...");
        let pool = create_pool(&PoolSettings::new(url.clone())).await?;

        info!("Running database migrations...");
        run_migrations(&pool).await?;
        info!("Database migrations completed");

        return Ok(Arc::new(PgInvitationStore::new(pool, config.calls.invitation_ttl())));
    }

    info!("Using in-memory invitation store");
    Ok(Arc::new(InMemoryInvitationStore::new(config.calls.invitation_ttl())))
}
