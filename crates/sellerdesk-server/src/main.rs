mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;

use sellerdesk_orders::OrderService;
use tracing_subscriber::EnvFilter;

use crate::{
    api::{build_app, AppState},
    middleware::{AuthState, RateLimitState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = sellerdesk_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tokio::fs::create_dir_all(&config.data_dir).await?;
    let service = Arc::new(OrderService::from_config(&config)?);
    tracing::info!(
        env = %config.env,
        data_dir = %config.data_dir.display(),
        marketplace = %config.spapi_marketplace_id,
        "order service ready"
    );

    let _scheduler = scheduler::build_scheduler(Arc::clone(&service), &config.sync_cron).await?;

    let auth = AuthState::from_env(matches!(
        config.env,
        sellerdesk_core::Environment::Development
    ))?;
    let app = build_app(
        AppState {
            service: Arc::clone(&service),
        },
        auth,
        RateLimitState::from_pacing(&config.pacing),
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
