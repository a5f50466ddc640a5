use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use user_service::context::Context;
use user_service::{api, config::Config, storage, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "user-service starting");

    // Load configuration
    let config = Config::load()?;

    // Open storage
    let store = storage::open_store(config.storage.backend, &config.storage.data_dir)?;
    info!(
        backend = ?config.storage.backend,
        data_dir = %config.storage.data_dir.display(),
        "Storage opened"
    );

    let state = Arc::new(AppState::new(config.clone(), store)?);

    // Bootstrap administrator
    if let Some(admin) = config.admin.clone() {
        let bootstrap = Arc::clone(&state);
        let created = tokio::task::spawn_blocking(move || {
            bootstrap
                .service
                .ensure_admin(&Context::background(), &admin.login, &admin.password)
        })
        .await??;
        if created {
            info!("Bootstrap administrator created");
        }
    }

    // Build and start both HTTP servers
    let public_listener =
        tokio::net::TcpListener::bind(config.server.public_bind_address).await?;
    let private_listener =
        tokio::net::TcpListener::bind(config.server.private_bind_address).await?;
    info!(
        public = %config.server.public_bind_address,
        private = %config.server.private_bind_address,
        "Listening"
    );

    let public = axum::serve(public_listener, api::public_router(Arc::clone(&state)))
        .with_graceful_shutdown(state.shutdown.clone().cancelled_owned());
    let private = axum::serve(private_listener, api::private_router(Arc::clone(&state)))
        .with_graceful_shutdown(state.shutdown.clone().cancelled_owned());

    let signal_state = Arc::clone(&state);
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_state.shutdown.cancel();
    });

    let (public_result, private_result) = tokio::join!(public, private);
    public_result?;
    private_result?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
