use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lorakit_api::config::ServerConfig;
use lorakit_api::router::build_app_router;
use lorakit_api::state::AppState;
use lorakit_core::registry::TaskRegistry;
use lorakit_pipeline::manager::PipelineManager;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lorakit_api=debug,lorakit_pipeline=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");
    if config.launch.tikhub_api_key.is_none() || config.launch.openai_api_key.is_none() {
        tracing::warn!(
            "TIKHUB_API_KEY and/or OPENAI_API_KEY not set; pipeline starts will be rejected"
        );
    }

    // --- Task registry ---
    let registry = Arc::new(TaskRegistry::new());

    // --- Pipeline manager ---
    let pipeline = PipelineManager::new(Arc::clone(&registry), config.launch.clone());
    tracing::info!(runner = %config.launch.runner_script.display(), "Pipeline manager created");

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        registry,
        pipeline: Arc::clone(&pipeline),
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Kill supervised pipeline processes and let their supervisors drain.
    pipeline
        .shutdown(std::time::Duration::from_secs(config.shutdown_timeout_secs))
        .await;
    tracing::info!("Pipeline manager shut down");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
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
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
