use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use queue_server::config::{LogConfig, Settings};
use queue_server::queue::{create_storage_backend, QueueRegistry};
use queue_server::server::{create_app, AppState};
use queue_server::tasks::OrphanReconciler;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    init_tracing(&settings.log);
    tracing::info!("Configuration loaded");

    // Open the storage backend
    let backend = create_storage_backend(&settings).await?;
    let registry = Arc::new(QueueRegistry::new(backend.provider.clone()));
    tracing::info!(backend = registry.backend_type(), "Queue registry initialized");

    // Start orphan reconciler in background
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let reconciler = OrphanReconciler::from_config(registry.clone(), &settings.queue);
    let reconciler_shutdown = shutdown_tx.subscribe();
    let reconciler_handle = tokio::spawn(async move {
        reconciler.run(reconciler_shutdown).await;
    });

    // Create Axum app
    let state = AppState::new(settings.clone(), registry.clone());
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx))
        .await?;

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    if let Err(e) = reconciler_handle.await {
        tracing::error!(error = %e, "Orphan reconciler task failed");
    }

    registry.shutdown().await;
    backend.close().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &LogConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    // Stop background tasks
    let _ = shutdown_tx.send(());
}
