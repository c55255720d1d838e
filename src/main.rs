use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use assembly_portal::config::AppConfig;
use assembly_portal::{http, AppState};

const MEDIA_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let state = AppState::connect(&config).await?;

    tokio::fs::create_dir_all(&config.media.media_root).await?;

    let api = http::router(state.clone());
    let media = http::media_router(&config.media.media_root);

    let api_listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    let media_listener = tokio::net::TcpListener::bind(&config.media.http_addr).await?;
    tracing::info!("listening on {}", config.http_addr);
    tracing::info!(
        media_root = %config.media.media_root.display(),
        "serving media on {}",
        config.media.http_addr
    );
    tracing::info!(
        "broadcasters publish to {}",
        config.media.ingest_url("<stream key>")
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let api_server = axum::serve(api_listener, api)
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));
    let media_server = axum::serve(media_listener, media)
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx));

    let served = tokio::try_join!(
        async { api_server.await },
        async { media_server.await },
    );

    let stopped = state.media.stop_all();
    tracing::info!(stopped, "media processes signalled to stop");
    if !state.media.wait_idle(MEDIA_STOP_TIMEOUT).await {
        tracing::warn!(
            remaining = state.media.active_count(),
            "media processes still running at shutdown"
        );
    }
    state.db.close().await;

    served?;
    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
