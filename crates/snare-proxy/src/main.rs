use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use snare_observe::NoopEventSink;
use snare_proxy::{ProxyConfig, ProxyServer};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match load_config() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "configuration error");
            return ExitCode::from(2);
        }
    };

    let server = match ProxyServer::new(config, Arc::new(NoopEventSink)) {
        Ok(server) => server,
        Err(error) => {
            tracing::error!(%error, "certificate authority bootstrap failed");
            return ExitCode::from(3);
        }
    };

    let listener = match server.bind().await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, "failed to bind listener");
            return ExitCode::from(4);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    match server.run_until_shutdown(listener, shutdown_rx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "acceptor failed");
            ExitCode::FAILURE
        }
    }
}

fn load_config() -> Result<ProxyConfig, snare_proxy::ConfigError> {
    match std::env::args().nth(1) {
        Some(path) => ProxyConfig::load(&PathBuf::from(path)),
        None => {
            let config = ProxyConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(error) => {
            tracing::warn!(%error, "SIGTERM handler unavailable");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
