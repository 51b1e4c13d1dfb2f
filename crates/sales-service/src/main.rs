//! Sales service entry point.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use sales_service::{Config, LogFormat, StartupError};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, shutting down");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (pretty, json) = match config.log_format {
        LogFormat::Pretty => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .init();
}

async fn run(config: Config) -> sales_service::Result<()> {
    // Prometheus scrape endpoint
    let addr: SocketAddr = config
        .addr()
        .parse()
        .map_err(|e| StartupError::Metrics(format!("invalid address '{}': {e}", config.addr())))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| StartupError::Metrics(e.to_string()))?;
    tracing::info!(%addr, "metrics exporter listening");

    let services = sales_service::build_services(&config).await?;
    tracing::info!(encryption = %services.gateway.mode(), "sales service ready");

    tokio::select! {
        () = sales_service::reconcile_loop(
            &services.reconciler,
            config.reconcile_interval,
            config.reconcile_grace,
        ) => {}
        () = shutdown_signal() => {}
    }

    tracing::info!("sales service stopped");
    Ok(())
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    init_tracing(&config);
    tracing::info!(?config, "starting sales service");

    if let Err(err) = run(config).await {
        tracing::error!(error = %err, "sales service failed to start");
        std::process::exit(1);
    }
}
