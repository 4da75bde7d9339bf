#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use duos::config::{Args, ServerConfig};
use duos::run;
use duos::server::ServerState;
use duos::status::serve_status;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duos=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config: ServerConfig = args.into();

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let classifier = config.classifier()?;
    info!("control phrase: {}", classifier.control().phrase());

    let state = Arc::new(ServerState::new(config.clone(), classifier));

    let listener = TcpListener::bind(config.listen).await?;
    info!("bound to {}", config.listen);
    let status_listener = TcpListener::bind(config.status_addr).await?;

    let metrics_handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("metrics recorder unavailable: {}", e);
            None
        }
    };

    tokio::spawn({
        let state = Arc::clone(&state);
        async move {
            if let Err(e) = serve_status(status_listener, state, metrics_handle).await {
                warn!("status server error: {}", e);
            }
        }
    });

    tokio::spawn({
        let state = Arc::clone(&state);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received shutdown signal");
                state.shutdown.request_stop();
            }
        }
    });

    match run(listener, state).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            error!("relay stopped: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}
