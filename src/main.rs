//! Switchboard HTTP server
//!
//! Starts an Axum web server that routes AI provider requests through
//! declarative routing documents.

use clap::Parser;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use switchboard::{
    cli::{self, Cli, Command},
    config::Config,
    handlers::{self, AppState},
    telemetry,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Config { output }) => {
            let template = cli::generate_config_template();
            match output {
                Some(path) => {
                    std::fs::write(&path, template)?;
                    println!("Wrote configuration template to {}", path);
                }
                None => print!("{}", template),
            }
            return Ok(());
        }
        Some(Command::ValidateRouting { file }) => {
            let tree = cli::validate_routing_file(Path::new(&file))?;
            println!("{}", tree);
            return Ok(());
        }
        None => {}
    }

    let config = Arc::new(Config::from_file(&cli.config)?);

    telemetry::init(&config.observability.log_level);

    tracing::info!(
        "Starting Switchboard server on {}:{}",
        config.server.host,
        config.server.port
    );

    let state = AppState::new(config.clone())?;
    let gateway = state.gateway().clone();
    let app = handlers::build_router(state);

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    ));

    tracing::info!("Listening on {}", addr);
    tracing::info!("Gateway available at http://{}/v1/", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(
        pending = gateway.tasks().pending(),
        "Draining background tasks before exit"
    );
    gateway.tasks().wait_idle().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
