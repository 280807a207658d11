mod cli;
mod config;
mod error;
mod routes;
mod state;

use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{Level, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::{Args, Commands, ConfigAction},
    config::AppConfig,
    routes::{create_router, extract::ExtractQuery},
    state::AppState,
};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Application error: {e:#}");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref())?;

    init_logging(args.verbose, args.quiet, args.json_logs || config.server.json_logs);

    match args.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            serve(&config, &host, port).await
        }
        Commands::Resolve {
            id,
            media_type,
            season,
            episode,
            provider,
            id_system,
        } => {
            let request = ExtractQuery {
                id: Some(id),
                media_type: Some(media_type),
                season: season.map(|s| s.to_string()),
                episode: episode.map(|e| e.to_string()),
                provider,
                id_system,
            }
            .into_request()
            .map_err(anyhow::Error::msg)?;

            let state = AppState::from_config(&config)?;
            let result = state.registry.extract(&request).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_success() {
                process::exit(2);
            }
            Ok(())
        }
        Commands::Config { action } => {
            match action {
                ConfigAction::Show => println!("{}", config.show()?),
                ConfigAction::Path => match AppConfig::default_config_path() {
                    Some(path) => println!("{}", path.display()),
                    None => println!("No configuration directory on this platform"),
                },
            }
            Ok(())
        }
    }
}

async fn serve(config: &AppConfig, host: &str, port: u16) -> Result<()> {
    let state = AppState::from_config(config)?;
    let app = create_router(state);

    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind {host}:{port}"))?;
    info!(address = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn init_logging(verbose: bool, quiet: bool, json: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_level(true))
            .init();
    }
}
