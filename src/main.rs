//! Hermes daemon entry point.
//!
//! Loads a `ServerConfig`/`ClientConfig` pair (JSON, for now — full YAML
//! plus `HERMES_*` environment overrides is the job of an external
//! config loader per the core's scope), wires up the engine, and runs
//! the BORG background loop until interrupted.

use std::path::PathBuf;
use std::process::ExitCode;

use hermes_core::config::{ClientConfig, ServerConfig};
use hermes_core::context::Hermes;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    print_banner();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let (server_config, client_config) = match load_config(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load configuration: {e}");
            return ExitCode::from(2);
        }
    };

    let hermes = match Hermes::start(server_config, client_config) {
        Ok(h) => h,
        Err(e) => {
            error!("failed to initialize Hermes: {e}");
            return ExitCode::from(1);
        }
    };
    hermes_core::context::set_global(hermes.clone());
    hermes.spawn_borg();

    println!();
    println!("╭─────────────────────────────────────────────────────────╮");
    println!("│  Hermes is ready                                         │");
    println!("│  Devices online: {:<40} │", hermes.devices.len());
    println!("╰─────────────────────────────────────────────────────────╯");
    println!();

    info!("Hermes started, {} device(s) online", hermes.devices.len());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
        return ExitCode::from(1);
    }

    info!("shutdown signal received");
    let _ = hermes.stop();
    info!("Hermes stopped");
    ExitCode::SUCCESS
}

fn load_config(path: Option<&std::path::Path>) -> hermes_core::Result<(ServerConfig, ClientConfig)> {
    let Some(path) = path else {
        return Ok((ServerConfig::default(), ClientConfig::default()));
    };
    let text = std::fs::read_to_string(path)?;
    #[derive(serde::Deserialize)]
    struct Combined {
        #[serde(default)]
        server: ServerConfig,
        #[serde(default)]
        client: ClientConfig,
    }
    let combined: Combined = serde_json::from_str(&text)
        .map_err(|e| hermes_core::HermesError::ConfigInvalid(e.to_string()))?;
    Ok((combined.server, combined.client))
}

fn print_banner() {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║                    Hermes Buffering Engine                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
}
