//! Hermes CLI.
//!
//! A thin configuration inspection tool: parses a server/client
//! configuration document and reports whether it is valid, printing the
//! resolved device table on success. Talking to an already-running
//! daemon is an RPC concern and out of scope for the core (see
//! `spec.md` §1) — this binary never opens a socket.

use std::process::ExitCode;

use hermes_core::config::{ClientConfig, ServerConfig};
use hermes_core::HermesError;

fn main() -> ExitCode {
    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║                      Hermes CLI                           ║");
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: hermes-core-cli <config.json>");
        return ExitCode::from(2);
    };

    match validate(&path) {
        Ok(server) => {
            println!("configuration OK: {} device(s)", server.devices.len());
            for dev in &server.devices {
                println!(
                    "  {:<12} {:?}  capacity={:?}  thresh={:?}",
                    dev.dev_name, dev.io_api, dev.capacity, dev.borg_capacity_thresh
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("configuration invalid: {e}");
            ExitCode::from(1)
        }
    }
}

fn validate(path: &str) -> hermes_core::Result<ServerConfig> {
    let text = std::fs::read_to_string(path)?;
    #[derive(serde::Deserialize)]
    struct Combined {
        #[serde(default)]
        server: ServerConfig,
        #[serde(default)]
        client: ClientConfig,
    }
    let combined: Combined =
        serde_json::from_str(&text).map_err(|e| HermesError::ConfigInvalid(e.to_string()))?;
    combined.server.validate()?;
    Ok(combined.server)
}
