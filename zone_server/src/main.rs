//! Standalone relay binary.
//!
//! Usage:
//!   cargo run -p zone_server -- [--config zone.json] [--addr 127.0.0.1:40000] [--no-assign]
//!
//! The relay accepts client connections and fans presence and movement events
//! out to every other connected client. It stops on Ctrl-C.

use std::env;
use std::path::Path;

use anyhow::Context;
use tracing::info;
use zone_server::server::RelayServer;
use zone_shared::config::ZoneConfig;

fn parse_args() -> anyhow::Result<ZoneConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => ZoneConfig::load(Path::new(&args[i + 1]))?,
        _ => ZoneConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--no-assign" => {
                cfg.assign_identities = false;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(
        addr = %cfg.server_addr,
        assign_identities = cfg.assign_identities,
        "Starting relay"
    );

    let server = RelayServer::bind(cfg).await.context("bind relay")?;
    let local = server.local_addr()?;
    info!(%local, "Relay listening");

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
