//! Standalone headless client binary.
//!
//! Usage:
//!   cargo run -p zone_client -- [--config zone.json] [--addr 127.0.0.1:40000]
//!       [--name Owl] [--model owl] [--assets assets] [--wander]
//!
//! The client joins the relay, tracks every other peer, and broadcasts its
//! own pose at the tick rate. With `--wander` it walks in a slow circle so
//! other clients have something to watch. Stops on Ctrl-C.

use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::info;
use zone_client::{assets::FsAssetSource, input::InputState, GameClient};
use zone_shared::{
    config::ZoneConfig,
    math::{Quat, Vec3},
};

/// Yaw per frame while wandering.
const WANDER_TURN: f32 = 0.01;

fn parse_args() -> anyhow::Result<(ZoneConfig, bool)> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => ZoneConfig::load(Path::new(&args[i + 1]))?,
        _ => ZoneConfig::default(),
    };
    let mut wander = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.player_name = Some(args[i + 1].clone());
                i += 2;
            }
            "--model" if i + 1 < args.len() => {
                cfg.player_model = Some(args[i + 1].clone());
                i += 2;
            }
            "--assets" if i + 1 < args.len() => {
                cfg.assets_dir = args[i + 1].clone();
                i += 2;
            }
            "--wander" => {
                wander = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok((cfg, wander))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let (cfg, wander) = parse_args()?;
    info!(server = %cfg.server_addr, assets = %cfg.assets_dir, "Starting client");

    let assets = Arc::new(FsAssetSource::new(&cfg.assets_dir));
    let mut client = GameClient::connect(&cfg, assets).await.context("connect")?;
    info!(peer_id = %client.peer_id(), "Connected to relay");

    let input = InputState {
        captured: wander,
        forward: wander,
        ..Default::default()
    };
    let turn = Quat::from_axis_angle(Vec3::Y, WANDER_TURN);

    let mut frames =
        tokio::time::interval(Duration::from_secs_f32(1.0 / cfg.frame_hz.max(1) as f32));
    let mut sweeps = tokio::time::interval(cfg.sweep_interval());
    let mut reports = tokio::time::interval(Duration::from_secs(5));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = frames.tick() => {
                if wander {
                    client.world.player.look(turn);
                }
                client.frame(Instant::now(), &input).await?;
            }
            _ = sweeps.tick() => {
                client.sweep(Instant::now());
            }
            _ = reports.tick() => {
                let pos = client.world.player.pos;
                info!(
                    peers = client.world.store.len(),
                    x = pos.x,
                    y = pos.y,
                    z = pos.z,
                    "Status"
                );
            }
            Some(event) = client.next_event() => {
                if !client.handle_event(event).await? {
                    println!("Disconnected from relay.");
                    break;
                }
            }
            _ = &mut shutdown => break,
        }
    }

    Ok(())
}
