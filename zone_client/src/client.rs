//! Client implementation.
//!
//! The client maintains:
//! - A reliable stream to the relay (framed JSON both ways)
//! - A reader task feeding inbound frames into one event queue
//! - Asset load tasks whose completions land in the same queue
//! - The [`ClientWorld`] core, touched only from the event loop
//!
//! Everything that mutates entity state runs on the caller's task, one event
//! at a time.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use bytes::Bytes;
use tokio::{net::tcp::OwnedWriteHalf, sync::mpsc};
use tracing::{debug, info};
use zone_shared::{
    config::ZoneConfig,
    net::{connect, decode_server, ClientMsg, FrameWriter, PeerId},
    sanitize::{sanitize_display_name, sanitize_model_key},
};

use crate::{
    assets::{AssetSource, Font, Model},
    input::InputState,
    tick::{FrameStep, TickDriver},
    world::{ClientWorld, Effects, LoadRequest, LocalIdentity},
};

const EVENT_QUEUE: usize = 256;

/// Something the event loop has to react to.
#[derive(Debug)]
pub enum ClientEvent {
    Frame(Bytes),
    Closed,
    ModelLoaded(String, anyhow::Result<Model>),
    FontLoaded(anyhow::Result<Font>),
}

/// High-level game client.
pub struct GameClient {
    pub cfg: ZoneConfig,
    pub world: ClientWorld,
    pub connected: bool,
    writer: FrameWriter<OwnedWriteHalf>,
    events_tx: mpsc::Sender<ClientEvent>,
    events_rx: mpsc::Receiver<ClientEvent>,
    assets: Arc<dyn AssetSource>,
    ticks: TickDriver,
}

impl GameClient {
    /// Connects to the relay and announces this client.
    pub async fn connect(cfg: &ZoneConfig, assets: Arc<dyn AssetSource>) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        info!(server = %server_addr, "Connecting to relay");

        let (mut reader, writer) = connect(server_addr).await?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);

        let tx = events_tx.clone();
        tokio::spawn(async move {
            loop {
                match reader.next_frame().await {
                    Ok(Some(frame)) => {
                        if tx.send(ClientEvent::Frame(frame)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "Relay read failed");
                        break;
                    }
                }
            }
            let _ = tx.send(ClientEvent::Closed).await;
        });

        let local = LocalIdentity {
            peer_id: PeerId::random(),
            name: cfg
                .player_name
                .as_deref()
                .map(sanitize_display_name)
                .filter(|n| !n.is_empty()),
            model: cfg
                .player_model
                .as_deref()
                .map(sanitize_model_key)
                .filter(|m| !m.is_empty()),
        };
        info!(peer_id = %local.peer_id, name = local.name.as_deref().unwrap_or(""), "Joining");

        let ticks = TickDriver::new(cfg.tick_hz, cfg.frame_hz);
        let mut client = Self {
            cfg: cfg.clone(),
            world: ClientWorld::new(local, ticks.tick_rate()),
            connected: true,
            writer,
            events_tx,
            events_rx,
            assets,
            ticks,
        };

        let join = client.world.join_msg();
        client.send(&join).await?;
        Ok(client)
    }

    pub fn peer_id(&self) -> PeerId {
        self.world.local.peer_id
    }

    pub async fn send(&mut self, msg: &ClientMsg) -> anyhow::Result<()> {
        self.writer.send(msg).await
    }

    /// Waits for the next event. Cancel-safe.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events_rx.recv().await
    }

    /// Applies one event. Returns `false` once the relay connection is gone.
    pub async fn handle_event(&mut self, event: ClientEvent) -> anyhow::Result<bool> {
        match event {
            ClientEvent::Frame(frame) => match decode_server(&frame) {
                Ok(msg) => {
                    let fx = self.world.handle(msg, Instant::now());
                    self.apply(fx).await?;
                }
                Err(e) => debug!(error = %e, "Dropping malformed relay message"),
            },
            ClientEvent::Closed => {
                info!("Relay connection closed");
                self.connected = false;
            }
            ClientEvent::ModelLoaded(key, Ok(model)) => {
                if model.key == key {
                    self.world.model_loaded(model);
                } else {
                    self.world
                        .model_failed(&key, &anyhow::anyhow!("source returned model {:?}", model.key));
                }
            }
            ClientEvent::ModelLoaded(key, Err(e)) => self.world.model_failed(&key, &e),
            ClientEvent::FontLoaded(Ok(font)) => self.world.font_loaded(font),
            ClientEvent::FontLoaded(Err(e)) => self.world.font_failed(&e),
        }
        Ok(self.connected)
    }

    /// Handles whatever arrives within `timeout`, then everything already queued.
    pub async fn poll(&mut self, timeout: Duration) -> anyhow::Result<bool> {
        if let Ok(Some(event)) = tokio::time::timeout(timeout, self.events_rx.recv()).await {
            if !self.handle_event(event).await? {
                return Ok(false);
            }
        }
        while let Ok(event) = self.events_rx.try_recv() {
            if !self.handle_event(event).await? {
                return Ok(false);
            }
        }
        Ok(self.connected)
    }

    async fn apply(&mut self, fx: Effects) -> anyhow::Result<()> {
        for msg in &fx.outbound {
            self.send(msg).await?;
        }
        for load in fx.loads {
            self.spawn_load(load);
        }
        Ok(())
    }

    fn spawn_load(&self, load: LoadRequest) {
        let assets = Arc::clone(&self.assets);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let event = match load {
                LoadRequest::Model(key) => {
                    let result = assets.load_model(&key).await;
                    ClientEvent::ModelLoaded(key, result)
                }
                LoadRequest::Font => ClientEvent::FontLoaded(assets.load_font().await),
            };
            let _ = tx.send(event).await;
        });
    }

    /// One render frame: move the local player, interpolate peers, and
    /// broadcast the local pose when a tick is due.
    pub async fn frame(&mut self, now: Instant, input: &InputState) -> anyhow::Result<FrameStep> {
        let step = self.ticks.frame(now);
        self.world.player.apply(input, step.dt);
        self.world.frame(step.dt);
        if step.broadcast && self.connected {
            let mv = self.world.move_msg();
            self.send(&mv).await?;
        }
        Ok(step)
    }

    /// Liveness sweep for peers that vanished without a departure notice.
    pub fn sweep(&mut self, now: Instant) -> Vec<PeerId> {
        self.world.sweep(now, self.cfg.liveness_window())
    }
}
