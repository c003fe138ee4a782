//! Relay server.
//!
//! Wraps the sans-IO [`Relay`] in a tokio event loop:
//! - one reader task per connection, forwarding raw frames to the loop
//! - one writer task per connection, draining a bounded outbox
//! - a single loop that applies every connection event to the relay in
//!   arrival order, so each message is fully fanned out before the next
//!
//! Sends to a connection whose writer already stopped, or whose outbox is
//! full because it stopped reading, are discarded.

use std::{
    collections::HashMap,
    future::Future,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

use anyhow::Context;
use bytes::Bytes;
use tokio::{
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    sync::mpsc,
};
use tracing::{debug, info, warn};
use zone_shared::{
    config::ZoneConfig,
    net::{encode_to_bytes, ConnectionId, FrameReader, FrameWriter, ReliableListener},
};

use crate::{
    names::IdentityPool,
    relay::{Delivery, Relay},
};

/// Capacity of the shared inbound event queue.
const EVENT_QUEUE: usize = 1024;

/// Frames buffered per connection before further sends to it are dropped.
const OUTBOX_LEN: usize = 256;

/// Something that happened on a connection.
#[derive(Debug)]
enum ConnEvent {
    Frame(ConnectionId, Bytes),
    Closed(ConnectionId),
}

/// Relay server bound to a listening socket.
pub struct RelayServer {
    pub cfg: ZoneConfig,
    listener: ReliableListener,
    relay: Relay,
    outboxes: HashMap<ConnectionId, mpsc::Sender<Bytes>>,
    events_tx: mpsc::Sender<ConnEvent>,
    events_rx: mpsc::Receiver<ConnEvent>,
}

impl RelayServer {
    /// Binds the listener described by `cfg`.
    pub async fn bind(cfg: ZoneConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = ReliableListener::bind(addr).await?;

        let identities = cfg
            .assign_identities
            .then(|| IdentityPool::new(&cfg.name_pool, &cfg.model_pool));
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);

        Ok(Self {
            cfg,
            listener,
            relay: Relay::new(identities),
            outboxes: HashMap::new(),
            events_tx,
            events_rx,
        })
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Serves until the process ends.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` resolves.
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((reader, writer, addr)) => self.on_accept(reader, writer, addr),
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                Some(event) = self.events_rx.recv() => self.on_event(event),
                _ = &mut shutdown => {
                    info!(sessions = self.relay.registry().len(), "Relay shutting down");
                    return Ok(());
                }
            }
        }
    }

    fn on_accept(
        &mut self,
        mut reader: FrameReader<OwnedReadHalf>,
        mut writer: FrameWriter<OwnedWriteHalf>,
        addr: SocketAddr,
    ) {
        let connection_id = ConnectionId::new_unique();
        info!(%connection_id, %addr, "Connection opened");

        // Register before the reader can produce frames for it.
        self.relay.connect(connection_id);

        let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(OUTBOX_LEN);
        self.outboxes.insert(connection_id, out_tx);

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = writer.send_frame(&frame).await {
                    debug!(%connection_id, error = %e, "Write failed, dropping outbox");
                    break;
                }
            }
        });

        let events = self.events_tx.clone();
        tokio::spawn(async move {
            loop {
                match reader.next_frame().await {
                    Ok(Some(frame)) => {
                        if events
                            .send(ConnEvent::Frame(connection_id, frame))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(%connection_id, error = %e, "Read failed");
                        break;
                    }
                }
            }
            let _ = events.send(ConnEvent::Closed(connection_id)).await;
        });
    }

    fn on_event(&mut self, event: ConnEvent) {
        let deliveries = match event {
            ConnEvent::Frame(from, frame) => self.relay.handle_frame(from, &frame),
            ConnEvent::Closed(connection_id) => {
                info!(%connection_id, "Connection closed");
                self.outboxes.remove(&connection_id);
                self.relay.disconnect(connection_id)
            }
        };
        self.dispatch(deliveries);
    }

    fn dispatch(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            let payload = match encode_to_bytes(&delivery.msg) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "Failed to encode outbound message");
                    continue;
                }
            };
            for to in delivery.recipients {
                if let Some(outbox) = self.outboxes.get(&to) {
                    offer(outbox, to, payload.clone());
                }
            }
        }
    }
}

/// Queues `payload` without waiting. Returns whether it was queued.
fn offer(outbox: &mpsc::Sender<Bytes>, to: ConnectionId, payload: Bytes) -> bool {
    match outbox.try_send(payload) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!(connection_id = %to, "Outbox full, dropping frame");
            false
        }
        // Closed writer: the connection's Closed event is on its way.
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Helper for tests: bind `cfg` to an ephemeral localhost port.
///
/// Returns the server and the config with the actual address filled in.
pub async fn bind_ephemeral(cfg: ZoneConfig) -> anyhow::Result<(RelayServer, ZoneConfig)> {
    let cfg = ZoneConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        ..cfg
    };
    let mut server = RelayServer::bind(cfg).await?;
    server.cfg.server_addr = server.local_addr()?.to_string();
    let cfg = server.cfg.clone();
    Ok((server, cfg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_outbox_drops_instead_of_growing() {
        let (tx, mut rx) = mpsc::channel::<Bytes>(2);
        let to = ConnectionId(1);
        assert!(offer(&tx, to, Bytes::from_static(b"a")));
        assert!(offer(&tx, to, Bytes::from_static(b"b")));
        assert!(!offer(&tx, to, Bytes::from_static(b"c")));

        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"a"));
        assert!(offer(&tx, to, Bytes::from_static(b"d")));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"b"));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"d"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_outbox_is_ignored() {
        let (tx, rx) = mpsc::channel::<Bytes>(2);
        drop(rx);
        assert!(!offer(&tx, ConnectionId(1), Bytes::from_static(b"a")));
    }
}
