//! Shared harness for the socket-level tests.
//!
//! - [`spawn_relay`] runs a relay on an ephemeral localhost port.
//! - [`RawPeer`] speaks the wire protocol directly, for asserting exactly
//!   what the relay sends (and does not send).
//! - [`pump_until`] drives full [`GameClient`]s until a condition holds.

use std::time::{Duration, Instant};

use tokio::{
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    sync::oneshot,
    task::JoinHandle,
};
use zone_client::GameClient;
use zone_server::server::bind_ephemeral;
use zone_shared::{
    config::ZoneConfig,
    net::{connect, decode_server, ClientMsg, FrameReader, FrameWriter, ServerMsg},
};

/// Time for freshly opened connections to be registered by the relay.
pub const SETTLE: Duration = Duration::from_millis(100);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// A relay running in the background.
pub struct RelayHandle {
    pub cfg: ZoneConfig,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl RelayHandle {
    /// Stops the relay and waits for its loop to exit.
    pub async fn stop(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.await?
    }
}

/// Binds a relay to an ephemeral port and runs it on a background task.
pub async fn spawn_relay(assign_identities: bool) -> anyhow::Result<RelayHandle> {
    let (server, cfg) = bind_ephemeral(ZoneConfig {
        assign_identities,
        ..Default::default()
    })
    .await?;

    let (tx, rx) = oneshot::channel::<()>();
    let task = tokio::spawn(server.run_until(async {
        let _ = rx.await;
    }));
    Ok(RelayHandle {
        cfg,
        shutdown: Some(tx),
        task,
    })
}

/// A bare protocol endpoint.
pub struct RawPeer {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
}

impl RawPeer {
    pub async fn connect(cfg: &ZoneConfig) -> anyhow::Result<Self> {
        let (reader, writer) = connect(cfg.server_addr.parse()?).await?;
        Ok(Self { reader, writer })
    }

    pub async fn send(&mut self, msg: &ClientMsg) -> anyhow::Result<()> {
        self.writer.send(msg).await
    }

    pub async fn send_raw(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        self.writer.send_frame(payload).await
    }

    /// Next relay message, or `None` if nothing arrives within `within`.
    pub async fn recv_within(&mut self, within: Duration) -> anyhow::Result<Option<ServerMsg>> {
        match tokio::time::timeout(within, self.reader.next_frame()).await {
            Ok(Ok(Some(frame))) => Ok(Some(decode_server(&frame)?)),
            Ok(Ok(None)) => anyhow::bail!("relay closed the connection"),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }

    /// Next relay message; fails after one second.
    pub async fn recv(&mut self) -> anyhow::Result<ServerMsg> {
        match self.recv_within(Duration::from_secs(1)).await? {
            Some(msg) => Ok(msg),
            None => anyhow::bail!("timed out waiting for relay message"),
        }
    }
}

/// Polls every client until `done` holds or `limit` elapses.
pub async fn pump_until<F>(
    clients: &mut [GameClient],
    limit: Duration,
    mut done: F,
) -> anyhow::Result<bool>
where
    F: FnMut(&[GameClient]) -> bool,
{
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if done(clients) {
            return Ok(true);
        }
        for client in clients.iter_mut() {
            client.poll(Duration::from_millis(5)).await?;
        }
    }
    Ok(done(clients))
}
