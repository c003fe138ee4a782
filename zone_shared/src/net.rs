//! Networking primitives.
//!
//! Goals:
//! - A closed, tagged set of wire events, validated at the decode boundary.
//! - A reliable TCP channel carrying length-prefixed JSON frames.
//! - Keep serialization explicit and versionable.
//!
//! Wire shape of every frame: `u32` big-endian payload length, then a JSON
//! document `{"event": "<name>", "data": <payload>}`.

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

use crate::math::{Quat, Vec3};

/// Largest accepted frame payload. Anything bigger closes the connection.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Transport-level connection identifier. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn new_unique() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Client-chosen peer identity.
///
/// Only unique-enough: two clients may pick the same value, which the relay
/// does not detect. Zero is reserved as "no identity".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Picks a random non-zero id.
    pub fn random() -> Self {
        PeerId(rand::thread_rng().gen_range(1..u64::MAX))
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `join` payload: first announcement of presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub id: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// `identity` payload. With `target` set the relay unicasts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: PeerId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PeerId>,
}

/// Pose update. Relayed verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Move {
    pub id: PeerId,
    pub pos: Vec3,
    pub rot: Quat,
}

/// Identity assigned to a joining session by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedIdentity {
    pub name: String,
    pub model: String,
}

/// New peer notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerAnnounce {
    pub id: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Peer identity, initial or updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub id: PeerId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Client -> relay events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMsg {
    Join(Join),
    Identity(Identity),
    Move(Move),
}

impl ClientMsg {
    /// Sender-declared peer id carried by every client event.
    pub fn peer_id(&self) -> PeerId {
        match self {
            ClientMsg::Join(j) => j.id,
            ClientMsg::Identity(i) => i.id,
            ClientMsg::Move(m) => m.id,
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.peer_id().is_valid(), "peer id must be non-zero");
        Ok(())
    }
}

/// Relay -> client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMsg {
    SelfIdentity(AssignedIdentity),
    OtherJoin(PeerAnnounce),
    OtherIdentity(PeerIdentity),
    OtherMove(Move),
    OtherDisconnect(PeerId),
}

/// Serializes any wire message to a JSON payload (no length prefix).
pub fn encode_to_bytes<T: Serialize>(msg: &T) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

/// Decodes and validates a client event.
pub fn decode_client(b: &[u8]) -> anyhow::Result<ClientMsg> {
    let msg: ClientMsg = serde_json::from_slice(b).context("deserialize client msg")?;
    msg.validate()?;
    Ok(msg)
}

/// Decodes a relay event.
pub fn decode_server(b: &[u8]) -> anyhow::Result<ServerMsg> {
    serde_json::from_slice(b).context("deserialize server msg")
}

/// Reads length-prefixed frames.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Returns the next frame payload, or `None` once the peer closed the stream.
    pub async fn next_frame(&mut self) -> anyhow::Result<Option<Bytes>> {
        let mut len_buf = [0u8; 4];
        match self.inner.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e).context("tcp read len"),
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        anyhow::ensure!(len <= MAX_FRAME_LEN, "frame of {len} bytes exceeds limit");

        let mut payload = BytesMut::zeroed(len);
        self.inner
            .read_exact(&mut payload)
            .await
            .context("tcp read payload")?;
        Ok(Some(payload.freeze()))
    }
}

/// Writes length-prefixed frames.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send_frame(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        anyhow::ensure!(
            payload.len() <= MAX_FRAME_LEN,
            "frame of {} bytes exceeds limit",
            payload.len()
        );
        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(payload);
        self.inner.write_all(&buf).await.context("tcp write")?;
        Ok(())
    }

    pub async fn send<T: Serialize>(&mut self, msg: &T) -> anyhow::Result<()> {
        let payload = encode_to_bytes(msg)?;
        self.send_frame(&payload).await
    }
}

/// Splits a TCP stream into independently owned frame halves.
pub fn split_stream(
    stream: TcpStream,
) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
    let (read, write) = stream.into_split();
    (FrameReader::new(read), FrameWriter::new(write))
}

/// Connects to a relay and returns the frame halves.
pub async fn connect(
    addr: SocketAddr,
) -> anyhow::Result<(FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>)> {
    let stream = TcpStream::connect(addr).await.context("tcp connect")?;
    stream.set_nodelay(true).context("tcp nodelay")?;
    Ok(split_stream(stream))
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(
        &self,
    ) -> anyhow::Result<(FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        let (reader, writer) = split_stream(stream);
        Ok((reader, writer, addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}
