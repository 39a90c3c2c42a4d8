//! Networking primitives.
//!
//! Goals:
//! - Provide the message catalog exchanged between clients and the server.
//! - Provide length-prefixed JSON framing over a reliable TCP stream.
//! - Keep serialization explicit and versionable.
//!
//! A frame is a 4-byte big-endian payload length followed by the JSON payload.

use anyhow::{bail, Context};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};

use crate::{
    entity::{EntityId, EntityState},
    math::Vec3,
    store::Snapshot,
};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a single frame payload.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Client -> server messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClientMsg {
    /// First frame on every connection.
    Hello { protocol: u32 },
    /// Latest locally simulated pose of the sender's vehicle.
    Move { position: Vec3, orientation: Vec3 },
}

/// Server -> client messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ServerMsg {
    /// Tells a new client which entity is its own.
    Welcome { id: EntityId },
    /// Full store contents, sent only to a newly connected client.
    Snapshot { entities: Snapshot },
    /// Another client connected.
    Joined(EntityState),
    /// Another client reported a new pose.
    Moved {
        id: EntityId,
        position: Vec3,
        orientation: Vec3,
    },
    /// A client disconnected.
    Left { id: EntityId },
    /// Periodic full-state reconciliation.
    FullSync { entities: Snapshot },
}

impl ServerMsg {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMsg::Welcome { .. } => "welcome",
            ServerMsg::Snapshot { .. } => "snapshot",
            ServerMsg::Joined(_) => "joined",
            ServerMsg::Moved { .. } => "moved",
            ServerMsg::Left { .. } => "left",
            ServerMsg::FullSync { .. } => "full-sync",
        }
    }
}

/// Reading half of a framed connection.
///
/// Partially received frames stay in an internal buffer, so a `recv` future
/// dropped by `select!` or a timeout loses no bytes.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_len: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(4096),
            max_len,
        }
    }

    /// Reads one frame. Returns `Ok(None)` on a clean close between frames.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> anyhow::Result<Option<T>> {
        loop {
            if let Some(payload) = self.next_frame()? {
                return decode_frame(&payload).map(Some);
            }
            let n = self
                .inner
                .read_buf(&mut self.buf)
                .await
                .context("tcp read")?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                bail!("connection closed inside a frame");
            }
        }
    }

    fn next_frame(&mut self) -> anyhow::Result<Option<Bytes>> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let mut header = &self.buf[..4];
        let len = header.get_u32() as usize;
        if len > self.max_len {
            bail!("frame of {len} bytes exceeds limit of {}", self.max_len);
        }
        if self.buf.len() < 4 + len {
            self.buf.reserve(4 + len - self.buf.len());
            return Ok(None);
        }
        self.buf.advance(4);
        Ok(Some(self.buf.split_to(len).freeze()))
    }
}

/// Writing half of a framed connection.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send<T: Serialize>(&mut self, msg: &T) -> anyhow::Result<()> {
        let frame = encode_frame(msg)?;
        self.inner.write_all(&frame).await.context("tcp write")?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.inner.shutdown().await.context("tcp shutdown")
    }
}

/// Splits a TCP stream into framed halves.
pub fn split(
    stream: TcpStream,
    max_len: usize,
) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
    let (r, w) = stream.into_split();
    (FrameReader::new(r, max_len), FrameWriter::new(w))
}

/// Encodes a message as a length-prefixed frame.
pub fn encode_frame<T: Serialize>(msg: &T) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    let len = u32::try_from(payload.len()).context("frame too large")?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(len);
    buf.extend_from_slice(&payload);
    Ok(buf.freeze())
}

/// Decodes a frame payload (without the length prefix).
pub fn decode_frame<T: DeserializeOwned>(payload: &[u8]) -> anyhow::Result<T> {
    serde_json::from_slice(payload).context("deserialize msg")
}
