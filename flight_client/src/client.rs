//! Client implementation.
//!
//! The client maintains:
//! - One framed TCP connection to the server
//! - Its own entity id, learned from the `Welcome` message
//! - The remote roster, updated by every message it receives

use std::time::Duration;

use anyhow::Context;
use flight_shared::{
    config::FlightConfig,
    entity::EntityId,
    net::{self, ClientMsg, FrameReader, FrameWriter, ServerMsg, PROTOCOL_VERSION},
};
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpStream,
};
use tracing::{debug, info, warn};

use crate::{
    flight::Aircraft,
    roster::{Roster, RosterDelta},
};

/// How long `connect` waits for the `Welcome`.
pub const WELCOME_TIMEOUT: Duration = Duration::from_secs(5);

/// Client connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// Receiving updates.
    Connected,
    /// Server closed the connection or it failed.
    Disconnected,
}

/// High-level flight client.
pub struct FlightClient {
    pub id: EntityId,
    pub state: ClientState,
    pub roster: Roster,

    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
}

impl FlightClient {
    /// Connects to a server and performs the handshake.
    pub async fn connect(cfg: &FlightConfig) -> anyhow::Result<Self> {
        let server_addr = cfg.socket_addr()?;
        info!(server = %server_addr, "Connecting to server");

        let stream = TcpStream::connect(server_addr)
            .await
            .context("tcp connect")?;
        stream.set_nodelay(true).context("set nodelay")?;
        let (mut reader, mut writer) = net::split(stream, cfg.max_frame_len);

        writer
            .send(&ClientMsg::Hello {
                protocol: PROTOCOL_VERSION,
            })
            .await?;

        let welcome = tokio::time::timeout(WELCOME_TIMEOUT, reader.recv::<ServerMsg>())
            .await
            .context("timed out waiting for welcome")??;
        let id = match welcome {
            Some(ServerMsg::Welcome { id }) => id,
            Some(other) => anyhow::bail!("expected Welcome, got {}", other.kind()),
            None => anyhow::bail!("server closed connection during handshake"),
        };

        let mut roster = Roster::new();
        roster.apply(&ServerMsg::Welcome { id: id.clone() });
        info!(entity = %id, "Connected to server");

        Ok(Self {
            id,
            state: ClientState::Connected,
            roster,
            reader,
            writer,
        })
    }

    /// Reports the aircraft's current pose.
    pub async fn send_move(&mut self, aircraft: &Aircraft) -> anyhow::Result<()> {
        self.writer
            .send(&ClientMsg::Move {
                position: aircraft.position,
                orientation: aircraft.orientation,
            })
            .await
    }

    /// Waits up to `timeout` for one server message and applies it to the
    /// roster. Returns `None` on timeout or disconnect.
    pub async fn poll(
        &mut self,
        timeout: Duration,
    ) -> anyhow::Result<Option<(ServerMsg, RosterDelta)>> {
        if self.state == ClientState::Disconnected {
            return Ok(None);
        }
        match tokio::time::timeout(timeout, self.reader.recv::<ServerMsg>()).await {
            Ok(Ok(Some(msg))) => {
                let delta = self.roster.apply(&msg);
                debug!(kind = msg.kind(), ?delta, "Server message");
                Ok(Some((msg, delta)))
            }
            Ok(Ok(None)) => {
                info!("Server closed connection");
                self.state = ClientState::Disconnected;
                Ok(None)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Connection error");
                self.state = ClientState::Disconnected;
                Err(e)
            }
            Err(_) => Ok(None),
        }
    }

    /// Applies every message that arrives within `window`.
    pub async fn drain(&mut self, window: Duration) -> anyhow::Result<usize> {
        let deadline = tokio::time::Instant::now() + window;
        let mut n = 0;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            if left.is_zero() {
                return Ok(n);
            }
            match self.poll(left).await? {
                Some(_) => n += 1,
                None => return Ok(n),
            }
        }
    }

    /// Closes the connection; the server treats this as a disconnect.
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.state = ClientState::Disconnected;
        self.writer.shutdown().await
    }
}
