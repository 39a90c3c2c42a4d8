//! Shared helpers for the socket-level tests.

use std::time::Duration;

use flight_client::{client::ClientState, FlightClient};
use flight_server::{
    server::{bind_ephemeral, ShutdownHandle},
    SyncEngine,
};
use flight_shared::{config::FlightConfig, net::ServerMsg};
use tokio::task::JoinHandle;

/// Default time to wait for a specific message.
pub const WAIT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// A server running in the background on an ephemeral port.
pub struct RunningServer {
    pub cfg: FlightConfig,
    pub shutdown: ShutdownHandle,
    pub task: JoinHandle<anyhow::Result<SyncEngine>>,
}

impl RunningServer {
    pub async fn start(sync_interval_ms: u64) -> anyhow::Result<Self> {
        let (server, cfg) = bind_ephemeral(sync_interval_ms).await?;
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.run());
        Ok(Self {
            cfg,
            shutdown,
            task,
        })
    }

    pub async fn connect(&self) -> anyhow::Result<FlightClient> {
        FlightClient::connect(&self.cfg).await
    }

    /// Stops the server and returns its final engine.
    pub async fn stop(self) -> anyhow::Result<SyncEngine> {
        self.shutdown.trigger();
        tokio::time::timeout(WAIT, self.task).await??
    }
}

/// Polls until a message matching `pred` arrives, applying everything
/// received on the way to the client's roster.
pub async fn wait_for<F>(client: &mut FlightClient, mut pred: F) -> anyhow::Result<ServerMsg>
where
    F: FnMut(&ServerMsg) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let left = deadline.saturating_duration_since(tokio::time::Instant::now());
        anyhow::ensure!(!left.is_zero(), "timed out waiting for message");
        anyhow::ensure!(
            client.state == ClientState::Connected,
            "connection closed while waiting"
        );
        if let Some((msg, _)) = client.poll(left).await? {
            if pred(&msg) {
                return Ok(msg);
            }
        }
    }
}
