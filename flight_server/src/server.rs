//! Server implementation.
//!
//! Runtime layout:
//! - One accept loop hands every socket its own connection task.
//! - A connection task performs the handshake, forwards decoded client
//!   messages as [`SyncEvent`]s and reports the disconnect. A sibling writer
//!   task drains the connection's outbox into the socket.
//! - One dispatch task owns the [`SyncEngine`] and serializes every event,
//!   the reconciliation timer and operator console commands.
//!
//! A transport failure only ends the affected connection task.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use flight_shared::{
    config::FlightConfig,
    net::{self, ClientMsg, FrameWriter, ServerMsg, PROTOCOL_VERSION},
};
use tokio::{
    io::AsyncWrite,
    net::{TcpListener, TcpStream},
    sync::{mpsc, watch},
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    registry::ConnectionHandle,
    sync::{SyncEngine, SyncEvent},
};

/// Time a new connection has to send its `Hello`.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Cloneable trigger that stops a running server.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self(Arc::new(tx))
    }

    pub fn trigger(&self) {
        self.0.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.0.subscribe()
    }
}

/// Resolves once shutdown has been triggered (or the trigger is gone).
async fn shutdown_signal(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Flight sync server.
pub struct FlightServer {
    pub cfg: FlightConfig,
    engine: SyncEngine,
    listener: TcpListener,
    shutdown: ShutdownHandle,
    /// Channel for console commands from stdin.
    console_rx: Option<mpsc::Receiver<String>>,
}

impl FlightServer {
    /// Binds the listener described by `cfg`.
    pub async fn bind(cfg: FlightConfig) -> anyhow::Result<Self> {
        Self::with_engine(cfg, SyncEngine::new()).await
    }

    /// Binds with a caller-supplied engine (e.g. a seeded one).
    pub async fn with_engine(cfg: FlightConfig, engine: SyncEngine) -> anyhow::Result<Self> {
        cfg.validate().context("invalid config")?;
        let addr = cfg.socket_addr()?;
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;

        Ok(Self {
            cfg,
            engine,
            listener,
            shutdown: ShutdownHandle::new(),
            console_rx: None,
        })
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Runs until shutdown is triggered. Returns the final engine state.
    pub async fn run(self) -> anyhow::Result<SyncEngine> {
        let Self {
            cfg,
            engine,
            listener,
            shutdown,
            console_rx,
        } = self;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let dispatch = tokio::spawn(dispatch_loop(
            engine,
            event_rx,
            cfg.sync_interval(),
            console_rx,
            shutdown.clone(),
        ));

        let mut stop = shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_signal(&mut stop) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handle = ConnectionHandle::new_unique();
                        debug!(?handle, %peer, "Accepted connection");
                        tokio::spawn(serve_connection(
                            stream,
                            peer,
                            handle,
                            event_tx.clone(),
                            cfg.max_frame_len,
                            shutdown.subscribe(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
            }
        }

        drop(listener);
        let engine = dispatch.await.context("dispatch task")?;
        info!(entities = engine.store().len(), "Server stopped");
        Ok(engine)
    }
}

async fn dispatch_loop(
    mut engine: SyncEngine,
    mut events: mpsc::UnboundedReceiver<SyncEvent>,
    sync_every: Duration,
    mut console: Option<mpsc::Receiver<String>>,
    shutdown: ShutdownHandle,
) -> SyncEngine {
    let mut ticker = time::interval_at(Instant::now() + sync_every, sync_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stop = shutdown.subscribe();

    loop {
        tokio::select! {
            biased;
            _ = shutdown_signal(&mut stop) => break,
            _ = ticker.tick() => engine.handle(SyncEvent::Reconcile),
            Some(event) = events.recv() => engine.handle(event),
            line = next_console_line(&mut console) => match line {
                Some(line) => {
                    for out in exec_console(&mut engine, &line, &shutdown) {
                        println!("{out}");
                    }
                }
                None => console = None,
            },
        }
    }

    debug!("Dispatch loop stopped");
    engine
}

async fn next_console_line(rx: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Executes an operator console command.
pub fn exec_console(
    engine: &mut SyncEngine,
    line: &str,
    shutdown: &ShutdownHandle,
) -> Vec<String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(cmd) = tokens.first() else {
        return Vec::new();
    };

    match *cmd {
        "status" => {
            let store = engine.store();
            let mut out = vec![format!("Entities: {}", store.len())];
            for e in store.iter() {
                out.push(format!(
                    "  {} color={} pos=({:.1}, {:.1}, {:.1})",
                    e.id,
                    e.color.as_str(),
                    e.position.x,
                    e.position.y,
                    e.position.z
                ));
            }
            out
        }
        "sync" => {
            let sent = engine.reconcile();
            vec![format!("Full sync sent to {sent} clients")]
        }
        "quit" | "exit" => {
            info!("Server shutting down");
            shutdown.trigger();
            vec!["Shutting down".to_string()]
        }
        "help" => vec!["Commands: status, sync, quit".to_string()],
        other => vec![format!("Unknown command '{other}'")],
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handle: ConnectionHandle,
    events: mpsc::UnboundedSender<SyncEvent>,
    max_frame_len: usize,
    mut stop: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);
    let (mut reader, writer) = net::split(stream, max_frame_len);

    match time::timeout(HANDSHAKE_TIMEOUT, reader.recv::<ClientMsg>()).await {
        Ok(Ok(Some(ClientMsg::Hello { protocol }))) if protocol == PROTOCOL_VERSION => {}
        Ok(Ok(Some(other))) => {
            warn!(?handle, %peer, msg = ?other, "Unexpected handshake message");
            return;
        }
        Ok(Ok(None)) => {
            debug!(?handle, %peer, "Closed before handshake");
            return;
        }
        Ok(Err(e)) => {
            warn!(?handle, %peer, error = %e, "Handshake failed");
            return;
        }
        Err(_) => {
            warn!(?handle, %peer, "Handshake timed out");
            return;
        }
    }

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    if events
        .send(SyncEvent::Connected {
            handle,
            outbox: out_tx,
        })
        .is_err()
    {
        return;
    }

    tokio::spawn(write_outbox(writer, out_rx, handle, events.clone()));

    loop {
        tokio::select! {
            _ = shutdown_signal(&mut stop) => break,
            received = reader.recv::<ClientMsg>() => match received {
                Ok(Some(msg)) => {
                    if events.send(SyncEvent::Message { handle, msg }).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(?handle, %peer, "Connection closed");
                    break;
                }
                Err(e) => {
                    warn!(?handle, %peer, error = %e, "Connection failed");
                    break;
                }
            },
        }
    }

    let _ = events.send(SyncEvent::Disconnected { handle });
}

/// Drains a connection's outbox into its socket. Ends once the registry
/// drops the outbox, or on the first failed write, which is reported as a
/// disconnect.
async fn write_outbox<W: AsyncWrite + Unpin>(
    mut writer: FrameWriter<W>,
    mut outbox: mpsc::UnboundedReceiver<Arc<ServerMsg>>,
    handle: ConnectionHandle,
    events: mpsc::UnboundedSender<SyncEvent>,
) {
    while let Some(msg) = outbox.recv().await {
        if let Err(e) = writer.send(&*msg).await {
            warn!(?handle, error = %e, "Write failed");
            let _ = events.send(SyncEvent::Disconnected { handle });
            return;
        }
    }
    let _ = writer.shutdown().await;
}

/// Helper for tests: bind to an ephemeral localhost port.
pub async fn bind_ephemeral(
    sync_interval_ms: u64,
) -> anyhow::Result<(FlightServer, FlightConfig)> {
    let cfg = FlightConfig {
        server_addr: "127.0.0.1:0".to_string(),
        sync_interval_ms,
        ..Default::default()
    };
    let server = FlightServer::bind(cfg).await?;

    let mut cfg = server.cfg.clone();
    cfg.server_addr = server.local_addr()?.to_string();
    Ok((server, cfg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flight_shared::{entity::EntityId, math::Vec3};

    #[test]
    fn console_status_lists_entities() {
        let mut engine = SyncEngine::with_seed(1);
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = engine.on_connect(ConnectionHandle(1), tx);
        let shutdown = ShutdownHandle::new();

        let out = exec_console(&mut engine, "status", &shutdown);
        assert_eq!(out[0], "Entities: 1");
        assert!(out[1].contains(id.as_str()));
        assert!(out[1].contains("pos=(0.0, 10.0, 0.0)"));
    }

    #[test]
    fn console_sync_and_quit() {
        let mut engine = SyncEngine::with_seed(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle(1);
        engine.on_connect(handle, tx);
        engine.on_move(handle, Vec3::new(1.0, 2.0, 3.0), Vec3::ZERO);
        while rx.try_recv().is_ok() {}
        let shutdown = ShutdownHandle::new();

        let out = exec_console(&mut engine, "sync", &shutdown);
        assert_eq!(out, vec!["Full sync sent to 1 clients".to_string()]);
        assert!(rx.try_recv().is_ok());

        assert!(!shutdown.is_triggered());
        exec_console(&mut engine, "quit", &shutdown);
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn failed_write_reports_disconnect() {
        let (socket, peer) = tokio::io::duplex(64);
        drop(peer);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle(7);

        out_tx
            .send(Arc::new(ServerMsg::Left {
                id: EntityId::from("gone"),
            }))
            .unwrap();
        write_outbox(FrameWriter::new(socket), out_rx, handle, event_tx).await;

        assert!(matches!(
            event_rx.try_recv(),
            Ok(SyncEvent::Disconnected { handle: h }) if h == handle
        ));
    }

    #[tokio::test]
    async fn dropped_outbox_ends_writer_quietly() {
        let (socket, _peer) = tokio::io::duplex(64);
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Arc<ServerMsg>>();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        drop(out_tx);

        write_outbox(FrameWriter::new(socket), out_rx, ConnectionHandle(8), event_tx).await;
        assert!(event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_stops_an_idle_server() -> anyhow::Result<()> {
        let (server, _cfg) = bind_ephemeral(50).await?;
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.run());

        time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger();
        let engine = time::timeout(Duration::from_secs(2), task).await???;
        assert!(engine.store().is_empty());
        Ok(())
    }
}
