//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p flight_server -- [--config flight.json] [--addr 0.0.0.0:3000]
//!                                 [--port 3000] [--sync-ms 3000]
//!
//! `PORT` in the environment overrides the configured port; `--port` and
//! `--addr` override both.
//!
//! Console commands:
//!   status  - List connected entities
//!   sync    - Broadcast a full sync now
//!   quit    - Shutdown server

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use flight_server::FlightServer;
use flight_shared::config::FlightConfig;
use tokio::sync::mpsc;
use tracing::{info, warn};

fn parse_args(args: &[String]) -> anyhow::Result<FlightConfig> {
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            FlightConfig::load(&args[i + 1]).context("load config file")?
        }
        _ => FlightConfig::default(),
    };
    cfg.apply_env().context("apply environment")?;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--port" if i + 1 < args.len() => {
                cfg.set_port(&args[i + 1]).context("--port")?;
                i += 2;
            }
            "--sync-ms" if i + 1 < args.len() => {
                cfg.sync_interval_ms = args[i + 1].parse().context("--sync-ms")?;
                i += 2;
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

    let args: Vec<String> = env::args().collect();
    let cfg = parse_args(&args)?;
    info!(addr = %cfg.server_addr, sync_ms = cfg.sync_interval_ms, "Starting server");

    let mut server = FlightServer::bind(cfg).await.context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    // Set up console input channel.
    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    server.set_console_input(console_rx);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received");
                shutdown.trigger();
            }
            Err(e) => warn!(error = %e, "Cannot listen for interrupt"),
        }
    });

    println!("Server ready. Type 'status' for info, 'sync' to force a full sync, 'quit' to exit.");
    println!();

    server.run().await?;
    Ok(())
}
