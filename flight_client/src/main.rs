//! Standalone headless client binary.
//!
//! Usage:
//!   cargo run -p flight_client -- [--addr 127.0.0.1:3000] [--tick-hz 60] [--yaw 0.3]
//!
//! The client connects, flies a steady turn on autopilot, reports its pose
//! every tick and keeps a roster of the other vehicles.
//!
//! Console commands:
//!   status  - Show own pose and roster size
//!   roster  - List remote vehicles
//!   faster  - Throttle up for one second
//!   slower  - Throttle down for one second
//!   quit    - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::Context;
use flight_client::client::{ClientState, FlightClient};
use flight_client::flight::{Aircraft, ControlInput};
use flight_shared::{config::FlightConfig, net::ServerMsg};
use tokio::sync::mpsc;
use tracing::info;

struct Args {
    cfg: FlightConfig,
    yaw: f32,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut cfg = FlightConfig::default();
    cfg.apply_env().context("apply environment")?;
    let mut yaw = 0.3;

    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(60);
                i += 2;
            }
            "--yaw" if i + 1 < args.len() => {
                yaw = args[i + 1].parse().unwrap_or(0.3);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(Args { cfg, yaw })
}

fn exec_console(line: &str, client: &FlightClient, plane: &Aircraft) -> Vec<String> {
    match line.split_whitespace().next() {
        Some("status") => vec![
            format!("State: {:?}", client.state),
            format!("Entity: {}", client.id),
            format!(
                "Pos: ({:.1}, {:.1}, {:.1}) speed={:.2}",
                plane.position.x, plane.position.y, plane.position.z, plane.speed
            ),
            format!("Remote vehicles: {}", client.roster.len()),
        ],
        Some("roster") => client
            .roster
            .iter()
            .map(|e| {
                format!(
                    "  {} {} ({:.1}, {:.1}, {:.1})",
                    e.id,
                    e.color.as_str(),
                    e.position.x,
                    e.position.y,
                    e.position.z
                )
            })
            .collect(),
        Some(other) => vec![format!("Unknown command '{other}'")],
        None => Vec::new(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args { cfg, yaw } = parse_args()?;
    info!(server = %cfg.server_addr, tick_hz = cfg.tick_hz, "Starting client");

    let mut client = FlightClient::connect(&cfg).await.context("connect")?;

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

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

    println!("Client connected. Type 'status' for info, 'quit' to exit.");
    println!();

    let tick_interval = cfg.tick_interval();
    let one_second = cfg.tick_hz.max(1);
    let mut plane = Aircraft::default();
    let mut throttle = 0.0_f32;
    let mut throttle_ticks = 0u32;
    let mut ticker = tokio::time::interval(tick_interval);

    loop {
        ticker.tick().await;

        // Process console commands.
        while let Ok(line) = console_rx.try_recv() {
            match line.as_str() {
                "quit" | "exit" => {
                    client.close().await?;
                    return Ok(());
                }
                "faster" | "slower" => {
                    throttle = if line == "faster" { 1.0 } else { -1.0 };
                    throttle_ticks = one_second;
                }
                _ => {
                    for out in exec_console(&line, &client, &plane) {
                        println!("{out}");
                    }
                }
            }
        }

        if throttle_ticks > 0 {
            throttle_ticks -= 1;
        } else {
            throttle = 0.0;
        }
        plane.step(ControlInput {
            yaw,
            throttle,
            ..Default::default()
        });
        client.send_move(&plane).await?;

        // Apply whatever arrived since the last tick.
        while let Some((msg, delta)) = client.poll(Duration::from_millis(1)).await? {
            if let ServerMsg::FullSync { entities } = &msg {
                info!(
                    entities = entities.len(),
                    remote = client.roster.len(),
                    added = delta.added,
                    removed = delta.removed,
                    "Full sync"
                );
            }
        }

        if client.state == ClientState::Disconnected {
            println!("Disconnected from server.");
            break;
        }
    }

    Ok(())
}
