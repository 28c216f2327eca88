// src/main.rs

mod control;
mod driver;
mod library;
mod status;
use dotenv::dotenv;
use std::{env, error::Error, sync::Arc, time::Duration};
use log::{info, error};
use warp::Filter;
use courtside_lib::{
    Context,                 // broadcast context
    PairingSession,          // offer/answer state machine
    RtcTransport,            // webrtc-rs peer connections
    Role,
    session::DEFAULT_OPEN_TIMEOUT,
};
use tokio::sync::mpsc;

use crate::driver::Driver;
use crate::library::Library;

/* RUST_LOG=courtside_lib=debug,courtside_console=info \
COURTSIDE_ROLE=player COURTSIDE_LIBRARY=library.json \
cargo run -p courtside-console */

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // ──────── ① Load .env if present ────────
    if let Err(e) = dotenv() {
        eprintln!("No .env loaded ({}), using the environment only", e);
    }

    // initialize logger and panic hook
    env_logger::init();
    std::panic::set_hook(Box::new(|info| {
        error!("Thread panic: {:?}", info);
    }));

    // ──────── ② Require COURTSIDE_ROLE ────────
    let role = match env::var("COURTSIDE_ROLE")
        .map_err(|_| "Environment variable COURTSIDE_ROLE must be set (player | remote)")?
        .to_lowercase()
        .as_str()
    {
        "player" => Role::Player,
        "remote" => Role::Remote,
        other => return Err(format!("COURTSIDE_ROLE must be player or remote, got {other:?}").into()),
    };
    let port: u16 = match env::var("COURTSIDE_HTTP_PORT") {
        Ok(raw) => raw
            .parse()
            .map_err(|e| format!("COURTSIDE_HTTP_PORT is not a port: {}", e))?,
        Err(_) => 3031,
    };
    let label = env::var("COURTSIDE_CHANNEL_LABEL").unwrap_or_else(|_| "remote".into());
    let open_timeout = match env::var("COURTSIDE_OPEN_TIMEOUT_SECS") {
        Ok(raw) => Duration::from_secs(
            raw.parse()
                .map_err(|e| format!("COURTSIDE_OPEN_TIMEOUT_SECS is not a number of seconds: {}", e))?,
        ),
        Err(_) => DEFAULT_OPEN_TIMEOUT,
    };

    info!("Configured role: {}", role);

    // build shared broadcast context (holds a broadcast::Sender<_>)
    let ctx = Context::new(1024);
    let observer = Arc::new(ctx.clone());
    let transport = RtcTransport::new();

    let library_path = match role {
        Role::Player => Some(
            env::var("COURTSIDE_LIBRARY")
                .map_err(|_| "Environment variable COURTSIDE_LIBRARY must be set for the player")?,
        ),
        Role::Remote => None,
    };
    let session = match &library_path {
        Some(path) => {
            let library = Library::load(path)?;
            info!("Library: {}", path);
            PairingSession::player(transport, Box::new(library), observer)
        }
        None => PairingSession::remote(transport, observer),
    }
    .with_channel_label(label)
    .with_open_timeout(open_timeout);

    let (requests_tx, requests_rx) = mpsc::unbounded_channel();

    // ──────── 1) Status + control server ────────
    let routes = status::status_routes(ctx.clone())
        .or(control::control_routes(ctx.clone(), requests_tx.clone()));
    tokio::spawn(async move {
        warp::serve(routes).run(([0, 0, 0, 0], port)).await;
    });
    info!("HTTP  : 0.0.0.0:{}/health", port);
    info!("SSE   : 0.0.0.0:{}/events", port);
    info!("WS    : 0.0.0.0:{}/control", port);

    // ──────── 2) Console input ────────
    tokio::spawn(driver::read_stdin(role, requests_tx));
    match role {
        Role::Player => info!("Type `offer` to create an offer, then paste the remote's answer."),
        Role::Remote => info!("Paste the player's offer (or `connect <token>`)."),
    }

    // ──────── 3) Session loop ────────
    let mut driver = Driver::new(session, ctx, requests_rx);
    if let Some(path) = library_path {
        driver = driver.with_library(path);
    }
    driver.run().await;
    Ok(())
}
