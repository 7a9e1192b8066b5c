//! Relay server for the collaborative task board.
//!
//! Environment:
//! - `TASKBOARD_BIND` — full listen address (e.g. `0.0.0.0:3001`)
//! - `PORT` — listen on `0.0.0.0:$PORT` when `TASKBOARD_BIND` is unset
//! - `TASKBOARD_ROOM_CAPACITY` — max peers per room
//! - `RUST_LOG` — log filter (env_logger)

use log::info;
use taskboard_collab::server::{RelayConfig, RelayServer};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Build the relay config from environment lookups.
fn config_from(var: impl Fn(&str) -> Option<String>) -> Result<RelayConfig, String> {
    let mut config = RelayConfig::default();

    if let Some(bind) = var("TASKBOARD_BIND") {
        config.bind_addr = bind;
    } else if let Some(port) = var("PORT") {
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| format!("PORT is not a valid port: {port}"))?;
        config.bind_addr = format!("0.0.0.0:{port}");
    }

    if let Some(capacity) = var("TASKBOARD_ROOM_CAPACITY") {
        config.max_peers_per_room = capacity
            .trim()
            .parse()
            .ok()
            .filter(|n: &usize| *n > 0)
            .ok_or_else(|| format!("TASKBOARD_ROOM_CAPACITY must be a positive number: {capacity}"))?;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();

    let config = config_from(|key| std::env::var(key).ok())?;
    info!(
        "Starting task board relay on {} (max {} peers per room)",
        config.bind_addr, config.max_peers_per_room
    );

    let server = RelayServer::new(config);
    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down relay");
            Ok(())
        }
    }
}
