//! Echo - log every dispatch event the gateway sends.
//!
//! This example demonstrates:
//! - Creating a connection with the builder pattern
//! - Consuming dispatch events from the queue on a separate task
//! - Driving the connection with `poll()` until Ctrl-C or a terminal error
//!
//! # Running
//!
//! ```sh
//! DISCORD_BOT_TOKEN=... RUST_LOG=gatewire=debug,echo=info cargo run --example echo
//! ```
//!
//! `DISCORD_INTENTS` overrides the default intents (513).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gatewire::protocol::intents;
use gatewire::transport::WebSocketTransport;
use gatewire::{ConnectionBuilder, GatewayError};
use tracing_subscriber::EnvFilter;

const POLL_WINDOW: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let token = std::env::var("DISCORD_BOT_TOKEN")
        .map_err(|_| "DISCORD_BOT_TOKEN is not set")?;
    let intents = match std::env::var("DISCORD_INTENTS") {
        Ok(value) => value.parse::<u32>()?,
        Err(_) => intents::DEFAULT,
    };

    let (mut connection, mut events) = ConnectionBuilder::new(token)
        .intents(intents)
        .build(WebSocketTransport::new())?;

    // Events are consumed off the protocol loop.
    let consumer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!(
                event = event.event_name().unwrap_or("?"),
                sequence = event.sequence,
                bytes = event.payload().len(),
                "Dispatch"
            );
        }
    });

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::SeqCst);
        }
    });

    connection.connect().await?;

    while !shutdown.load(Ordering::SeqCst) {
        match connection.poll(POLL_WINDOW).await {
            Ok(_) | Err(GatewayError::Timeout) => {}
            Err(e) if e.is_terminal() => {
                tracing::error!("Gateway refused the connection: {}", e);
                break;
            }
            Err(e) => tracing::warn!("{} (state: {})", e, connection.state()),
        }
    }

    connection.close().await?;
    drop(connection);
    consumer.await?;

    Ok(())
}
