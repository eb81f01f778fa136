//! Relay binary: bind, serve, exit cleanly on SIGINT/SIGTERM.

use cellbus_core::{wait_for_signals, Shutdown, PORT_ENV};
use cellbus_relay::{Relay, DEFAULT_PORT};
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let port = match std::env::var(PORT_ENV) {
        Ok(raw) => raw
            .parse::<u16>()
            .map_err(|_| format!("invalid {PORT_ENV}: {raw}"))?,
        Err(_) => DEFAULT_PORT,
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, async {
        let relay = Relay::bind(port).await?;
        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();
        tokio::task::spawn_local(async move {
            wait_for_signals().await;
            info!("shutdown signal received");
            trigger.signal();
        });
        relay.run(shutdown).await;
        Ok(())
    })
}
