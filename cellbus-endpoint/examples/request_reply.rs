//! Two endpoints in one process: a waypoint store answering a UI.
//!
//! Run with `cargo run --example request_reply`.

use std::time::Duration;

use cellbus_core::vocab::{Request, Response};
use cellbus_endpoint::{Endpoint, EndpointConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, async {
        let mut store = Endpoint::bind(EndpointConfig::new("op_data", 0)).await?;
        let port = store.local_port();
        tokio::task::spawn_local(async move {
            while let Some(message) = store.next_message().await {
                let response = match store.decode::<Request>(&message) {
                    Ok(Request::GetAllWaypointIds) => Response::WaypointIds(vec![1, 2, 3]),
                    Ok(_) => Response::UnknownRequest,
                    Err(_) => continue,
                };
                if store.reply(&message.sender, message.request_id, &response).is_err() {
                    break;
                }
            }
        });

        let mut ui = Endpoint::bind(EndpointConfig::new("ui", 0)).await?;
        let address = format!("127.0.0.1:{port}");
        ui.register_connection(&address).await?;

        let id = ui.send(&address, &Request::GetAllWaypointIds)?;
        let reply: Response = ui
            .receive(&address, Some(id), Some(Duration::from_secs(1)))
            .await?;
        println!("store answered: {reply:?}");

        ui.close().await;
        Ok(())
    })
}
