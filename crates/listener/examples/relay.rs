//! Demo listener that authenticates without the channel and polls the
//! synchronous transmit path.
//!
//! ```text
//! TETHER_SERVER_URL=https://localhost:3000 TETHER_PASSWORD=secret \
//!     cargo run --example relay
//! ```

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use tether_connection::{ControlConnection, ServiceConfig};
use tether_listener::{Listener, ListenerInput};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut listener = Listener::new("shaco", ["test"]);
    listener.add_input(ListenerInput::new("port", "Port"));
    listener.add_input(ListenerInput::new("headers", "Headers").array());
    listener.add_input(ListenerInput::new("user-agent", "User Agent"));

    let config = ServiceConfig::from_env();
    let connection = match ControlConnection::new(config) {
        Ok(connection) => connection,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = connection.authenticate(&listener).await {
        tracing::error!(error = %e, "authentication failed");
        std::process::exit(1);
    }

    loop {
        tokio::time::sleep(Duration::from_secs(2)).await;
        match listener.transmit("sh4c0", "teste").await {
            Ok(Some(response)) => {
                println!("response: {}", String::from_utf8_lossy(&response));
            }
            Ok(None) => {}
            Err(e) => eprintln!("Error: {e}"),
        }
    }
}
