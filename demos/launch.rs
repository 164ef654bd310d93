//! Launch a script through a debugger backend and print its messages.
//!
//! Run with:
//! ```bash
//! RUST_LOG=dapwire=debug cargo run --example launch -- tcp://localhost:8845 main
//! ```
//!
//! The first argument is the backend address, the second the launch
//! location. A session ends when the backend sends `terminated`.

use dapwire::{DebuggerHost, ProtocolMessage, RemotingConfig};
use serde_json::json;
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDRESS: &str = "tcp://localhost:8845";
const DEFAULT_LOCATION: &str = "default";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let address = args.next().unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
    let location = args.next().unwrap_or_else(|| DEFAULT_LOCATION.to_string());

    let config = RemotingConfig::new(address).instance_id(format!("launch-{}", std::process::id()));
    let host = DebuggerHost::from_config(&config)?;
    let session = host.open_session(&location).await?;

    session
        .send_message(&ProtocolMessage::request(
            1,
            "initialize",
            Some(json!({"adapterID": "dapwire", "linesStartAt1": true})),
        ))
        .await?;
    session
        .send_message(&ProtocolMessage::request(2, "launch", Some(json!({"noDebug": false}))))
        .await?;

    while let Ok(message) = session.get_message().await {
        println!("{}", serde_json::to_string_pretty(&message)?);
    }

    tracing::info!("session ended");
    Ok(())
}
