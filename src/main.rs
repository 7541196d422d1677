use std::process::ExitCode;

use peermesh::signaling::{DEFAULT_RENDEZVOUS_URL, SignalingClient, WebSocketConnector};
use serde_json::Value;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let address = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PEERMESH_URL").ok())
        .unwrap_or_else(|| DEFAULT_RENDEZVOUS_URL.to_string());

    println!("   Probing rendezvous server at {}", address);

    match SignalingClient::<Value>::probe(&WebSocketConnector, &address).await {
        Ok(true) => {
            println!("   Up");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            println!("   Down");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Probe of {} failed: {}", address, e);
            ExitCode::FAILURE
        }
    }
}
