//! Bridge call commands.

use tracing::debug;

use crate::cli::CallArgs;
use crate::config::BridgeSettings;
use crate::error::{ClientError, ClientResult};
use crate::socket::DatagramClient;

/// Sends one request and prints the `data` of its response as JSON.
pub async fn call(args: &CallArgs, settings: &BridgeSettings) -> ClientResult<()> {
    let request = args.to_request()?;
    let mut client = DatagramClient::connect(settings).await?;
    let data = client.call(request).await?;

    let rendered = serde_json::to_string_pretty(&data)
        .map_err(|e| ClientError::Protocol(format!("failed to render result: {}", e)))?;
    println!("{}", rendered);
    Ok(())
}

/// Checks that the bridge answers the liveness probe.
pub async fn ping(settings: &BridgeSettings) -> ClientResult<()> {
    let mut client = DatagramClient::connect(settings).await?;
    debug!(remote = ?client.remote(), "pinging bridge");

    if client.ping().await? {
        println!("pong");
        Ok(())
    } else {
        Err(ClientError::Protocol("unexpected ping reply".into()))
    }
}
