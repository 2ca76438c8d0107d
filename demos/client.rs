/// Connects to an echo server, sends a few messages and prints every event.
///
/// Usage: cargo run --example client -- [url]
use std::time::Duration;

use futures::StreamExt;
use wsclient::{ConnectionStatus, Options, WebSocket};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    simple_logger::init_with_level(log::Level::Debug)?;

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "wss://echo.websocket.org".to_owned());

    let mut ws = WebSocket::connect(url.parse()?)
        .with_options(
            Options::default()
                .with_client_ping(Duration::from_secs(5))
                .with_utf8(),
        )
        .await?;
    let sender = ws.sender();

    while let Some(event) = ws.next().await {
        let event = event?;
        match event.status {
            ConnectionStatus::WebsocketConnected => {
                sender.send_text("hello").await?;
                sender.send_text_parts(["frag", "mented"]).await?;
            }
            ConnectionStatus::DataframeReceived => {
                let Some(frame) = event.frame else { continue };
                match frame.message() {
                    Some(text) => log::info!("text: {text}"),
                    None => log::info!("binary: {} bytes", frame.payload.len()),
                }
                if frame.message() == Some("fragmented") {
                    ws.close("bye").await?;
                }
            }
            status => log::debug!("{status:?}"),
        }
    }

    Ok(())
}
