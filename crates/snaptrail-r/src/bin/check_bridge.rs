use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(9501);
    let url = format!("ws://localhost:{}", port);
    println!("Probing recorder bridge at {}", url);

    let (mut ws, _) = connect_async(&url).await?;
    let hello = serde_json::json!({
        "role": "page",
        "url": "https://bridge-check.invalid/",
        "title": "bridge check",
    });
    ws.send(Message::Text(hello.to_string())).await?;
    println!("Connected; hello accepted");

    // A session may already be running, in which case the bridge sends the
    // capture button mount straight away.
    match tokio::time::timeout(Duration::from_secs(2), ws.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => println!("First frame: {}", text),
        Ok(Some(Ok(other))) => println!("First frame: {:?}", other),
        Ok(Some(Err(e))) => println!("Socket error: {}", e),
        Ok(None) => println!("Bridge closed the connection"),
        Err(_) => println!("No frames within 2s (no active session)"),
    }

    ws.close(None).await?;
    Ok(())
}
