//! Mock relay gateway for tunnel tests
#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug)]
pub enum GatewayEvent {
    /// WebSocket handshake completed; carries the request headers.
    Connected(HashMap<String, String>),
    /// The relay connection ended (peer close or error).
    Closed,
}

/// Gateway that echoes every binary frame back to the sender.
///
/// Returns the http base URL (the daemon rewrites it to ws + /gateway)
/// and a stream of connection events.
pub async fn spawn_echo_gateway() -> (String, mpsc::UnboundedReceiver<GatewayEvent>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let event_tx = event_tx.clone();
            tokio::spawn(async move {
                let mut captured = HashMap::new();
                let callback = |req: &Request, resp: Response| {
                    for (name, value) in req.headers() {
                        captured.insert(
                            name.as_str().to_string(),
                            value.to_str().unwrap_or_default().to_string(),
                        );
                    }
                    Ok(resp)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    return;
                };
                let _ = event_tx.send(GatewayEvent::Connected(captured));

                while let Some(msg) = ws.next().await {
                    match msg {
                        Ok(Message::Binary(data)) => {
                            if ws.send(Message::Binary(data)).await.is_err() {
                                break;
                            }
                        }
                        Ok(Message::Close(_)) | Err(_) => break,
                        _ => {}
                    }
                }
                let _ = event_tx.send(GatewayEvent::Closed);
            });
        }
    });

    (format!("http://127.0.0.1:{}", port), event_rx)
}

/// Gateway that accepts the handshake and immediately closes.
pub async fn spawn_closing_gateway() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let _ = ws.close(None).await;
            });
        }
    });

    format!("http://127.0.0.1:{}", port)
}
