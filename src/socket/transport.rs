//! WebSocket transport seam
//!
//! The reconnector only needs "open a connection" and "read the next data
//! frame"; tests substitute a scripted connector.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::SocketError;

/// A data frame received from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Opens connections to a socket endpoint
#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn SocketConnection>, SocketError>;
}

/// One open, receive-only connection
#[async_trait]
pub trait SocketConnection: Send {
    /// Next data frame, or `None` once the connection has closed
    async fn next_frame(&mut self) -> Option<Result<Frame, SocketError>>;

    /// Close the connection; errors are ignored
    async fn close(&mut self);
}

/// Connector backed by tokio-tungstenite
#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

#[async_trait]
impl SocketConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn SocketConnection>, SocketError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| SocketError::Connect(e.to_string()))?;
        Ok(Box::new(TungsteniteConnection { stream }))
    }
}

struct TungsteniteConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl SocketConnection for TungsteniteConnection {
    async fn next_frame(&mut self) -> Option<Result<Frame, SocketError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text))),
                Ok(Message::Binary(data)) => return Some(Ok(Frame::Binary(data))),
                Ok(Message::Close(_)) => return None,
                // Pings are answered by tungstenite itself
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

/// Derive the socket URL from the HTTP API base.
///
/// `http` becomes `ws` and `https` becomes `wss`; a trailing `/api` or
/// `/api/vN` segment is replaced by `/ws`, otherwise `/ws` is appended.
pub fn ws_url_from_api_base(base: &str) -> String {
    let swapped = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    let trimmed = swapped.trim_end_matches('/');

    if let Some(idx) = trimmed.rfind("/api") {
        let suffix = &trimmed[idx + "/api".len()..];
        let versioned = suffix
            .strip_prefix("/v")
            .is_some_and(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit()));
        if suffix.is_empty() || versioned {
            return format!("{}/ws", &trimmed[..idx]);
        }
    }
    format!("{}/ws", trimmed)
}
