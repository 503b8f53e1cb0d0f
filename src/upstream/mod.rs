mod client;
pub mod parser;
mod websocket;

use async_trait::async_trait;

pub use client::{UpstreamClient, UpstreamConfig};
pub use websocket::WebSocketConnector;

/// Result type for upstream operations
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Errors raised by the upstream chat connection
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed by upstream")]
    ConnectionClosed,

    #[error("Maximum reconnection attempts ({attempts}) exhausted")]
    ExhaustedRetries { attempts: u32 },

    #[error("Upstream client is not running")]
    Stopped,
}

/// One open, line-oriented connection to the upstream chat server
#[async_trait]
pub trait UpstreamTransport: Send {
    /// Send one protocol line. The CRLF terminator is added by the transport.
    async fn send_line(&mut self, line: &str) -> UpstreamResult<()>;

    /// Next text payload, which may contain several frames.
    /// `Ok(None)` means the server closed the connection.
    ///
    /// Must be cancel safe: it is raced against control commands.
    async fn recv(&mut self) -> UpstreamResult<Option<String>>;

    /// Close the connection, ignoring errors
    async fn close(&mut self);
}

/// Opens transports to the upstream endpoint
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(&self, url: &str) -> UpstreamResult<Box<dyn UpstreamTransport>>;
}
