use super::*;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the upstream over (secure) websocket
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl UpstreamConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> UpstreamResult<Box<dyn UpstreamTransport>> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| UpstreamError::Connect(e.to_string()))?;
        tracing::info!("WebSocket connection established to {}", url);
        Ok(Box::new(WebSocketTransport { ws }))
    }
}

struct WebSocketTransport {
    ws: WsStream,
}

#[async_trait]
impl UpstreamTransport for WebSocketTransport {
    async fn send_line(&mut self, line: &str) -> UpstreamResult<()> {
        tracing::trace!("> {}", line);
        self.ws
            .send(Message::Text(format!("{}\r\n", line).into()))
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> UpstreamResult<Option<String>> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()))
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::warn!("Received close frame: {:?}", frame);
                    return Ok(None);
                }
                // tungstenite queues the pong reply itself
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Err(e)) => return Err(UpstreamError::Transport(e.to_string())),
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            tracing::debug!("Error while closing upstream websocket: {}", e);
        }
    }
}
