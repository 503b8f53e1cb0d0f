pub mod handlers;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;

use crate::hub::{Hub, Subscription};
use crate::protocol::{ClientMessage, ServerMessage};
use handlers::SubscriberSession;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<Hub>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (mut sender, mut receiver) = socket.split();

    let Subscription {
        id,
        outbox,
        mut inbox,
    } = hub.register();
    tracing::info!(
        "Subscriber {} connected ({} live)",
        id,
        hub.subscriber_count()
    );

    let mut session = SubscriberSession::new(id.clone(), outbox);

    loop {
        tokio::select! {
            // Hub broadcasts and this connection's own simulation
            outgoing = inbox.recv() => {
                let Some(msg) = outgoing else { break };
                if send_json(&mut sender, &msg).await.is_err() {
                    break;
                }
            }

            // Handle client messages
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message from {}: {}", id, text);

                        let response = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => handlers::handle_message(client_msg, &mut session).await,
                            Err(e) => {
                                tracing::warn!("Failed to parse client message: {}", e);
                                Some(ServerMessage::Error {
                                    code: "PARSE_ERROR".to_string(),
                                    msg: format!("Invalid message format: {}", e),
                                })
                            }
                        };

                        if let Some(response) = response {
                            if send_json(&mut sender, &response).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::debug!("Subscriber {} sent close", id);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error for {}: {}", id, e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // Stop the dedicated generator before the outbox goes away
    session.close().await;
    hub.unregister(&id);
    drop(inbox);

    tracing::info!("Subscriber {} disconnected", id);
}

async fn send_json<S>(sender: &mut S, msg: &ServerMessage) -> Result<(), ()>
where
    S: futures::Sink<Message> + Unpin,
{
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to serialize message: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(json.into())).await.map_err(|_| ())
}
