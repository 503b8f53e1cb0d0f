//! Subscriber message dispatch
//!
//! A subscriber may ask to `join` a channel directly. That starts a generator
//! tied to this connection alone, on top of whatever the hub broadcasts.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::simulation::{SimulationHandle, SimulationProfile};
use crate::types::{ChannelName, SubscriberId};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Per-connection state owned by the socket loop
pub struct SubscriberSession {
    id: SubscriberId,
    outbox: mpsc::Sender<ServerMessage>,
    simulation: Option<SimulationHandle>,
}

impl SubscriberSession {
    pub fn new(id: SubscriberId, outbox: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            outbox,
            simulation: None,
        }
    }

    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    /// Channel this connection is simulating, if any
    pub fn simulated_channel(&self) -> Option<&ChannelName> {
        self.simulation.as_ref().map(SimulationHandle::channel)
    }

    /// Start (or replace) this connection's generator
    pub async fn join(&mut self, channel: ChannelName) {
        if let Some(previous) = self.simulation.take() {
            previous.stop().await;
        }
        self.simulation = Some(SimulationHandle::spawn(
            SimulationProfile::per_subscriber(),
            channel,
            Arc::new(self.outbox.clone()),
        ));
    }

    /// Stop the generator; returns once no further ticks can be delivered
    pub async fn close(&mut self) {
        if let Some(simulation) = self.simulation.take() {
            simulation.stop().await;
        }
    }
}

/// Handle a client message and return an optional direct response
pub async fn handle_message(
    msg: ClientMessage,
    session: &mut SubscriberSession,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Join { channel } => match ChannelName::parse(&channel) {
            Some(channel) => {
                tracing::info!(
                    "Subscriber {} joined #{} with simulated chat",
                    session.id(),
                    channel
                );
                session.join(channel).await;
                None
            }
            None => Some(ServerMessage::Error {
                code: "INVALID_CHANNEL".to_string(),
                msg: format!("Invalid channel name: {:?}", channel),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn session(buffer: usize) -> (SubscriberSession, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(buffer);
        (SubscriberSession::new("sub".to_string(), tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_starts_simulation_for_this_connection() {
        let (mut session, mut rx) = session(64);

        let response = handle_message(
            ClientMessage::Join {
                channel: "MyChannel".to_string(),
            },
            &mut session,
        )
        .await;
        assert!(response.is_none());
        assert_eq!(session.simulated_channel().unwrap().as_str(), "mychannel");

        tokio::time::sleep(Duration::from_secs(11)).await;
        let mut received = 0;
        while let Ok(msg) = rx.try_recv() {
            match msg {
                ServerMessage::ChatMessage { message } => {
                    assert_eq!(message.channel.as_str(), "mychannel");
                    received += 1;
                }
                other => panic!("Unexpected message {:?}", other),
            }
        }
        // 3-5s cadence over 11s
        assert!((2..=3).contains(&received), "received {}", received);

        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_ticks() {
        let (mut session, mut rx) = session(64);
        session.join(ChannelName::parse("chan").unwrap()).await;

        // Just short of the earliest possible tick
        tokio::time::sleep(Duration::from_millis(2999)).await;
        session.close().await;
        while rx.try_recv().is_ok() {}

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
        assert!(session.simulated_channel().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_replaces_generator() {
        let (mut session, mut rx) = session(64);
        session.join(ChannelName::parse("old").unwrap()).await;
        session.join(ChannelName::parse("new").unwrap()).await;

        tokio::time::sleep(Duration::from_secs(20)).await;
        while let Ok(msg) = rx.try_recv() {
            if let ServerMessage::ChatMessage { message } = msg {
                assert_eq!(message.channel.as_str(), "new");
            }
        }
        session.close().await;
    }

    #[tokio::test]
    async fn test_join_with_invalid_channel_returns_error() {
        let (mut session, _rx) = session(4);
        let response = handle_message(
            ClientMessage::Join {
                channel: "   ".to_string(),
            },
            &mut session,
        )
        .await;
        match response {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "INVALID_CHANNEL"),
            other => panic!("Expected error, got {:?}", other),
        }
        assert!(session.simulated_channel().is_none());
    }
}
