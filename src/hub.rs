//! Broadcast hub
//!
//! Owns the live subscriber set, the current channel and the process-wide
//! chat generator. Chat from the upstream client and the generator is pushed
//! through [`ChatSink`] into the subscriber registry, which fans it out with
//! non-blocking sends so one slow viewer never holds up the others.

use crate::protocol::ServerMessage;
use crate::simulation::{SimulationHandle, SimulationProfile};
use crate::types::*;
use crate::upstream::UpstreamClient;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;

/// Destination for chat events produced by a source
pub trait ChatSink: Send + Sync {
    fn deliver(&self, event: ChatEvent);

    /// Sources stop producing once their sink reports closed
    fn is_closed(&self) -> bool {
        false
    }
}

/// A single subscriber's outbox is itself a sink; used for per-connection simulation.
impl ChatSink for mpsc::Sender<ServerMessage> {
    fn deliver(&self, event: ChatEvent) {
        if let Err(TrySendError::Full(_)) = self.try_send(event.into()) {
            tracing::debug!("Subscriber outbox full, dropping simulated message");
        }
    }

    fn is_closed(&self) -> bool {
        mpsc::Sender::is_closed(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Invalid channel name: {0:?}")]
    InvalidChannel(String),
}

/// A registered subscriber's end of the hub
pub struct Subscription {
    pub id: SubscriberId,
    /// Extra handle onto the outbox, for messages that bypass the hub
    pub outbox: mpsc::Sender<ServerMessage>,
    pub inbox: mpsc::Receiver<ServerMessage>,
}

/// Thread-safe set of live subscribers
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<ServerMessage>>>,
    buffer: usize,
}

impl SubscriberRegistry {
    /// `buffer` is the per-subscriber queue depth; messages beyond it are dropped
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    pub fn register(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = ulid::Ulid::new().to_string();
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), tx.clone());
        Subscription {
            id,
            outbox: tx,
            inbox: rx,
        }
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unregister(&self, id: &SubscriberId) -> bool {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offer `msg` to every live subscriber and return how many accepted it.
    ///
    /// Subscribers whose transport has gone away are removed; subscribers with a
    /// full queue miss this message.
    pub fn broadcast(&self, msg: &ServerMessage) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let subscribers = self
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for (id, tx) in subscribers.iter() {
                match tx.try_send(msg.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        tracing::debug!("Subscriber {} is lagging, dropping message", id);
                    }
                    Err(TrySendError::Closed(_)) => closed.push(id.clone()),
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self
                .subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for id in closed {
                tracing::debug!("Removing closed subscriber {}", id);
                subscribers.remove(&id);
            }
        }

        delivered
    }
}

impl ChatSink for SubscriberRegistry {
    fn deliver(&self, event: ChatEvent) {
        self.broadcast(&event.into());
    }
}

/// Fan-out hub shared by the websocket and API handlers
pub struct Hub {
    registry: Arc<SubscriberRegistry>,
    upstream: Option<UpstreamClient>,
    simulation: Option<SimulationProfile>,
    current_channel: RwLock<Option<ChannelName>>,
    /// Held for the whole of a channel switch; owns the process-wide generator
    switch: Mutex<Option<SimulationHandle>>,
}

impl Hub {
    /// `upstream` should already be pushing into `registry`.
    /// `simulation` of `None` disables the process-wide generator.
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        upstream: Option<UpstreamClient>,
        simulation: Option<SimulationProfile>,
    ) -> Self {
        Self {
            registry,
            upstream,
            simulation,
            current_channel: RwLock::new(None),
            switch: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn register(&self) -> Subscription {
        self.registry.register()
    }

    pub fn unregister(&self, id: &SubscriberId) {
        self.registry.unregister(id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// Deliver a chat event to every live subscriber
    pub fn ingest(&self, event: ChatEvent) -> usize {
        self.registry.broadcast(&event.into())
    }

    /// Deliver an arbitrary envelope to every live subscriber
    pub fn announce(&self, msg: ServerMessage) -> usize {
        self.registry.broadcast(&msg)
    }

    pub fn current_channel(&self) -> Option<ChannelName> {
        self.current_channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn upstream_state(&self) -> ConnectionState {
        self.upstream
            .as_ref()
            .map_or(ConnectionState::Disconnected, UpstreamClient::state)
    }

    /// Join the configured start-up channel, if any
    pub async fn start(&self, initial: Option<ChannelName>) {
        if let Some(channel) = initial {
            if let Err(e) = self.switch_channel(channel.as_str()).await {
                tracing::warn!("Could not join initial channel: {}", e);
            }
        }
    }

    /// Make `name` the active channel.
    ///
    /// Rejoins upstream, restarts the process-wide generator and tells every
    /// subscriber. Concurrent calls are applied one after another.
    pub async fn switch_channel(&self, name: &str) -> Result<ChannelName, HubError> {
        let channel =
            ChannelName::parse(name).ok_or_else(|| HubError::InvalidChannel(name.to_string()))?;

        let mut generator = self.switch.lock().await;

        *self
            .current_channel
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(channel.clone());

        if let Some(upstream) = &self.upstream {
            if let Err(e) = upstream.join_channel(channel.clone()).await {
                tracing::warn!("Upstream unavailable, serving simulated chat only: {}", e);
            }
        }

        if let Some(profile) = &self.simulation {
            if let Some(previous) = generator.take() {
                previous.stop().await;
            }
            *generator = Some(SimulationHandle::spawn(
                profile.clone(),
                channel.clone(),
                self.registry.clone(),
            ));
        }

        let notified = self.registry.broadcast(&ServerMessage::ChannelChanged {
            channel: channel.clone(),
        });
        tracing::info!("Switched channel to {} ({} subscribers notified)", channel, notified);

        Ok(channel)
    }

    /// Stop the generator and close the upstream connection
    pub async fn shutdown(&self) {
        if let Some(generator) = self.switch.lock().await.take() {
            generator.stop().await;
        }
        if let Some(upstream) = &self.upstream {
            if let Err(e) = upstream.shutdown().await {
                tracing::warn!("Upstream client ended with error: {}", e);
            }
        }
        tracing::info!("Hub shut down");
    }
}
