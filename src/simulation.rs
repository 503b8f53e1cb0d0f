//! Synthetic chat generator
//!
//! Keeps the feed alive when the upstream is quiet or unreachable. Each running
//! generator is a task with a single owner handle; `stop` waits for the task to
//! exit, so no tick is delivered once it returns.

use crate::hub::ChatSink;
use crate::types::{ChannelName, ChatEvent};
use rand::seq::IndexedRandom;
use rand::Rng;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const HUB_MESSAGES: &[&str] = &[
    "Epic gameplay! 🔥",
    "This stream is amazing",
    "Love the blockchain integration",
    "PogChamp",
    "Great moves!",
    "This is so cool",
    "Amazing play!",
    "Keep it up!",
    "Incredible stream",
    "Best streamer ever",
    "Wow that was insane",
    "GG EZ",
    "Stream goals right here",
    "This is why I love Twitch",
    "Legendary gameplay",
];

const HUB_USERNAMES: &[&str] = &[
    "BlockchainGamer",
    "CryptoViewer",
    "StreamFan123",
    "TwitchLover",
    "GameMaster",
    "DigitalNomad",
    "NFTCollector",
    "StreamWatcher",
    "TechEnthusiast",
    "GameVibes",
    "StreamLife",
    "CryptoFan",
];

const SUBSCRIBER_MESSAGES: &[&str] = &[
    "Great stream! 🔥",
    "Amazing play!",
    "Love the blockchain integration!",
    "This is epic! 💎",
    "Future of streaming right here!",
];

const SUBSCRIBER_USERNAMES: &[&str] = &["StreamFan", "GamerPro", "CryptoNinja", "BlockchainBuddy"];

/// Cadence and content of a generator
#[derive(Debug, Clone)]
pub struct SimulationProfile {
    /// Each tick waits a uniformly random duration in this range
    pub interval: Range<Duration>,
    pub usernames: &'static [&'static str],
    pub messages: &'static [&'static str],
}

impl SimulationProfile {
    /// Process-wide generator following the hub's current channel
    pub fn hub_wide() -> Self {
        Self {
            interval: Duration::from_secs(2)..Duration::from_secs(7),
            usernames: HUB_USERNAMES,
            messages: HUB_MESSAGES,
        }
    }

    /// Generator dedicated to one subscriber that asked to join a channel
    pub fn per_subscriber() -> Self {
        Self {
            interval: Duration::from_secs(3)..Duration::from_secs(5),
            usernames: SUBSCRIBER_USERNAMES,
            messages: SUBSCRIBER_MESSAGES,
        }
    }

    pub fn next_interval<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.interval.is_empty() {
            return self.interval.start;
        }
        rng.random_range(self.interval.clone())
    }

    pub fn next_event<R: Rng + ?Sized>(&self, channel: &ChannelName, rng: &mut R) -> ChatEvent {
        let username = self.usernames.choose(rng).copied().unwrap_or("viewer");
        let message = self.messages.choose(rng).copied().unwrap_or("hi");
        ChatEvent::simulated(username.to_string(), message.to_string(), channel.clone())
    }
}

/// Owner of one running generator task
pub struct SimulationHandle {
    channel: ChannelName,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SimulationHandle {
    pub fn spawn(profile: SimulationProfile, channel: ChannelName, sink: Arc<dyn ChatSink>) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        tracing::debug!("Starting chat simulation for #{}", channel);
        let task = tokio::spawn(run(profile, channel.clone(), sink, stop_rx));
        Self {
            channel,
            stop: stop_tx,
            task,
        }
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the generator and wait until its task has exited.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Simulation task for #{} ended abnormally: {}", self.channel, e);
        }
        tracing::debug!("Stopped chat simulation for #{}", self.channel);
    }
}

async fn run(
    profile: SimulationProfile,
    channel: ChannelName,
    sink: Arc<dyn ChatSink>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let interval = profile.next_interval(&mut rand::rng());

        tokio::select! {
            biased;
            // Also fires if the handle was dropped without calling stop
            _ = stop.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        if *stop.borrow() {
            break;
        }
        if sink.is_closed() {
            tracing::debug!("Simulation sink for #{} closed", channel);
            break;
        }

        let event = profile.next_event(&channel, &mut rand::rng());
        sink.deliver(event);
    }
}
