//! Upstream chat client
//!
//! A single background task owns the connection and walks the state machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Reconnecting -> Connecting ...
//!                                            Reconnecting -> Disconnected (attempts exhausted)
//! ```
//!
//! Callers talk to it through a command channel, so channel joins and shutdown
//! are serialized with socket traffic and the pending reconnect timer has one owner.

use super::parser::{parse_payload, Frame};
use super::{UpstreamConnector, UpstreamError, UpstreamResult, UpstreamTransport};
use crate::backoff::Backoff;
use crate::hub::ChatSink;
use crate::types::{ChannelName, ConnectionState};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

const CAPABILITY_REQUEST: &str = "CAP REQ :twitch.tv/tags twitch.tv/commands";
/// Any password is accepted for anonymous (justinfan) logins
const ANONYMOUS_PASSWORD: &str = "SCHMOOPIIE";

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub url: String,
    pub max_reconnect_attempts: u32,
    pub backoff: Backoff,
    /// Channel to join on the first successful handshake
    pub initial_channel: Option<ChannelName>,
}

#[derive(Debug)]
enum Command {
    Join(ChannelName),
    Shutdown,
}

enum SessionEnd {
    Closed,
    Shutdown,
}

/// Handle to the background upstream connection
pub struct UpstreamClient {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: Mutex<Option<JoinHandle<UpstreamResult<()>>>>,
}

impl UpstreamClient {
    /// Start the connection task. Parsed chat events are pushed into `sink`.
    pub fn spawn(
        config: UpstreamConfig,
        connector: Arc<dyn UpstreamConnector>,
        sink: Arc<dyn ChatSink>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let worker = Worker {
            channel: config.initial_channel.clone(),
            config,
            connector,
            sink,
            commands: command_rx,
            state: state_tx,
            attempts: 0,
        };

        Self {
            commands: command_tx,
            state: state_rx,
            task: Mutex::new(Some(tokio::spawn(worker.run()))),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Make `channel` the joined channel.
    ///
    /// Sent immediately when connected, otherwise deferred to the next handshake.
    pub async fn join_channel(&self, channel: ChannelName) -> UpstreamResult<()> {
        self.commands
            .send(Command::Join(channel))
            .await
            .map_err(|_| UpstreamError::Stopped)
    }

    /// Close the connection and cancel any pending reconnect, then wait for the task.
    pub async fn shutdown(&self) -> UpstreamResult<()> {
        // The task may already have ended after exhausting its retries
        let _ = self.commands.send(Command::Shutdown).await;
        self.finished().await
    }

    /// Wait for the connection task to end and return its outcome.
    ///
    /// Returns `Ok(())` if the outcome was already collected.
    pub async fn finished(&self) -> UpstreamResult<()> {
        let handle = self.task.lock().await.take();
        match handle {
            Some(handle) => handle.await.map_err(|e| {
                tracing::error!("Upstream task failed: {}", e);
                UpstreamError::Stopped
            })?,
            None => Ok(()),
        }
    }
}

struct Worker {
    config: UpstreamConfig,
    connector: Arc<dyn UpstreamConnector>,
    sink: Arc<dyn ChatSink>,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<ConnectionState>,
    channel: Option<ChannelName>,
    attempts: u32,
}

impl Worker {
    async fn run(mut self) -> UpstreamResult<()> {
        loop {
            self.set_state(ConnectionState::Connecting);

            match self.connect_and_run().await {
                Ok(SessionEnd::Shutdown) => {
                    tracing::info!("Upstream client shut down");
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
                Ok(SessionEnd::Closed) => {
                    tracing::warn!("Upstream connection closed");
                }
                Err(e) => {
                    tracing::warn!("Upstream connection error: {}", e);
                }
            }

            self.attempts += 1;
            if self.attempts > self.config.max_reconnect_attempts {
                tracing::error!(
                    "Maximum reconnection attempts ({}) reached, upstream feed stopped",
                    self.config.max_reconnect_attempts
                );
                self.set_state(ConnectionState::Disconnected);
                return Err(UpstreamError::ExhaustedRetries {
                    attempts: self.config.max_reconnect_attempts,
                });
            }

            self.set_state(ConnectionState::Reconnecting);
            let delay = self.next_delay();
            tracing::warn!(
                "Reconnecting to upstream in {:?} (attempt {})",
                delay,
                self.attempts
            );

            if !self.wait_before_reconnect(delay).await {
                tracing::info!("Upstream client shut down while waiting to reconnect");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }
        }
    }

    fn next_delay(&self) -> Duration {
        let mut rng = rand::rng();
        self.config
            .backoff
            .delay_with_jitter(self.attempts, &mut rng)
    }

    /// Sleep for `delay` while still accepting commands.
    /// Returns false if shutdown was requested.
    async fn wait_before_reconnect(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Join(channel)) => {
                        tracing::info!("Deferring join of #{} until reconnected", channel);
                        self.channel = Some(channel);
                    }
                    Some(Command::Shutdown) | None => return false,
                },
            }
        }
    }

    async fn connect_and_run(&mut self) -> UpstreamResult<SessionEnd> {
        tracing::info!("Connecting to upstream chat at {}", self.config.url);

        let mut transport = {
            let connect = self.connector.connect(&self.config.url);
            tokio::pin!(connect);
            loop {
                tokio::select! {
                    result = &mut connect => break result?,
                    cmd = self.commands.recv() => match cmd {
                        Some(Command::Join(channel)) => self.channel = Some(channel),
                        Some(Command::Shutdown) | None => return Ok(SessionEnd::Shutdown),
                    },
                }
            }
        };

        self.handshake(transport.as_mut()).await?;
        self.attempts = 0;
        self.set_state(ConnectionState::Connected);
        tracing::info!("Connected to upstream chat");

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Join(channel)) => {
                        self.switch_channel(transport.as_mut(), channel).await?;
                    }
                    Some(Command::Shutdown) | None => {
                        transport.close().await;
                        return Ok(SessionEnd::Shutdown);
                    }
                },
                payload = transport.recv() => match payload? {
                    Some(text) => self.handle_payload(transport.as_mut(), &text).await?,
                    None => return Ok(SessionEnd::Closed),
                },
            }
        }
    }

    /// Capabilities, then credentials, then the join. The server rejects a
    /// join that arrives before the credentials.
    async fn handshake(&mut self, transport: &mut dyn UpstreamTransport) -> UpstreamResult<()> {
        let nick = anonymous_nick();
        tracing::debug!("Authenticating anonymously as {}", nick);

        transport.send_line(CAPABILITY_REQUEST).await?;
        transport
            .send_line(&format!("PASS {}", ANONYMOUS_PASSWORD))
            .await?;
        transport.send_line(&format!("NICK {}", nick)).await?;

        if let Some(channel) = &self.channel {
            transport.send_line(&format!("JOIN #{}", channel)).await?;
            tracing::info!("Joined upstream channel: {}", channel);
        }
        Ok(())
    }

    async fn switch_channel(
        &mut self,
        transport: &mut dyn UpstreamTransport,
        channel: ChannelName,
    ) -> UpstreamResult<()> {
        if self.channel.as_ref() == Some(&channel) {
            tracing::debug!("Already joined #{}", channel);
            return Ok(());
        }

        // Stored first so a failed send is retried by the next handshake
        let previous = self.channel.replace(channel.clone());
        if let Some(previous) = previous {
            transport.send_line(&format!("PART #{}", previous)).await?;
        }
        transport.send_line(&format!("JOIN #{}", channel)).await?;
        tracing::info!("Joined upstream channel: {}", channel);
        Ok(())
    }

    async fn handle_payload(
        &mut self,
        transport: &mut dyn UpstreamTransport,
        payload: &str,
    ) -> UpstreamResult<()> {
        for frame in parse_payload(payload) {
            match frame {
                Frame::Ping(ping) => {
                    tracing::trace!("Received PING, replying");
                    transport.send_line(&ping.reply()).await?;
                }
                Frame::Chat(event) => {
                    tracing::trace!("#{} <{}> {}", event.channel, event.username, event.message);
                    self.sink.deliver(event);
                }
                Frame::Unrecognized => {}
            }
        }
        Ok(())
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("Upstream state {:?} -> {:?}", previous, state);
        }
    }
}

fn anonymous_nick() -> String {
    format!("justinfan{}", rand::rng().random_range(1000..=99999))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatEvent;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeTransport {
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<String>,
    }

    #[async_trait]
    impl UpstreamTransport for FakeTransport {
        async fn send_line(&mut self, line: &str) -> UpstreamResult<()> {
            self.outbound
                .send(line.to_string())
                .map_err(|_| UpstreamError::ConnectionClosed)
        }

        async fn recv(&mut self) -> UpstreamResult<Option<String>> {
            Ok(self.inbound.recv().await)
        }

        async fn close(&mut self) {
            self.inbound.close();
        }
    }

    /// Hands out queued transports, then refuses further connections
    #[derive(Default)]
    struct FakeConnector {
        sessions: std::sync::Mutex<VecDeque<FakeTransport>>,
        attempts: AtomicU32,
    }

    impl FakeConnector {
        /// Queue a session; returns (server-side outbound reader, server-side inbound writer)
        fn push_session(
            &self,
        ) -> (
            mpsc::UnboundedReceiver<String>,
            mpsc::UnboundedSender<String>,
        ) {
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            self.sessions.lock().unwrap().push_back(FakeTransport {
                outbound: out_tx,
                inbound: in_rx,
            });
            (out_rx, in_tx)
        }
    }

    #[async_trait]
    impl UpstreamConnector for FakeConnector {
        async fn connect(&self, _url: &str) -> UpstreamResult<Box<dyn UpstreamTransport>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            match self.sessions.lock().unwrap().pop_front() {
                Some(transport) => Ok(Box::new(transport)),
                None => Err(UpstreamError::Connect("connection refused".to_string())),
            }
        }
    }

    struct ChannelSink(mpsc::UnboundedSender<ChatEvent>);

    impl ChatSink for ChannelSink {
        fn deliver(&self, event: ChatEvent) {
            let _ = self.0.send(event);
        }
    }

    fn config(max_reconnect_attempts: u32, initial: Option<&str>) -> UpstreamConfig {
        UpstreamConfig {
            url: "wss://upstream.test".to_string(),
            max_reconnect_attempts,
            backoff: Backoff::default(),
            initial_channel: initial.and_then(ChannelName::parse),
        }
    }

    fn sink() -> (Arc<dyn ChatSink>, mpsc::UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ChannelSink(tx)), rx)
    }

    async fn next_line(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        rx.recv().await.expect("transport closed")
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_order_with_preselected_channel() {
        let connector = Arc::new(FakeConnector::default());
        let (mut out, _in) = connector.push_session();
        let (sink, _events) = sink();

        let client = UpstreamClient::spawn(config(3, Some("Foo")), connector.clone(), sink);

        assert_eq!(next_line(&mut out).await, CAPABILITY_REQUEST);
        assert_eq!(next_line(&mut out).await, "PASS SCHMOOPIIE");
        let nick = next_line(&mut out).await;
        assert!(nick.starts_with("NICK justinfan"), "unexpected nick line {}", nick);
        assert_eq!(next_line(&mut out).await, "JOIN #foo");

        let mut state = client.subscribe_state();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        client.shutdown().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_is_answered_and_chat_forwarded() {
        let connector = Arc::new(FakeConnector::default());
        let (mut out, inbound) = connector.push_session();
        let (sink, mut events) = sink();

        let client = UpstreamClient::spawn(config(3, None), connector.clone(), sink);
        for _ in 0..3 {
            next_line(&mut out).await;
        }

        inbound
            .send("PING :server.x\r\n:alice!alice@alice.host.x PRIVMSG #testchan :hello world\r\n".to_string())
            .unwrap();

        assert_eq!(next_line(&mut out).await, "PONG :server.x");
        let event = events.recv().await.unwrap();
        assert_eq!(event.username, "alice");
        assert_eq!(event.channel.as_str(), "testchan");
        assert_eq!(event.message, "hello world");

        client.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_while_connected_parts_previous_channel() {
        let connector = Arc::new(FakeConnector::default());
        let (mut out, _in) = connector.push_session();
        let (sink, _events) = sink();

        let client = UpstreamClient::spawn(config(3, Some("first")), connector.clone(), sink);
        for _ in 0..4 {
            next_line(&mut out).await;
        }

        client
            .join_channel(ChannelName::parse("Second").unwrap())
            .await
            .unwrap();
        assert_eq!(next_line(&mut out).await, "PART #first");
        assert_eq!(next_line(&mut out).await, "JOIN #second");

        client.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_switch_still_joins_new_channel_after_reconnect() {
        let connector = Arc::new(FakeConnector::default());
        let (mut first_out, _first_in) = connector.push_session();
        let (mut second_out, _second_in) = connector.push_session();
        let (sink, _events) = sink();

        let client = UpstreamClient::spawn(config(3, Some("first")), connector.clone(), sink);
        for _ in 0..4 {
            next_line(&mut first_out).await;
        }

        // Writes on the first connection now fail
        drop(first_out);
        client
            .join_channel(ChannelName::parse("second").unwrap())
            .await
            .unwrap();

        assert_eq!(next_line(&mut second_out).await, CAPABILITY_REQUEST);
        assert_eq!(next_line(&mut second_out).await, "PASS SCHMOOPIIE");
        next_line(&mut second_out).await;
        assert_eq!(next_line(&mut second_out).await, "JOIN #second");
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);

        client.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_and_rejoins_after_close() {
        let connector = Arc::new(FakeConnector::default());
        let (mut first_out, first_in) = connector.push_session();
        let (mut second_out, _second_in) = connector.push_session();
        let (sink, _events) = sink();

        let client = UpstreamClient::spawn(config(3, None), connector.clone(), sink);
        for _ in 0..3 {
            next_line(&mut first_out).await;
        }
        client
            .join_channel(ChannelName::parse("later").unwrap())
            .await
            .unwrap();
        assert_eq!(next_line(&mut first_out).await, "JOIN #later");

        // Server hangs up
        drop(first_in);

        for _ in 0..3 {
            next_line(&mut second_out).await;
        }
        assert_eq!(next_line(&mut second_out).await, "JOIN #later");
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);

        client.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_while_disconnected_is_deferred() {
        let connector = Arc::new(FakeConnector::default());
        let (sink, _events) = sink();

        // First connect fails, second succeeds
        let client = UpstreamClient::spawn(config(5, None), connector.clone(), sink);
        let mut state = client.subscribe_state();
        state
            .wait_for(|s| *s == ConnectionState::Reconnecting)
            .await
            .unwrap();

        let (mut out, _in) = connector.push_session();
        client
            .join_channel(ChannelName::parse("deferred").unwrap())
            .await
            .unwrap();

        for _ in 0..3 {
            next_line(&mut out).await;
        }
        assert_eq!(next_line(&mut out).await, "JOIN #deferred");

        client.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_is_terminal() {
        let connector = Arc::new(FakeConnector::default());
        let (sink, _events) = sink();

        let client = UpstreamClient::spawn(config(3, Some("chan")), connector.clone(), sink);

        let result = client.finished().await;
        assert!(matches!(
            result,
            Err(UpstreamError::ExhaustedRetries { attempts: 3 })
        ));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        // One initial attempt plus three reconnects
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);

        // Nothing else is scheduled
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);
        assert!(matches!(
            client.join_channel(ChannelName::parse("x").unwrap()).await,
            Err(UpstreamError::Stopped)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_reconnect() {
        let connector = Arc::new(FakeConnector::default());
        let (sink, _events) = sink();

        let client = UpstreamClient::spawn(config(10, None), connector.clone(), sink);
        let mut state = client.subscribe_state();
        state
            .wait_for(|s| *s == ConnectionState::Reconnecting)
            .await
            .unwrap();

        client.shutdown().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        let attempts = connector.attempts.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), attempts);
    }
}
