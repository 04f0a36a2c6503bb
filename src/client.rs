//! Async client for the Nocturne realtime game protocol.
//!
//! [`GameClient`] is a thin handle that talks to a background connection loop
//! task via an unbounded MPSC channel. Events are emitted on a bounded
//! channel ([`tokio::sync::mpsc::Receiver<GameEvent>`]) returned from
//! [`GameClient::start`]; consolidated state is observable through `watch`
//! channels ([`GameClient::state`], [`GameClient::status`]).
//!
//! # Example
//!
//! ```rust,ignore
//! let connector = WsConnector::new("wss://play.example.com", "game-42")
//!     .with_token("bearer-token");
//! let config = ClientConfig::new("game-42").with_local_player("p1");
//! let (client, mut events) = GameClient::start(connector, config);
//!
//! client.join_game()?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         GameEvent::PhaseChanged(change) => { /* … */ }
//!         GameEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::connection::{
    connection_loop, Command, ConnectionSettings, ConnectionShared, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY,
};
use crate::dispatcher::{MessageDispatcher, Subscription};
use crate::error::{NocturneError, Result};
use crate::event::GameEvent;
use crate::protocol::{ClientMessage, GameId, PlayerId, UserStatus};
use crate::state::{GameState, DEFAULT_CHAT_CAPACITY};
use crate::status::ConnectionStatus;
use crate::transport::Connector;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`GameClient`].
///
/// The only required field is the game id; all others have protocol-contract
/// defaults (30 s heartbeat, 3 s linear backoff base, 5 attempts).
///
/// # Example
///
/// ```
/// use nocturne_client::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new("game-42")
///     .with_local_player("p1")
///     .with_heartbeat_interval(Duration::from_secs(15));
/// assert_eq!(config.game_id, "game-42");
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Id of the game this connection is scoped to.
    pub game_id: GameId,
    /// The local user's player id. Required for the client-side vote and
    /// host guards; without it those actions are rejected locally.
    pub local_player_id: Option<PlayerId>,
    /// Interval between client heartbeats. Defaults to **30 seconds**.
    pub heartbeat_interval: Duration,
    /// Base delay for linear reconnection backoff (`attempt * base`).
    /// Defaults to **3 seconds**.
    pub reconnect_base_delay: Duration,
    /// Cap on consecutive reconnection attempts. Defaults to **5**.
    pub max_reconnect_attempts: u32,
    /// Bound on the retained chat log. Defaults to **100** entries.
    pub chat_log_capacity: usize,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, game events are dropped (with a
    /// warning logged) to avoid blocking the connection loop. Connection-down
    /// events are always delivered regardless of capacity.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Timeout for the graceful shutdown.
    ///
    /// When [`GameClient::shutdown`] is called, the background loop is given
    /// this much time to close the transport and emit a final `Disconnected`
    /// event. If the timeout expires the task is aborted.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl ClientConfig {
    /// Create a configuration for the given game with default values.
    pub fn new(game_id: impl Into<GameId>) -> Self {
        Self {
            game_id: game_id.into(),
            local_player_id: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            chat_log_capacity: DEFAULT_CHAT_CAPACITY,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the local user's player id.
    #[must_use]
    pub fn with_local_player(mut self, player_id: impl Into<PlayerId>) -> Self {
        self.local_player_id = Some(player_id.into());
        self
    }

    /// Set the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the base delay for linear reconnection backoff.
    #[must_use]
    pub fn with_reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = delay;
        self
    }

    /// Set the cap on consecutive reconnection attempts.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the chat log bound.
    #[must_use]
    pub fn with_chat_log_capacity(mut self, capacity: usize) -> Self {
        self.chat_log_capacity = capacity.max(1);
        self
    }

    /// Set the capacity of the bounded event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── Client handle ───────────────────────────────────────────────────

/// Async client handle for one Nocturne game connection.
///
/// Created via [`GameClient::start`], which spawns the background connection
/// loop and returns this handle together with an event receiver.
///
/// Action methods serialize a [`ClientMessage`] and queue it to the loop over
/// an unbounded channel; they return once the message is queued (no
/// round-trip await). While the connection is down the message is still
/// queued and flushed on the next successful connect, but the call reports
/// [`NotConnected`](NocturneError::NotConnected) so callers know delivery is
/// deferred.
pub struct GameClient {
    /// Sender half of the command channel to the connection loop.
    cmd_tx: mpsc::UnboundedSender<Command>,
    /// Connection status published by the loop.
    status_rx: watch::Receiver<ConnectionStatus>,
    /// Consolidated game state published by the loop.
    state_rx: watch::Receiver<GameState>,
    /// Type-keyed fan-out for raw envelopes.
    dispatcher: MessageDispatcher,
    /// Handle to the background connection loop task.
    task: Option<tokio::task::JoinHandle<()>>,
    /// Oneshot sender signalling graceful shutdown.
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl GameClient {
    /// Start the connection loop and return a handle plus event receiver.
    ///
    /// The loop connects immediately via the given [`Connector`] and requests
    /// a game snapshot as its first outbound message.
    ///
    /// # Returns
    ///
    /// A tuple of `(client_handle, event_receiver)`. The event receiver
    /// yields [`GameEvent`]s until the client shuts down.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        connector: impl Connector,
        config: ClientConfig,
    ) -> (Self, mpsc::Receiver<GameEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<GameEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let initial_state =
            GameState::new(Some(config.game_id.clone()), config.local_player_id.clone())
                .with_chat_capacity(config.chat_log_capacity);
        let (state_tx, state_rx) = watch::channel(initial_state);

        let dispatcher = MessageDispatcher::new();

        let settings = ConnectionSettings {
            heartbeat_interval: config.heartbeat_interval,
            reconnect_base_delay: config.reconnect_base_delay,
            max_reconnect_attempts: config.max_reconnect_attempts,
        };
        let shared = ConnectionShared {
            cmd_rx,
            event_tx,
            status_tx,
            state_tx,
            dispatcher: dispatcher.clone(),
            shutdown_rx,
        };

        let task = tokio::spawn(connection_loop(connector, settings, shared));

        let client = Self {
            cmd_tx,
            status_rx,
            state_rx,
            dispatcher,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };

        (client, event_rx)
    }

    // ── Game actions ────────────────────────────────────────────────

    /// Join the game this connection is scoped to.
    ///
    /// # Errors
    ///
    /// Returns [`NocturneError::NotConnected`] while the connection is down
    /// (the message is still queued and flushed on the next successful
    /// connect) or after [`shutdown`](Self::shutdown).
    pub fn join_game(&self) -> Result<()> {
        self.send(ClientMessage::JoinGame)
    }

    /// Leave the game.
    ///
    /// # Errors
    ///
    /// Returns [`NocturneError::NotConnected`] while the connection is down
    /// (the message is still queued and flushed on the next successful
    /// connect) or after [`shutdown`](Self::shutdown).
    pub fn leave_game(&self) -> Result<()> {
        self.send(ClientMessage::LeaveGame)
    }

    /// Start the game. The server enforces host-ship; no local guard is
    /// applied because the roster may not be known yet in the lobby.
    ///
    /// # Errors
    ///
    /// Returns [`NocturneError::NotConnected`] while the connection is down
    /// (the message is still queued and flushed on the next successful
    /// connect) or after [`shutdown`](Self::shutdown).
    pub fn start_game(&self) -> Result<()> {
        self.send(ClientMessage::StartGame)
    }

    /// Request a full game snapshot (`system_message` reply).
    ///
    /// # Errors
    ///
    /// Returns [`NocturneError::NotConnected`] while the connection is down
    /// (the message is still queued and flushed on the next successful
    /// connect) or after [`shutdown`](Self::shutdown).
    pub fn request_game_status(&self) -> Result<()> {
        self.send(ClientMessage::GetGameStatus)
    }

    /// Request the current voting session state.
    ///
    /// # Errors
    ///
    /// Returns [`NocturneError::NotConnected`] while the connection is down
    /// (the message is still queued and flushed on the next successful
    /// connect) or after [`shutdown`](Self::shutdown).
    pub fn request_voting_status(&self) -> Result<()> {
        self.send(ClientMessage::GetVotingStatus)
    }

    /// Update the local user's lobby status.
    ///
    /// # Errors
    ///
    /// Returns [`NocturneError::NotConnected`] while the connection is down
    /// (the message is still queued and flushed on the next successful
    /// connect) or after [`shutdown`](Self::shutdown).
    pub fn update_user_status(&self, status: UserStatus, game_id: Option<GameId>) -> Result<()> {
        self.send(ClientMessage::UpdateUserStatus { status, game_id })
    }

    /// Cast (or change) a vote against `target`.
    ///
    /// Local preconditions are checked against the current [`GameState`]:
    /// the local player must be known, alive, in a phase that accepts votes,
    /// and eligible in the active session (when one is known). The server
    /// still validates; a rejection arrives as a
    /// [`ServerError`](GameEvent::ServerError) event.
    ///
    /// # Errors
    ///
    /// Returns [`NocturneError::NotEligible`] when a local precondition
    /// fails (nothing is sent), or [`NocturneError::NotConnected`] while the
    /// connection is down (the vote is still queued) or after shutdown.
    pub fn cast_vote(&self, target: impl Into<PlayerId>) -> Result<()> {
        let target = target.into();
        self.state_rx
            .borrow()
            .check_vote_eligibility(&target)
            .map_err(NocturneError::NotEligible)?;
        self.send(ClientMessage::CastVote {
            target_player_id: target,
        })
    }

    /// Advance the game to the next phase. Host only.
    ///
    /// # Errors
    ///
    /// Returns [`NocturneError::NotEligible`] when the local player is not
    /// the host, or [`NocturneError::NotConnected`] while the connection is
    /// down (the message is still queued) or after shutdown.
    pub fn force_next_phase(&self) -> Result<()> {
        self.state_rx
            .borrow()
            .check_force_next_phase()
            .map_err(NocturneError::NotEligible)?;
        self.send(ClientMessage::ForceNextPhase)
    }

    /// Send a chat message on the given channel (`"all"` when `None`).
    ///
    /// # Errors
    ///
    /// Returns [`NocturneError::NotConnected`] while the connection is down
    /// (the message is still queued and flushed on the next successful
    /// connect) or after [`shutdown`](Self::shutdown).
    pub fn send_chat(&self, message: impl Into<String>, channel: Option<String>) -> Result<()> {
        self.send(ClientMessage::ChatMessage {
            message: message.into(),
            channel: channel.unwrap_or_else(|| "all".to_owned()),
        })
    }

    /// Send an immediate heartbeat, outside the regular interval.
    ///
    /// # Errors
    ///
    /// Returns [`NocturneError::NotConnected`] while the connection is down
    /// (the message is still queued and flushed on the next successful
    /// connect) or after [`shutdown`](Self::shutdown).
    pub fn heartbeat(&self) -> Result<()> {
        self.send(ClientMessage::Heartbeat)
    }

    /// Restart the connection cycle after reconnection attempts were
    /// exhausted (see [`GameEvent::ReconnectFailed`]). Also skips any
    /// backoff delay currently in progress. Harmless while connected.
    ///
    /// # Errors
    ///
    /// Returns [`NocturneError::NotConnected`] only if the connection loop
    /// has stopped.
    pub fn reconnect(&self) -> Result<()> {
        self.cmd_tx
            .send(Command::Reconnect)
            .map_err(|_| NocturneError::NotConnected)
    }

    /// Shut down the client: close the transport, stop the background loop.
    ///
    /// A final [`Disconnected`](GameEvent::Disconnected) event is emitted,
    /// after which the event receiver yields `None`.
    pub async fn shutdown(&mut self) {
        debug!("GameClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await the loop with a timeout. If it doesn't exit in time, abort it
        // so the task cannot detach and run indefinitely.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("connection loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("connection loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("connection loop aborted: {join_err}");
                    }
                }
            }
        }
    }

    // ── Observation ─────────────────────────────────────────────────

    /// Watch receiver for the connection status. Each transition publishes a
    /// fresh [`ConnectionStatus`] value.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Watch receiver for the consolidated game state. Every folded message
    /// publishes a fresh [`GameState`] value.
    pub fn state(&self) -> watch::Receiver<GameState> {
        self.state_rx.clone()
    }

    /// Returns `true` if the transport is currently believed connected.
    pub fn is_connected(&self) -> bool {
        self.status_rx.borrow().is_connected
    }

    /// Register a raw-envelope handler for the given envelope type (or
    /// [`WILDCARD`](crate::dispatcher::WILDCARD)).
    ///
    /// Handlers run on the connection loop task after the typed pipeline has
    /// processed the message; see [`MessageDispatcher`].
    pub fn subscribe<F>(&self, kind: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(kind, handler)
    }

    // ── Internal helpers ────────────────────────────────────────────

    /// Queue a message to the connection loop. The message is always queued
    /// while the loop runs, but the call reports failure when the connection
    /// is down so callers know delivery is deferred.
    fn send(&self, message: ClientMessage) -> Result<()> {
        self.cmd_tx
            .send(Command::Send(message))
            .map_err(|_| NocturneError::NotConnected)?;
        if self.status_rx.borrow().is_connected {
            Ok(())
        } else {
            Err(NocturneError::NotConnected)
        }
    }
}

impl std::fmt::Debug for GameClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameClient")
            .field("connected", &self.is_connected())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        // `Drop` is synchronous so we cannot await a graceful shutdown.
        // The only safe action is to abort the spawned task, which causes
        // the connection loop future to be dropped immediately.  The
        // `shutdown_tx` oneshot is intentionally *not* sent here: sending
        // it would trigger a graceful path that calls async `transport.close()`,
        // but there is no executor context to drive it inside `Drop`.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::event::DisconnectReason;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    // ── Mock transport ──────────────────────────────────────────────

    /// A mock transport that records sent messages and replays scripted
    /// responses.
    struct MockTransport {
        /// Messages that `recv()` will yield in order. An explicit `None`
        /// entry signals a clean transport close.
        incoming: VecDeque<Option<std::result::Result<String, NocturneError>>>,
        /// Recorded outgoing messages (shared across reconnects).
        sent: Arc<StdMutex<Vec<String>>>,
        /// Whether `close()` was called.
        closed: Arc<AtomicBool>,
        /// When set, every `send()` fails without recording the message.
        fail_sends: bool,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), NocturneError> {
            if self.fail_sends {
                return Err(NocturneError::TransportSend("scripted failure".to_owned()));
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, NocturneError>> {
            if let Some(item) = self.incoming.pop_front() {
                item
            } else {
                // All scripted messages have been delivered — hang forever so
                // the connection loop stays alive until shutdown.
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> std::result::Result<(), NocturneError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    /// A connector serving scripted connection outcomes. Once the script is
    /// exhausted, further attempts fail.
    struct MockConnector {
        script: VecDeque<std::result::Result<MockTransport, NocturneError>>,
    }

    #[async_trait]
    impl crate::transport::Connector for MockConnector {
        type Transport = MockTransport;

        async fn connect(&mut self) -> std::result::Result<MockTransport, NocturneError> {
            self.script
                .pop_front()
                .unwrap_or_else(|| Err(NocturneError::Timeout))
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    type Scripted = Vec<Option<std::result::Result<String, NocturneError>>>;

    fn transport_with(
        incoming: Scripted,
        sent: &Arc<StdMutex<Vec<String>>>,
        closed: &Arc<AtomicBool>,
    ) -> MockTransport {
        MockTransport {
            incoming: incoming.into(),
            sent: Arc::clone(sent),
            closed: Arc::clone(closed),
            fail_sends: false,
        }
    }

    /// A transport whose sends all fail, for flush-failure scenarios.
    fn failing_transport(
        sent: &Arc<StdMutex<Vec<String>>>,
        closed: &Arc<AtomicBool>,
    ) -> MockTransport {
        MockTransport {
            fail_sends: true,
            ..transport_with(vec![], sent, closed)
        }
    }

    /// Single-connection harness: one transport, shared `sent` log.
    fn single_connection(
        incoming: Scripted,
    ) -> (MockConnector, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let connector = MockConnector {
            script: VecDeque::from([Ok(transport_with(incoming, &sent, &closed))]),
        };
        (connector, sent, closed)
    }

    fn snapshot_json() -> String {
        json!({
            "type": "system_message",
            "data": {
                "players": [
                    {"id": "p1", "name": "Alice", "status": "connected", "alive": true},
                    {"id": "p2", "name": "Bob", "status": "connected", "alive": true}
                ],
                "phase": "voting",
                "host_id": "p1"
            }
        })
        .to_string()
    }

    fn voting_started_json() -> String {
        json!({
            "type": "voting_started",
            "data": {
                "session_id": "s1",
                "eligible_voters": ["p1", "p2"],
                "valid_targets": ["p2"]
            }
        })
        .to_string()
    }

    fn test_config() -> ClientConfig {
        ClientConfig::new("game-42")
            .with_local_player("p1")
            .with_reconnect_base_delay(Duration::from_millis(10))
            .with_shutdown_timeout(Duration::from_millis(200))
    }

    /// Decode a recorded outbound frame's type string.
    fn frame_type(frame: &str) -> String {
        let value: Value = serde_json::from_str(frame).unwrap();
        value["type"].as_str().unwrap().to_owned()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn connected_is_first_event_and_snapshot_is_requested() {
        let (connector, sent, _closed) = single_connection(vec![]);
        let (mut client, mut events) = GameClient::start(connector, test_config());

        let first = events.recv().await.unwrap();
        assert!(matches!(first, GameEvent::Connected));

        settle().await;
        {
            let messages = sent.lock().unwrap();
            assert!(!messages.is_empty());
            // The loop's first outbound message requests a fresh snapshot.
            assert_eq!(frame_type(&messages[0]), "get_game_status");
        }

        client.shutdown().await;
    }

    #[tokio::test]
    async fn snapshot_updates_the_state_watch() {
        let (connector, _sent, _closed) = single_connection(vec![Some(Ok(snapshot_json()))]);
        let (mut client, mut events) = GameClient::start(connector, test_config());

        let _ = events.recv().await; // Connected
        let event = events.recv().await.unwrap();
        assert!(matches!(event, GameEvent::SystemMessage(_)));

        let state = client.state();
        let state = state.borrow();
        assert_eq!(state.players.len(), 2);
        assert_eq!(state.host.as_deref(), Some("p1"));
        assert!(state.is_local_host());
        drop(state);

        assert!(client.is_connected());
        client.shutdown().await;
    }

    #[tokio::test]
    async fn server_heartbeat_ping_is_answered() {
        let ping = json!({"type": "heartbeat"}).to_string();
        let (connector, sent, _closed) = single_connection(vec![Some(Ok(ping))]);
        let (mut client, mut events) = GameClient::start(connector, test_config());

        let _ = events.recv().await; // Connected
        settle().await;

        {
            let messages = sent.lock().unwrap();
            let heartbeats = messages
                .iter()
                .filter(|m| frame_type(m) == "heartbeat")
                .count();
            assert_eq!(heartbeats, 1, "server ping must be answered exactly once");
        }

        client.shutdown().await;
    }

    #[tokio::test]
    async fn top_level_pong_is_not_answered() {
        // The server puts `response: "pong"` at the envelope top level, not
        // inside `data`. Echoing it would make both sides heartbeat forever.
        let pong = json!({
            "type": "heartbeat",
            "response": "pong",
            "timestamp": "2026-01-01T00:00:00Z"
        })
        .to_string();
        let (connector, sent, _closed) = single_connection(vec![Some(Ok(pong))]);
        let (mut client, mut events) = GameClient::start(connector, test_config());

        let _ = events.recv().await; // Connected
        settle().await;

        {
            let messages = sent.lock().unwrap();
            let heartbeats = messages
                .iter()
                .filter(|m| frame_type(m) == "heartbeat")
                .count();
            assert_eq!(heartbeats, 0, "the server's pong must not be echoed");
        }

        client.shutdown().await;
    }

    #[tokio::test]
    async fn server_pong_is_not_answered() {
        let pong = json!({"type": "heartbeat", "data": {"response": "pong"}}).to_string();
        let (connector, sent, _closed) = single_connection(vec![Some(Ok(pong))]);
        let (mut client, mut events) = GameClient::start(connector, test_config());

        let _ = events.recv().await; // Connected
        settle().await;

        {
            let messages = sent.lock().unwrap();
            let heartbeats = messages
                .iter()
                .filter(|m| frame_type(m) == "heartbeat")
                .count();
            assert_eq!(heartbeats, 0, "a pong acknowledgment must not be echoed");
        }

        client.shutdown().await;
    }

    #[tokio::test]
    async fn heartbeat_timer_sends_on_interval() {
        let (connector, sent, _closed) = single_connection(vec![]);
        let config = test_config().with_heartbeat_interval(Duration::from_millis(20));
        let (mut client, mut events) = GameClient::start(connector, config);

        let _ = events.recv().await; // Connected
        tokio::time::sleep(Duration::from_millis(120)).await;

        {
            let messages = sent.lock().unwrap();
            let heartbeats = messages
                .iter()
                .filter(|m| frame_type(m) == "heartbeat")
                .count();
            assert!(heartbeats >= 3, "expected periodic heartbeats, got {heartbeats}");
        }

        client.shutdown().await;
    }

    #[tokio::test]
    async fn outbound_frames_are_timestamped() {
        let (connector, sent, _closed) = single_connection(vec![]);
        let (mut client, mut events) = GameClient::start(connector, test_config());

        let _ = events.recv().await; // Connected
        client.join_game().unwrap();
        settle().await;

        {
            let messages = sent.lock().unwrap();
            let join = messages
                .iter()
                .find(|m| frame_type(m) == "join_game")
                .expect("join_game frame");
            let value: Value = serde_json::from_str(join).unwrap();
            assert!(value["timestamp"].is_string());
        }

        client.shutdown().await;
    }

    #[tokio::test]
    async fn cast_vote_is_rejected_outside_voting_phase() {
        // No snapshot: phase is Waiting, local player not in the living set.
        let (connector, sent, _closed) = single_connection(vec![]);
        let (mut client, mut events) = GameClient::start(connector, test_config());

        let _ = events.recv().await; // Connected

        let err = client.cast_vote("p2").unwrap_err();
        assert!(matches!(err, NocturneError::NotEligible(_)));

        settle().await;
        {
            let messages = sent.lock().unwrap();
            assert!(
                !messages.iter().any(|m| frame_type(m) == "cast_vote"),
                "a locally rejected vote must not reach the wire"
            );
        }

        client.shutdown().await;
    }

    #[tokio::test]
    async fn cast_vote_sends_when_eligible() {
        let (connector, sent, _closed) = single_connection(vec![
            Some(Ok(snapshot_json())),
            Some(Ok(voting_started_json())),
        ]);
        let (mut client, mut events) = GameClient::start(connector, test_config());

        let _ = events.recv().await; // Connected
        let _ = events.recv().await; // SystemMessage
        let _ = events.recv().await; // VotingStarted

        client.cast_vote("p2").unwrap();
        settle().await;

        {
            let messages = sent.lock().unwrap();
            let vote = messages
                .iter()
                .find(|m| frame_type(m) == "cast_vote")
                .expect("cast_vote frame");
            let value: Value = serde_json::from_str(vote).unwrap();
            assert_eq!(value["data"]["target_player_id"], "p2");
        }

        // Invalid target is still rejected locally.
        let err = client.cast_vote("p1").unwrap_err();
        assert!(matches!(err, NocturneError::NotEligible(_)));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn force_next_phase_requires_hostship() {
        let (connector, sent, _closed) = single_connection(vec![Some(Ok(snapshot_json()))]);
        // Local player p2 is not the host (p1 is).
        let config = test_config().with_local_player("p2");
        let (mut client, mut events) = GameClient::start(connector, config);

        let _ = events.recv().await; // Connected
        let _ = events.recv().await; // SystemMessage

        let err = client.force_next_phase().unwrap_err();
        assert!(matches!(err, NocturneError::NotEligible(_)));

        settle().await;
        assert!(!sent
            .lock()
            .unwrap()
            .iter()
            .any(|m| frame_type(m) == "force_next_phase"));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn reconnects_after_transport_loss_and_flushes_queue() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        // First transport closes immediately; second stays up.
        let connector = MockConnector {
            script: VecDeque::from([
                Ok(transport_with(vec![None], &sent, &closed)),
                Ok(transport_with(vec![], &sent, &closed)),
            ]),
        };
        let (mut client, mut events) = GameClient::start(connector, test_config());

        let _ = events.recv().await; // Connected
        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            GameEvent::Disconnected {
                reason: DisconnectReason::ConnectionLost(_)
            }
        ));

        // Sending while down reports failure but still queues the message;
        // it must go out after the reconnect.
        let err = client.join_game().unwrap_err();
        assert!(matches!(err, NocturneError::NotConnected));

        let event = events.recv().await.unwrap();
        assert!(matches!(event, GameEvent::Reconnecting { attempt: 1, .. }));

        let event = events.recv().await.unwrap();
        assert!(matches!(event, GameEvent::Connected));

        settle().await;
        {
            let messages = sent.lock().unwrap();
            let joins = messages
                .iter()
                .filter(|m| frame_type(m) == "join_game")
                .count();
            assert_eq!(joins, 1, "queued message must be flushed exactly once");
        }

        let status = client.status();
        assert!(status.borrow().is_connected);
        assert_eq!(status.borrow().reconnect_attempts, 0);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn failed_flush_does_not_duplicate_snapshot_requests() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        // First transport connects but cannot send, so the flush fails at
        // the snapshot request; the second transport works.
        let connector = MockConnector {
            script: VecDeque::from([
                Ok(failing_transport(&sent, &closed)),
                Ok(transport_with(vec![], &sent, &closed)),
            ]),
        };
        let (mut client, mut events) = GameClient::start(connector, test_config());

        let _ = events.recv().await; // Connected
        let _ = events.recv().await; // Disconnected (flush failed)
        let _ = events.recv().await; // Reconnecting
        let event = events.recv().await.unwrap();
        assert!(matches!(event, GameEvent::Connected));

        settle().await;
        {
            let messages = sent.lock().unwrap();
            let snapshots = messages
                .iter()
                .filter(|m| frame_type(m) == "get_game_status")
                .count();
            assert_eq!(snapshots, 1, "one snapshot request per live connect");
        }

        client.shutdown().await;
    }

    #[tokio::test]
    async fn exhaustion_is_terminal_until_explicit_reconnect() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        // Initial connect succeeds then drops; every retry fails.
        let mut script: VecDeque<std::result::Result<MockTransport, NocturneError>> =
            VecDeque::from([Ok(transport_with(vec![None], &sent, &closed))]);
        for _ in 0..2 {
            script.push_back(Err(NocturneError::Timeout));
        }
        // A working transport, reachable only via an explicit reconnect.
        script.push_back(Ok(transport_with(vec![], &sent, &closed)));

        let connector = MockConnector { script };
        let config = test_config().with_max_reconnect_attempts(2);
        let (mut client, mut events) = GameClient::start(connector, config);

        let _ = events.recv().await; // Connected
        let _ = events.recv().await; // Disconnected

        // Two failed attempts, then exhaustion.
        let event = events.recv().await.unwrap();
        assert!(matches!(event, GameEvent::Reconnecting { attempt: 1, .. }));
        let event = events.recv().await.unwrap();
        assert!(matches!(event, GameEvent::Reconnecting { attempt: 2, .. }));
        let event = events.recv().await.unwrap();
        assert!(matches!(event, GameEvent::ReconnectFailed { attempts: 2 }));

        {
            let status = client.status();
            let status = status.borrow();
            assert!(!status.is_connected);
            assert!(!status.is_reconnecting);
            assert!(status.error.is_some());
        }

        // The loop is parked: no further attempts happen on their own.
        settle().await;

        client.reconnect().unwrap();
        let event = events.recv().await.unwrap();
        assert!(matches!(event, GameEvent::Connected));
        assert_eq!(client.status().borrow().reconnect_attempts, 0);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_emits_client_requested_disconnect() {
        let (connector, _sent, closed) = single_connection(vec![]);
        let (mut client, mut events) = GameClient::start(connector, test_config());

        let _ = events.recv().await; // Connected
        client.shutdown().await;

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            GameEvent::Disconnected {
                reason: DisconnectReason::ClientRequested
            }
        ));
        assert!(closed.load(Ordering::Relaxed));
        assert!(!client.is_connected());

        // After shutdown the event channel closes and timers are inert.
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_after_shutdown_returns_not_connected() {
        let (connector, _sent, _closed) = single_connection(vec![]);
        let (mut client, mut events) = GameClient::start(connector, test_config());

        let _ = events.recv().await; // Connected
        client.shutdown().await;
        while events.recv().await.is_some() {}

        let result = client.join_game();
        assert!(matches!(result, Err(NocturneError::NotConnected)));
    }

    #[tokio::test]
    async fn double_shutdown_does_not_panic() {
        let (connector, _sent, _closed) = single_connection(vec![]);
        let (mut client, mut events) = GameClient::start(connector, test_config());

        let _ = events.recv().await; // Connected
        client.shutdown().await;
        client.shutdown().await; // should not panic
    }

    #[tokio::test]
    async fn drop_without_explicit_shutdown() {
        let (connector, _sent, _closed) = single_connection(vec![]);
        let (client, mut events) = GameClient::start(connector, test_config());

        let _ = events.recv().await; // Connected

        // Drop the client without calling shutdown; the loop task is aborted
        // and the event channel closes. We just verify we don't hang.
        drop(client);
        while events.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn state_resets_on_disconnect() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let connector = MockConnector {
            script: VecDeque::from([Ok(transport_with(
                vec![Some(Ok(snapshot_json())), None],
                &sent,
                &closed,
            ))]),
        };
        let config = test_config().with_max_reconnect_attempts(0);
        let (mut client, mut events) = GameClient::start(connector, config);

        let _ = events.recv().await; // Connected
        let _ = events.recv().await; // SystemMessage
        let _ = events.recv().await; // Disconnected

        let state = client.state();
        let state = state.borrow();
        assert!(state.players.is_empty(), "roster must reset on disconnect");
        assert_eq!(state.game_id.as_deref(), Some("game-42"));
        assert_eq!(state.local_player.as_deref(), Some("p1"));
        drop(state);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn dispatcher_subscribers_receive_raw_payloads() {
        let unknown = json!({"type": "moon_phase", "data": {"phase": "full"}}).to_string();
        let (connector, _sent, _closed) =
            single_connection(vec![Some(Ok(snapshot_json())), Some(Ok(unknown))]);
        let (mut client, mut events) = GameClient::start(connector, test_config());

        let seen: Arc<StdMutex<Vec<String>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let _wildcard = client.subscribe(crate::dispatcher::WILDCARD, move |payload| {
            if let Some(phase) = payload.get("phase").and_then(Value::as_str) {
                sink.lock().unwrap().push(phase.to_owned());
            }
        });

        let _ = events.recv().await; // Connected
        let _ = events.recv().await; // SystemMessage
        settle().await;

        // The unknown type produced no event but reached the wildcard.
        assert_eq!(seen.lock().unwrap().as_slice(), ["full"]);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn config_defaults_match_protocol_contract() {
        let config = ClientConfig::new("game-42");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect_base_delay, Duration::from_secs(3));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.chat_log_capacity, 100);
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert!(config.local_player_id.is_none());
    }

    #[tokio::test]
    async fn event_channel_capacity_is_clamped_to_one() {
        let config = ClientConfig::new("game-42").with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }
}
