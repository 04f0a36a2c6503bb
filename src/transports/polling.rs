//! Polling fallback transport.
//!
//! Some deployments sit behind proxies that break WebSocket upgrades. The
//! [`PollingTransport`] keeps the rest of the client unchanged in that case:
//! it implements [`Transport`] by periodically pulling snapshots from a
//! [`SnapshotSource`] (typically a REST endpoint pair) and synthesizing the
//! `game_connection_state` and `players_status_update` envelopes the
//! connection loop already understands. Outbound messages are forwarded to
//! the source, which submits them out of band.
//!
//! # Feature gate
//!
//! Available when the `polling-client` feature is enabled.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::{sleep_until, Instant};

use crate::error::NocturneError;
use crate::protocol::{Envelope, PlayerStatusEntry};
use crate::transport::Transport;

/// Default interval between snapshot polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Backend a [`PollingTransport`] pulls snapshots from.
///
/// Implementations typically wrap an HTTP client hitting the game server's
/// REST status endpoints.
#[async_trait]
pub trait SnapshotSource: Send + 'static {
    /// Fetch the aggregate connection-state snapshot. The returned object
    /// becomes the `data` of a synthesized `game_connection_state` envelope.
    async fn fetch_connection_state(&mut self) -> Result<Value, NocturneError>;

    /// Fetch the per-player status list. Becomes the `data` of a synthesized
    /// `players_status_update` envelope.
    async fn fetch_players_status(&mut self) -> Result<Vec<PlayerStatusEntry>, NocturneError>;

    /// Submit an outbound message out of band. Sources with no submission
    /// path may drop the message; the default does exactly that.
    async fn submit(&mut self, message: String) -> Result<(), NocturneError> {
        let _ = message;
        Ok(())
    }
}

/// A [`Transport`] that synthesizes inbound envelopes from periodic
/// snapshots.
///
/// Each poll cycle produces up to two envelopes, queued and returned one per
/// [`recv`](Transport::recv) call. A failed fetch is surfaced as a transport
/// receive error, which the connection loop treats like any other drop.
///
/// # Cancel Safety
///
/// `recv` is cancel-safe in the sense the connection loop needs: queued
/// envelopes are never lost, and a cancelled in-flight poll is simply retried
/// on the next call. Snapshots are idempotent, so a repeated fetch observes
/// the same or newer server state.
pub struct PollingTransport<S> {
    source: S,
    interval: Duration,
    next_poll: Instant,
    queue: VecDeque<String>,
    closed: bool,
}

impl<S: SnapshotSource> PollingTransport<S> {
    /// Create a polling transport with the default 3 second interval.
    pub fn new(source: S) -> Self {
        Self::with_interval(source, DEFAULT_POLL_INTERVAL)
    }

    /// Create a polling transport with a custom interval.
    pub fn with_interval(source: S, interval: Duration) -> Self {
        Self {
            source,
            interval,
            // First poll happens immediately so the client gets a snapshot
            // right after connecting.
            next_poll: Instant::now(),
            queue: VecDeque::new(),
            closed: false,
        }
    }

    async fn poll_once(&mut self) -> Result<(), NocturneError> {
        let connection_state = self.source.fetch_connection_state().await?;
        let players_status = self.source.fetch_players_status().await?;

        let state_envelope = Envelope {
            data: Some(connection_state),
            ..Envelope::new("game_connection_state")
        };
        self.queue.push_back(serde_json::to_string(&state_envelope)?);

        let players_envelope = Envelope {
            data: Some(serde_json::to_value(players_status)?),
            ..Envelope::new("players_status_update")
        };
        self.queue
            .push_back(serde_json::to_string(&players_envelope)?);
        Ok(())
    }
}

#[async_trait]
impl<S: SnapshotSource> Transport for PollingTransport<S> {
    async fn send(&mut self, message: String) -> Result<(), NocturneError> {
        if self.closed {
            return Err(NocturneError::TransportClosed);
        }
        self.source.submit(message).await
    }

    async fn recv(&mut self) -> Option<Result<String, NocturneError>> {
        loop {
            if self.closed {
                return None;
            }
            if let Some(frame) = self.queue.pop_front() {
                return Some(Ok(frame));
            }

            sleep_until(self.next_poll).await;
            self.next_poll = Instant::now() + self.interval;
            if let Err(e) = self.poll_once().await {
                return Some(Err(NocturneError::TransportReceive(e.to_string())));
            }
        }
    }

    async fn close(&mut self) -> Result<(), NocturneError> {
        self.closed = true;
        self.queue.clear();
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Source serving scripted snapshots and recording submissions.
    struct ScriptedSource {
        states: VecDeque<Result<Value, NocturneError>>,
        submitted: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedSource {
        fn new(states: Vec<Result<Value, NocturneError>>) -> (Self, Arc<Mutex<Vec<String>>>) {
            let submitted = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    states: states.into(),
                    submitted: Arc::clone(&submitted),
                },
                submitted,
            )
        }
    }

    #[async_trait]
    impl SnapshotSource for ScriptedSource {
        async fn fetch_connection_state(&mut self) -> Result<Value, NocturneError> {
            self.states
                .pop_front()
                .unwrap_or_else(|| Ok(json!({"connected_players_count": 0})))
        }

        async fn fetch_players_status(&mut self) -> Result<Vec<PlayerStatusEntry>, NocturneError> {
            Ok(vec![PlayerStatusEntry {
                player_id: "p1".to_owned(),
                username: "Alice".to_owned(),
                status: None,
                is_connected: true,
                last_seen: None,
            }])
        }

        async fn submit(&mut self, message: String) -> Result<(), NocturneError> {
            self.submitted.lock().unwrap().push(message);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poll_cycle_synthesizes_both_envelopes() {
        let (source, _) =
            ScriptedSource::new(vec![Ok(json!({"connected_players_count": 2}))]);
        let mut transport =
            PollingTransport::with_interval(source, Duration::from_millis(50));

        let first = transport.recv().await.unwrap().unwrap();
        let envelope = Envelope::parse(&first).unwrap();
        assert_eq!(envelope.kind, "game_connection_state");
        assert_eq!(envelope.data.unwrap()["connected_players_count"], 2);

        let second = transport.recv().await.unwrap().unwrap();
        let envelope = Envelope::parse(&second).unwrap();
        assert_eq!(envelope.kind, "players_status_update");
        let players: Vec<PlayerStatusEntry> =
            serde_json::from_value(envelope.data.unwrap()).unwrap();
        assert_eq!(players[0].player_id, "p1");
        assert!(players[0].is_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_surfaces_as_receive_error() {
        let (source, _) = ScriptedSource::new(vec![Err(NocturneError::Timeout)]);
        let mut transport =
            PollingTransport::with_interval(source, Duration::from_millis(50));

        let result = transport.recv().await.unwrap();
        assert!(matches!(result, Err(NocturneError::TransportReceive(_))));
    }

    #[tokio::test]
    async fn send_forwards_to_the_source() {
        let (source, submitted) = ScriptedSource::new(vec![]);
        let mut transport = PollingTransport::new(source);

        transport
            .send(r#"{"type":"heartbeat"}"#.to_owned())
            .await
            .unwrap();
        assert_eq!(
            submitted.lock().unwrap().as_slice(),
            [r#"{"type":"heartbeat"}"#]
        );
    }

    #[tokio::test]
    async fn recv_after_close_returns_none() {
        let (source, _) = ScriptedSource::new(vec![]);
        let mut transport = PollingTransport::new(source);
        transport.close().await.unwrap();
        assert!(transport.recv().await.is_none());

        let err = transport.send("late".to_owned()).await.unwrap_err();
        assert!(matches!(err, NocturneError::TransportClosed));
    }
}
