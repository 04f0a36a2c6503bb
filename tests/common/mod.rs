#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for Nocturne client integration tests.
//!
//! Provides a scripted [`MockTransport`] / [`MockConnector`] pair and helper
//! functions for constructing common server envelope JSON strings.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde_json::json;

use nocturne_client::{Connector, NocturneError, Transport};

// ── MockTransport ───────────────────────────────────────────────────

/// Scripted server responses consumed in order by `recv()`; `None` entries
/// signal a clean transport close. All messages sent by the client are
/// recorded in `sent`.
pub struct MockTransport {
    incoming: VecDeque<Option<Result<String, NocturneError>>>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), NocturneError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, NocturneError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            // No more scripted messages — hang forever so the connection loop
            // stays alive until shutdown is called.
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), NocturneError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Serves scripted connection outcomes; attempts beyond the script fail.
/// All transports produced share one `sent` log and one `closed` flag.
pub struct MockConnector {
    script: VecDeque<Result<Vec<Option<Result<String, NocturneError>>>, NocturneError>>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl MockConnector {
    /// Each script entry is one connection attempt: `Ok(incoming)` yields a
    /// transport with those scripted responses, `Err(e)` fails the attempt.
    pub fn new(
        script: Vec<Result<Vec<Option<Result<String, NocturneError>>>, NocturneError>>,
    ) -> Self {
        Self {
            script: script.into(),
            sent: Arc::new(StdMutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Connector for the common case: a single successful connection.
    pub fn single(incoming: Vec<Option<Result<String, NocturneError>>>) -> Self {
        Self::new(vec![Ok(incoming)])
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&mut self) -> Result<MockTransport, NocturneError> {
        match self.script.pop_front() {
            Some(Ok(incoming)) => Ok(MockTransport {
                incoming: incoming.into(),
                sent: Arc::clone(&self.sent),
                closed: Arc::clone(&self.closed),
            }),
            Some(Err(e)) => Err(e),
            None => Err(NocturneError::Timeout),
        }
    }
}

// ── JSON helper functions ───────────────────────────────────────────

/// A `system_message` snapshot with four named players, two connected,
/// hosted by `p1`, in the given phase.
pub fn snapshot_json(phase: &str) -> String {
    json!({
        "type": "system_message",
        "data": {
            "message": "game state",
            "players": [
                {"id": "p1", "name": "Alice", "status": "connected", "alive": true},
                {"id": "p2", "name": "Bob", "status": "in_game", "alive": true},
                {"id": "p3", "name": "Cleo", "status": "disconnected", "alive": true},
                {"id": "p4", "name": "Dan", "status": "disconnected", "alive": true}
            ],
            "phase": phase,
            "host_id": "p1"
        }
    })
    .to_string()
}

pub fn phase_changed_json(current: &str, time_remaining: u32) -> String {
    json!({
        "type": "phase_changed",
        "data": {"current": current, "time_remaining": time_remaining, "duration": time_remaining}
    })
    .to_string()
}

pub fn voting_started_json(session_id: &str, voters: &[&str], targets: &[&str]) -> String {
    json!({
        "type": "voting_started",
        "data": {
            "session_id": session_id,
            "vote_type": "day_vote",
            "eligible_voters": voters,
            "valid_targets": targets
        }
    })
    .to_string()
}

pub fn vote_cast_json(voter: &str, target: &str) -> String {
    json!({
        "type": "vote_cast",
        "data": {"voter_id": voter, "target_id": target}
    })
    .to_string()
}

pub fn voting_results_json(winner: &str) -> String {
    json!({
        "type": "voting_results",
        "data": {"results": {"winner": winner, "tie": false, "vote_counts": {winner: 2}}}
    })
    .to_string()
}

pub fn eliminated_json(player_id: &str, role: &str) -> String {
    json!({
        "type": "player_eliminated",
        "data": {"player_id": player_id, "role": role, "elimination_type": "lynch"}
    })
    .to_string()
}

pub fn chat_json(sender: &str, message: &str) -> String {
    json!({
        "type": "chat_message",
        "data": {"message": message, "sender_id": sender, "sender_name": sender, "channel": "all"}
    })
    .to_string()
}

pub fn player_connected_json(player_id: &str) -> String {
    json!({"type": "player_connected", "data": {"user_id": player_id}}).to_string()
}

pub fn player_disconnected_json(player_id: &str) -> String {
    json!({"type": "player_disconnected", "data": {"user_id": player_id}}).to_string()
}

pub fn error_json(message: &str, code: &str) -> String {
    json!({"type": "error", "data": {"message": message, "error_code": code}}).to_string()
}

/// A bare server heartbeat (liveness ping that must be answered).
pub fn heartbeat_ping_json() -> String {
    json!({"type": "heartbeat"}).to_string()
}

/// The server's acknowledgment of a client heartbeat (must not be answered).
/// `response` sits at the envelope top level, matching the backend's shape.
pub fn heartbeat_pong_json() -> String {
    json!({
        "type": "heartbeat",
        "response": "pong",
        "timestamp": "2026-01-01T00:00:00Z"
    })
    .to_string()
}
