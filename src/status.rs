//! Connection health model observed by UI layers.
//!
//! [`ConnectionStatus`] is owned by the connection loop; every transition
//! produces a fresh value that is published on a `watch` channel rather than
//! mutated in place. The transition helpers below are the only way status
//! changes, which keeps the `is_connected`/`is_reconnecting` exclusivity
//! invariant in one spot.

use chrono::{DateTime, Utc};

/// Snapshot of the transport connection's health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Whether the transport is currently open.
    pub is_connected: bool,
    /// Whether a reconnection attempt is scheduled or in flight.
    /// Never true while `is_connected` is true.
    pub is_reconnecting: bool,
    /// When the transport last opened successfully.
    pub last_connected: Option<DateTime<Utc>>,
    /// Consecutive failed attempts since the last successful open.
    pub reconnect_attempts: u32,
    /// Last connection-level error, cleared on successful open.
    pub error: Option<String>,
}

impl ConnectionStatus {
    /// Status after a successful open: attempts reset, error cleared.
    pub fn connected(&self) -> Self {
        Self {
            is_connected: true,
            is_reconnecting: false,
            last_connected: Some(Utc::now()),
            reconnect_attempts: 0,
            error: None,
        }
    }

    /// Status while waiting out the backoff before attempt `attempt`.
    pub fn reconnecting(&self, attempt: u32) -> Self {
        Self {
            is_connected: false,
            is_reconnecting: true,
            reconnect_attempts: attempt,
            ..self.clone()
        }
    }

    /// Status after a clean, client-initiated disconnect.
    pub fn disconnected(&self) -> Self {
        Self {
            is_connected: false,
            is_reconnecting: false,
            ..self.clone()
        }
    }

    /// Status carrying a connection-level error message. Does not change the
    /// connected/reconnecting flags; the close event drives those.
    pub fn with_error(&self, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..self.clone()
        }
    }

    /// Terminal status after exhausting reconnection attempts. Reportable
    /// but non-fatal; recovery requires an explicit reconnect.
    pub fn exhausted(&self, error: impl Into<String>) -> Self {
        Self {
            is_connected: false,
            is_reconnecting: false,
            error: Some(error.into()),
            ..self.clone()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn connected_and_reconnecting_are_exclusive() {
        let status = ConnectionStatus::default();
        let reconnecting = status.reconnecting(3);
        assert!(!reconnecting.is_connected);
        assert!(reconnecting.is_reconnecting);
        assert_eq!(reconnecting.reconnect_attempts, 3);

        let connected = reconnecting.connected();
        assert!(connected.is_connected);
        assert!(!connected.is_reconnecting);
    }

    #[test]
    fn connect_resets_attempts_and_error() {
        let status = ConnectionStatus::default()
            .with_error("socket error")
            .reconnecting(4);
        let connected = status.connected();
        assert_eq!(connected.reconnect_attempts, 0);
        assert!(connected.error.is_none());
        assert!(connected.last_connected.is_some());
    }

    #[test]
    fn exhausted_is_terminal_but_keeps_attempt_count() {
        let status = ConnectionStatus::default().reconnecting(5);
        let terminal = status.exhausted("gave up");
        assert!(!terminal.is_connected);
        assert!(!terminal.is_reconnecting);
        assert_eq!(terminal.reconnect_attempts, 5);
        assert_eq!(terminal.error.as_deref(), Some("gave up"));
    }

    #[test]
    fn error_does_not_flip_connection_flags() {
        let status = ConnectionStatus::default().connected();
        let errored = status.with_error("transient");
        assert!(errored.is_connected);
        assert_eq!(errored.error.as_deref(), Some("transient"));
    }
}
