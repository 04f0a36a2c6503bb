//! Events delivered to the consumer over the client's event channel.
//!
//! The connection loop emits a [`GameEvent`] for every lifecycle transition
//! and every recognized inbound message, after the state reducer has folded
//! the message. Events are delivered on a bounded channel; when the consumer
//! falls behind, game events are dropped with a warning, but
//! [`GameEvent::Disconnected`] and [`GameEvent::ReconnectFailed`] are always
//! delivered, waiting for channel capacity if necessary.

use crate::protocol::{
    ChatPayload, EliminationPayload, ErrorPayload, GameStartedPayload, PhaseChangePayload,
    PlayerConnectionPayload, PlayerStatusEntry, ServerMessage, StatusChangePayload,
    SuccessPayload, SystemMessagePayload, VoteRecord, VotingResultsPayload,
    VotingStartedPayload,
};

/// Event emitted by the client's connection loop.
#[derive(Debug, Clone)]
pub enum GameEvent {
    /// The transport opened and the session is live. Fired on the initial
    /// connect and after every successful reconnect.
    Connected,
    /// The transport closed. `reason` distinguishes a clean client-initiated
    /// close from an unexpected drop.
    Disconnected {
        reason: DisconnectReason,
    },
    /// A reconnection attempt is scheduled; the backoff delay before it is
    /// `attempt * base_delay`.
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
    },
    /// All reconnection attempts failed. The client stays down until
    /// [`reconnect`](crate::GameClient::reconnect) is called.
    ReconnectFailed {
        attempts: u32,
    },

    /// Game snapshot or announcement from the server.
    SystemMessage(SystemMessagePayload),
    /// A player's presence status changed.
    UserStatusChanged(StatusChangePayload),
    PlayerConnected(PlayerConnectionPayload),
    PlayerDisconnected(PlayerConnectionPayload),
    PhaseChanged(PhaseChangePayload),
    VotingStarted(VotingStartedPayload),
    VoteCast(VoteRecord),
    VotingResults(VotingResultsPayload),
    PlayerEliminated(EliminationPayload),
    Chat(ChatPayload),
    GameStarted(GameStartedPayload),
    /// Application-level error reported by the server.
    ServerError(ErrorPayload),
    /// Acknowledgment of a client action.
    ActionConfirmed(SuccessPayload),
    /// Per-player connectivity snapshot (polling transports emit these).
    PlayersStatusUpdate(Vec<PlayerStatusEntry>),
}

/// Why the transport closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client asked for the close; no reconnection follows.
    ClientRequested,
    /// The server closed the connection or the transport failed.
    ConnectionLost(String),
}

impl GameEvent {
    /// Map an inbound message to its consumer-facing event, if it has one.
    /// Heartbeats are transport liveness and produce no event.
    pub(crate) fn from_server_message(message: ServerMessage) -> Option<Self> {
        match message {
            ServerMessage::SystemMessage(p) => Some(Self::SystemMessage(p)),
            ServerMessage::UserStatusChanged(p) => Some(Self::UserStatusChanged(p)),
            ServerMessage::PlayerConnected(p) => Some(Self::PlayerConnected(p)),
            ServerMessage::PlayerDisconnected(p) => Some(Self::PlayerDisconnected(p)),
            ServerMessage::PhaseChanged(p) => Some(Self::PhaseChanged(p)),
            ServerMessage::VotingStarted(p) => Some(Self::VotingStarted(p)),
            ServerMessage::VoteCast(p) => Some(Self::VoteCast(p)),
            ServerMessage::VotingResults(p) => Some(Self::VotingResults(p)),
            ServerMessage::PlayerEliminated(p) => Some(Self::PlayerEliminated(p)),
            ServerMessage::ChatMessage(p) => Some(Self::Chat(p)),
            ServerMessage::GameStarted(p) => Some(Self::GameStarted(p)),
            ServerMessage::Error(p) => Some(Self::ServerError(p)),
            ServerMessage::Success(p) => Some(Self::ActionConfirmed(p)),
            ServerMessage::GameConnectionState(p) => {
                Some(Self::PlayersStatusUpdate(p.players_status))
            }
            ServerMessage::PlayersStatusUpdate(p) => Some(Self::PlayersStatusUpdate(p)),
            ServerMessage::Heartbeat(_) => None,
        }
    }

    /// Events that must reach the consumer even when the event channel is
    /// full: connection-down notifications.
    pub(crate) fn must_deliver(&self) -> bool {
        matches!(
            self,
            Self::Disconnected { .. } | Self::ReconnectFailed { .. }
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::protocol::HeartbeatPayload;

    #[test]
    fn heartbeats_produce_no_event() {
        let event = GameEvent::from_server_message(ServerMessage::Heartbeat(HeartbeatPayload {
            response: Some("pong".to_owned()),
        }));
        assert!(event.is_none());
    }

    #[test]
    fn disconnect_events_are_must_deliver() {
        assert!(GameEvent::Disconnected {
            reason: DisconnectReason::ClientRequested
        }
        .must_deliver());
        assert!(GameEvent::ReconnectFailed { attempts: 5 }.must_deliver());
        assert!(!GameEvent::Connected.must_deliver());
    }
}
