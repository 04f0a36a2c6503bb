//! Wire types for the Nocturne realtime game protocol.
//!
//! Every message on the wire is a JSON **envelope**: `{type, data?, timestamp?}`
//! where `type` is a non-empty string and `data` is a payload shaped by the
//! type. [`ClientMessage`] and [`ServerMessage`] are the typed views of that
//! envelope; [`Envelope`] is the loosely-typed form used at the dispatch
//! boundary (wildcard subscribers, unknown message types).
//!
//! Key adaptations from the server's Python models:
//!
//! - timestamps travel as ISO 8601 `String`s
//! - `cast_vote` is standardized on the `{target_player_id}` payload shape

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

// ── Type aliases ────────────────────────────────────────────────────

/// Unique identifier for players. The backend issues opaque string ids.
pub type PlayerId = String;

/// Unique identifier for games.
pub type GameId = String;

// ── Enums ───────────────────────────────────────────────────────────

/// Phases of a werewolf game round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Lobby: waiting for players to join.
    #[default]
    Waiting,
    /// Roles are being dealt; the first night is about to begin.
    Starting,
    Night,
    Day,
    Voting,
    Trial,
    Execution,
    Finished,
}

impl GamePhase {
    /// Returns `true` for phases in which votes may be cast.
    pub fn accepts_votes(self) -> bool {
        matches!(self, Self::Voting | Self::Trial)
    }
}

/// Per-player status as reported by the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Connected,
    Disconnected,
    InGame,
    Banned,
}

impl UserStatus {
    /// Whether this status counts as "connected" for roster aggregation.
    /// Only `connected` and `in_game` imply a live connection.
    pub fn implies_connected(self) -> bool {
        matches!(self, Self::Connected | Self::InGame)
    }
}

/// Lifecycle of a voting session as mirrored on the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VotingStatus {
    /// Votes are being accepted.
    #[default]
    Active,
    /// Results were delivered; terminal for this session.
    Finished,
}

// ── Payload structs ─────────────────────────────────────────────────

/// One roster entry embedded in a `system_message` snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPlayer {
    pub id: PlayerId,
    pub name: String,
    /// Per-player status flag; when absent, connectivity falls back to the
    /// snapshot's `connected_players` list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<UserStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alive: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Payload of a `system_message`: free text plus an optional full game
/// snapshot. Any subset of the fields may be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMessagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_key: Option<String>,
    /// When present, fully replaces the client roster.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub players: Option<Vec<SnapshotPlayer>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_players: Option<Vec<PlayerId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub living_players: Option<Vec<PlayerId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_players: Option<Vec<PlayerId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<GamePhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_id: Option<PlayerId>,
}

/// Payload of `user_status_changed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangePayload {
    pub user_id: PlayerId,
    pub new_status: UserStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_status: Option<UserStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Payload of `player_connected` / `player_disconnected`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConnectionPayload {
    pub user_id: PlayerId,
}

/// Payload of `phase_changed`. Replaces phase and timer wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseChangePayload {
    pub current: GamePhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<GamePhase>,
    #[serde(default)]
    pub time_remaining: u32,
    #[serde(default)]
    pub duration: u32,
}

/// Payload of `voting_started`: seeds a brand-new voting session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingStartedPayload {
    pub session_id: String,
    #[serde(default)]
    pub vote_type: String,
    #[serde(default)]
    pub eligible_voters: Vec<PlayerId>,
    #[serde(default)]
    pub valid_targets: Vec<PlayerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
}

fn default_vote_weight() -> u32 {
    1
}

/// One recorded vote. Also the payload of `vote_cast`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteRecord {
    pub voter_id: PlayerId,
    pub target_id: PlayerId,
    /// Vote weight (doubled for the sheriff's tie-breaker vote).
    #[serde(default = "default_vote_weight")]
    pub weight: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Tallied outcome of a voting session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<PlayerId>,
    #[serde(default)]
    pub tie: bool,
    #[serde(default)]
    pub vote_counts: HashMap<PlayerId, u32>,
}

/// Payload of `voting_results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingResultsPayload {
    pub results: VoteResults,
}

/// Payload of `player_eliminated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EliminationPayload {
    pub player_id: PlayerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    /// Role revealed on death, if the server discloses it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elimination_type: Option<String>,
}

fn default_chat_channel() -> String {
    "all".to_owned()
}

/// Payload of an inbound `chat_message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<PlayerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default = "default_chat_channel")]
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Payload of `game_started`: the final roster, everyone alive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameStartedPayload {
    #[serde(default)]
    pub players: Vec<SnapshotPlayer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}

/// Payload of `heartbeat`. The server's liveness ping carries no `response`;
/// its acknowledgment of ours carries `response: "pong"` — at the envelope
/// top level on the wire, folded into this payload during decoding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl HeartbeatPayload {
    /// Whether this heartbeat is the server acknowledging one of ours.
    /// Anything else is a server ping that must be answered with another
    /// `heartbeat` (the protocol does not use a distinct pong type).
    pub fn is_pong(&self) -> bool {
        self.response.as_deref() == Some("pong")
    }
}

/// Payload of a server `error` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Payload of a server `success` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One entry of a `players_status_update` array or of
/// `game_connection_state.players_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerStatusEntry {
    pub player_id: PlayerId,
    #[serde(default)]
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<UserStatus>,
    #[serde(default)]
    pub is_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

/// Payload of `game_connection_state`: an aggregate connectivity snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameConnectionStatePayload {
    #[serde(default)]
    pub is_user_connected: bool,
    #[serde(default)]
    pub is_user_in_game: bool,
    #[serde(default)]
    pub connected_players_count: u32,
    #[serde(default)]
    pub total_players_count: u32,
    #[serde(default)]
    pub players_status: Vec<PlayerStatusEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
}

// ── Envelope ────────────────────────────────────────────────────────

/// The loosely-typed wire unit: `{type, data?, timestamp?}`.
///
/// Invariant: `kind` is a non-empty string. [`Envelope::parse`] enforces this
/// so a validated envelope can always be dispatched by type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Heartbeat acknowledgment marker. The server puts `response: "pong"`
    /// at the envelope top level, not inside `data`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl Envelope {
    /// Build an envelope with the given type and no payload.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: None,
            timestamp: None,
            response: None,
        }
    }

    /// Parse a raw JSON frame into an envelope.
    ///
    /// # Errors
    ///
    /// Returns a [`Serialization`](crate::NocturneError::Serialization) error
    /// when the text is not JSON, is missing `type`, or carries an empty
    /// `type` string.
    pub fn parse(text: &str) -> Result<Self> {
        let envelope: Self = serde_json::from_str(text)?;
        if envelope.kind.is_empty() {
            return Err(serde_json::Error::io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "envelope type must be a non-empty string",
            ))
            .into());
        }
        Ok(envelope)
    }

    /// The value handed to message handlers: the payload if present,
    /// otherwise the whole envelope.
    pub fn handler_payload(&self) -> Value {
        match &self.data {
            Some(data) => data.clone(),
            None => serde_json::to_value(self).unwrap_or(Value::Null),
        }
    }
}

// ── Client messages ─────────────────────────────────────────────────

/// Message types sent from client to server.
///
/// Serializes to the `{type, data?}` envelope shape; the connection loop
/// stamps the `timestamp` field just before the frame is written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the game this connection is scoped to.
    JoinGame,
    /// Leave the game.
    LeaveGame,
    /// Start the game (host only; the server validates).
    StartGame,
    /// Request a full `system_message` snapshot.
    GetGameStatus,
    /// Request the current voting session state.
    GetVotingStatus,
    /// Liveness ping, and the reply to the server's liveness ping.
    Heartbeat,
    /// Update the local user's lobby status.
    UpdateUserStatus {
        status: UserStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        game_id: Option<GameId>,
    },
    /// Cast (or change) a vote against a target player.
    CastVote { target_player_id: PlayerId },
    /// Advance the game to the next phase (host only; the server validates).
    ForceNextPhase,
    /// Send a chat message on a channel (`"all"` by default).
    ChatMessage { message: String, channel: String },
}

// ── Server messages ─────────────────────────────────────────────────

/// Typed view of every inbound envelope the client understands.
///
/// Decoded from an [`Envelope`] via [`ServerMessage::from_envelope`] rather
/// than a derived tagged deserializer so that payload-less envelopes (e.g. a
/// bare `heartbeat`) decode to their payload's default instead of failing.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    SystemMessage(SystemMessagePayload),
    UserStatusChanged(StatusChangePayload),
    PlayerConnected(PlayerConnectionPayload),
    PlayerDisconnected(PlayerConnectionPayload),
    PhaseChanged(PhaseChangePayload),
    VotingStarted(VotingStartedPayload),
    VoteCast(VoteRecord),
    VotingResults(VotingResultsPayload),
    PlayerEliminated(EliminationPayload),
    ChatMessage(ChatPayload),
    GameStarted(GameStartedPayload),
    Heartbeat(HeartbeatPayload),
    Error(ErrorPayload),
    Success(SuccessPayload),
    GameConnectionState(GameConnectionStatePayload),
    PlayersStatusUpdate(Vec<PlayerStatusEntry>),
}

/// Deserialize a payload that has required fields; a missing `data` field is
/// a decode error.
fn required<T: serde::de::DeserializeOwned>(
    envelope: &Envelope,
) -> std::result::Result<T, serde_json::Error> {
    serde_json::from_value(envelope.data.clone().unwrap_or(Value::Null))
}

/// Deserialize a payload whose fields are all optional; a missing `data`
/// field yields the default payload.
fn optional<T: serde::de::DeserializeOwned + Default>(
    envelope: &Envelope,
) -> std::result::Result<T, serde_json::Error> {
    match &envelope.data {
        Some(data) => serde_json::from_value(data.clone()),
        None => Ok(T::default()),
    }
}

impl ServerMessage {
    /// Every envelope type this client gives a typed meaning to.
    pub const KNOWN_TYPES: &'static [&'static str] = &[
        "system_message",
        "user_status_changed",
        "player_connected",
        "player_disconnected",
        "phase_changed",
        "voting_started",
        "vote_cast",
        "voting_results",
        "player_eliminated",
        "chat_message",
        "game_started",
        "heartbeat",
        "error",
        "success",
        "game_connection_state",
        "players_status_update",
    ];

    /// Whether the given envelope type has a typed decoding.
    pub fn is_known_type(kind: &str) -> bool {
        Self::KNOWN_TYPES.contains(&kind)
    }

    /// Decode a validated envelope into a typed message.
    ///
    /// Returns `Ok(None)` for unknown envelope types (those are delivered to
    /// wildcard subscribers only) and an error for a known type whose payload
    /// does not match its shape.
    pub fn from_envelope(envelope: &Envelope) -> Result<Option<Self>> {
        let message = match envelope.kind.as_str() {
            "system_message" => Self::SystemMessage(optional(envelope)?),
            "user_status_changed" => Self::UserStatusChanged(required(envelope)?),
            "player_connected" => Self::PlayerConnected(required(envelope)?),
            "player_disconnected" => Self::PlayerDisconnected(required(envelope)?),
            "phase_changed" => Self::PhaseChanged(required(envelope)?),
            "voting_started" => Self::VotingStarted(required(envelope)?),
            "vote_cast" => Self::VoteCast(required(envelope)?),
            "voting_results" => Self::VotingResults(required(envelope)?),
            "player_eliminated" => Self::PlayerEliminated(required(envelope)?),
            "chat_message" => Self::ChatMessage(required(envelope)?),
            "game_started" => Self::GameStarted(optional(envelope)?),
            "heartbeat" => {
                let mut payload: HeartbeatPayload = optional(envelope)?;
                // The server's pong carries `response` at the envelope top
                // level; fold it into the payload so `is_pong` sees it.
                if payload.response.is_none() {
                    payload.response.clone_from(&envelope.response);
                }
                Self::Heartbeat(payload)
            }
            "error" => Self::Error(required(envelope)?),
            "success" => Self::Success(required(envelope)?),
            "game_connection_state" => Self::GameConnectionState(optional(envelope)?),
            "players_status_update" => Self::PlayersStatusUpdate(required(envelope)?),
            _ => return Ok(None),
        };
        Ok(Some(message))
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parse_requires_type() {
        assert!(Envelope::parse(r#"{"data":{}}"#).is_err());
        assert!(Envelope::parse(r#"{"type":""}"#).is_err());
        assert!(Envelope::parse("not json").is_err());
    }

    #[test]
    fn envelope_tolerates_extra_fields() {
        let envelope =
            Envelope::parse(r#"{"type":"heartbeat","timestamp":"2026-01-01T00:00:00Z","seq":7}"#)
                .unwrap();
        assert_eq!(envelope.kind, "heartbeat");
        assert!(envelope.data.is_none());
    }

    #[test]
    fn handler_payload_falls_back_to_whole_envelope() {
        let envelope = Envelope::parse(r#"{"type":"success"}"#).unwrap();
        let payload = envelope.handler_payload();
        assert_eq!(payload["type"], "success");

        let envelope = Envelope::parse(r#"{"type":"success","data":{"message":"ok"}}"#).unwrap();
        assert_eq!(envelope.handler_payload()["message"], "ok");
    }

    #[test]
    fn client_message_serializes_to_envelope_shape() {
        let json = serde_json::to_value(&ClientMessage::CastVote {
            target_player_id: "p2".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "cast_vote");
        assert_eq!(json["data"]["target_player_id"], "p2");

        let json = serde_json::to_value(&ClientMessage::JoinGame).unwrap();
        assert_eq!(json["type"], "join_game");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn bare_heartbeat_decodes_with_default_payload() {
        let envelope = Envelope::parse(r#"{"type":"heartbeat"}"#).unwrap();
        let message = ServerMessage::from_envelope(&envelope).unwrap().unwrap();
        match message {
            ServerMessage::Heartbeat(payload) => assert!(!payload.is_pong()),
            other => panic!("expected Heartbeat, got {other:?}"),
        }
    }

    #[test]
    fn pong_heartbeat_is_recognized() {
        let envelope =
            Envelope::parse(r#"{"type":"heartbeat","data":{"response":"pong"}}"#).unwrap();
        let message = ServerMessage::from_envelope(&envelope).unwrap().unwrap();
        match message {
            ServerMessage::Heartbeat(payload) => assert!(payload.is_pong()),
            other => panic!("expected Heartbeat, got {other:?}"),
        }
    }

    #[test]
    fn top_level_pong_is_recognized() {
        // The server's acknowledgment shape: `response` sits at the envelope
        // top level, with no `data` at all.
        let envelope = Envelope::parse(
            r#"{"type":"heartbeat","response":"pong","timestamp":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(envelope.response.as_deref(), Some("pong"));
        let message = ServerMessage::from_envelope(&envelope).unwrap().unwrap();
        match message {
            ServerMessage::Heartbeat(payload) => assert!(payload.is_pong()),
            other => panic!("expected Heartbeat, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_decodes_to_none() {
        let envelope = Envelope::parse(r#"{"type":"lunar_eclipse","data":{}}"#).unwrap();
        assert!(ServerMessage::from_envelope(&envelope).unwrap().is_none());
        assert!(!ServerMessage::is_known_type("lunar_eclipse"));
    }

    #[test]
    fn malformed_known_payload_is_an_error() {
        // vote_cast without its required fields.
        let envelope = Envelope::parse(r#"{"type":"vote_cast","data":{"weight":2}}"#).unwrap();
        assert!(ServerMessage::from_envelope(&envelope).is_err());
        // phase_changed with no data at all.
        let envelope = Envelope::parse(r#"{"type":"phase_changed"}"#).unwrap();
        assert!(ServerMessage::from_envelope(&envelope).is_err());
    }

    #[test]
    fn vote_record_defaults_weight_to_one() {
        let record: VoteRecord =
            serde_json::from_str(r#"{"voter_id":"p1","target_id":"p2"}"#).unwrap();
        assert_eq!(record.weight, 1);
    }

    #[test]
    fn user_status_connectivity_mapping() {
        assert!(UserStatus::Connected.implies_connected());
        assert!(UserStatus::InGame.implies_connected());
        assert!(!UserStatus::Active.implies_connected());
        assert!(!UserStatus::Disconnected.implies_connected());
        assert!(!UserStatus::Banned.implies_connected());
    }

    #[test]
    fn phase_names_match_the_wire() {
        let phase: GamePhase = serde_json::from_str(r#""voting""#).unwrap();
        assert_eq!(phase, GamePhase::Voting);
        assert!(phase.accepts_votes());
        assert!(!GamePhase::Day.accepts_votes());
    }

    #[test]
    fn system_message_snapshot_round_trips() {
        let envelope = Envelope::parse(
            r#"{
                "type": "system_message",
                "data": {
                    "message": "game state",
                    "players": [
                        {"id": "p1", "name": "Alice", "status": "connected", "alive": true},
                        {"id": "p2", "name": "Bob", "status": "disconnected", "alive": false}
                    ],
                    "phase": "night",
                    "host_id": "p1"
                }
            }"#,
        )
        .unwrap();
        let message = ServerMessage::from_envelope(&envelope).unwrap().unwrap();
        match message {
            ServerMessage::SystemMessage(payload) => {
                let players = payload.players.unwrap();
                assert_eq!(players.len(), 2);
                assert_eq!(players[0].status, Some(UserStatus::Connected));
                assert_eq!(payload.phase, Some(GamePhase::Night));
                assert_eq!(payload.host_id.as_deref(), Some("p1"));
            }
            other => panic!("expected SystemMessage, got {other:?}"),
        }
    }
}
