//! Client-side game state and the reducer that folds inbound messages.
//!
//! [`GameState`] is the single consolidated aggregate the UI observes: phase,
//! roster, connectivity sets, chat log, and the active voting session.
//! [`GameState::apply`] is a pure fold — it never mutates `self`, it returns
//! the next state value, which the connection loop publishes on a `watch`
//! channel. This keeps every transition observable as a whole snapshot and
//! makes the folding rules directly testable without a transport.
//!
//! Authority rules: the server is the source of truth. The only local write
//! is the optimistic `user_vote` recorded when the local player casts; a
//! later server `error` is surfaced as an event without rolling it back
//! (the next authoritative broadcast corrects the session).

use std::collections::{BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::protocol::{
    ChatPayload, GamePhase, PlayerId, PlayerStatusEntry, ServerMessage, SnapshotPlayer,
    VoteRecord, VoteResults, VotingStartedPayload, VotingStatus,
};

/// Default bound on the retained chat log.
pub const DEFAULT_CHAT_CAPACITY: usize = 100;

// ── Roster ──────────────────────────────────────────────────────────

/// One player as known to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerEntry {
    pub id: PlayerId,
    pub name: String,
    pub alive: bool,
    pub connected: bool,
    /// Revealed role, if any (dealt at start for the local player, or
    /// disclosed on elimination).
    pub role: Option<String>,
    /// Locally stamped time of the last status change seen for this player.
    pub last_seen: Option<DateTime<Utc>>,
}

// ── Phase ───────────────────────────────────────────────────────────

/// Current phase plus its timer. Replaced wholesale on `phase_changed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseState {
    pub current: GamePhase,
    pub time_remaining: u32,
    pub duration: u32,
}

// ── Chat ────────────────────────────────────────────────────────────

/// One entry of the bounded chat log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    /// Locally assigned id (the wire carries none).
    pub id: Uuid,
    pub sender_id: Option<PlayerId>,
    pub sender_name: String,
    pub message: String,
    pub channel: String,
    pub timestamp: Option<String>,
}

// ── Voting ──────────────────────────────────────────────────────────

/// One bounded round of the voting protocol, from `voting_started` to its
/// terminal `voting_results`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VotingSession {
    pub session_id: String,
    pub vote_type: String,
    pub status: VotingStatus,
    pub eligible_voters: BTreeSet<PlayerId>,
    pub valid_targets: BTreeSet<PlayerId>,
    /// Recorded votes, at most one per voter. A re-vote replaces the
    /// voter's existing record in place, preserving its position.
    pub votes: Vec<VoteRecord>,
    /// Absent while `status` is active; attaching results finishes the
    /// session for good.
    pub results: Option<VoteResults>,
    pub started_at: Option<String>,
    pub ends_at: Option<String>,
}

impl VotingSession {
    fn from_payload(payload: &VotingStartedPayload) -> Self {
        Self {
            session_id: payload.session_id.clone(),
            vote_type: payload.vote_type.clone(),
            status: VotingStatus::Active,
            eligible_voters: payload.eligible_voters.iter().cloned().collect(),
            valid_targets: payload.valid_targets.iter().cloned().collect(),
            votes: Vec::new(),
            results: None,
            started_at: payload.started_at.clone(),
            ends_at: payload.ends_at.clone(),
        }
    }

    /// Record a vote with last-write-wins semantics per voter.
    fn upsert_vote(&mut self, record: VoteRecord) {
        match self
            .votes
            .iter()
            .position(|vote| vote.voter_id == record.voter_id)
        {
            Some(index) => {
                if let Some(slot) = self.votes.get_mut(index) {
                    *slot = record;
                }
            }
            None => self.votes.push(record),
        }
    }

    /// Weighted vote tally per target.
    pub fn vote_counts(&self) -> HashMap<PlayerId, u32> {
        let mut counts: HashMap<PlayerId, u32> = HashMap::new();
        for vote in &self.votes {
            *counts.entry(vote.target_id.clone()).or_insert(0) += vote.weight;
        }
        counts
    }

    /// Target currently leading the tally, with a flag for a shared lead.
    pub fn leading_candidate(&self) -> Option<(PlayerId, u32, bool)> {
        let counts = self.vote_counts();
        let (leader, top) = counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))?;
        let tied = counts.values().filter(|count| *count == top).count() > 1;
        Some((leader.clone(), *top, tied))
    }

    /// How many eligible voters have voted, out of how many.
    pub fn progress(&self) -> (usize, usize) {
        (self.votes.len(), self.eligible_voters.len())
    }
}

// ── Game state ──────────────────────────────────────────────────────

/// The consolidated client view of one game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameState {
    pub game_id: Option<String>,
    /// The local user's player id, if known; drives vote guards and the
    /// optimistic `user_vote`.
    pub local_player: Option<PlayerId>,
    /// The game host, as reported by the last snapshot.
    pub host: Option<PlayerId>,
    pub phase: PhaseState,
    pub players: Vec<PlayerEntry>,
    pub connected: BTreeSet<PlayerId>,
    pub living: BTreeSet<PlayerId>,
    pub dead: BTreeSet<PlayerId>,
    pub chat: VecDeque<ChatEntry>,
    chat_capacity: usize,
    pub voting: Option<VotingSession>,
    /// The local user's recorded vote, set optimistically on cast and
    /// confirmed (or corrected) by the server's `vote_cast` broadcast.
    pub user_vote: Option<PlayerId>,
    /// Last application-level error text from the server.
    pub last_error: Option<String>,
}

impl GameState {
    /// Empty state for a game, created at connection-open time.
    pub fn new(game_id: Option<String>, local_player: Option<PlayerId>) -> Self {
        Self {
            game_id,
            local_player,
            host: None,
            phase: PhaseState::default(),
            players: Vec::new(),
            connected: BTreeSet::new(),
            living: BTreeSet::new(),
            dead: BTreeSet::new(),
            chat: VecDeque::new(),
            chat_capacity: DEFAULT_CHAT_CAPACITY,
            voting: None,
            user_vote: None,
            last_error: None,
        }
    }

    /// Override the chat log bound (default 100 entries).
    #[must_use]
    pub fn with_chat_capacity(mut self, capacity: usize) -> Self {
        self.chat_capacity = capacity.max(1);
        self
    }

    /// Fresh state keeping only the game/local-player identity. Used on
    /// disconnect and explicit reset.
    #[must_use]
    pub fn reset(&self) -> Self {
        Self::new(self.game_id.clone(), self.local_player.clone())
            .with_chat_capacity(self.chat_capacity)
    }

    // ── Reducer ─────────────────────────────────────────────────────

    /// Fold one inbound message into the next state.
    ///
    /// Pure with respect to `self`: callers publish the returned value.
    /// Messages referencing unknown player ids leave the state unchanged.
    #[must_use]
    pub fn apply(&self, message: &ServerMessage) -> Self {
        let mut next = self.clone();
        match message {
            ServerMessage::SystemMessage(payload) => {
                if let Some(players) = &payload.players {
                    next.replace_roster(players, payload.connected_players.as_deref());
                }
                if let Some(connected) = &payload.connected_players {
                    next.set_connected_ids(connected);
                }
                if let Some(living) = &payload.living_players {
                    next.set_living_ids(living);
                }
                if let Some(dead) = &payload.dead_players {
                    next.set_dead_ids(dead);
                }
                if let Some(phase) = payload.phase {
                    next.phase.current = phase;
                }
                if let Some(remaining) = payload.time_remaining {
                    next.phase.time_remaining = remaining;
                }
                if let Some(duration) = payload.duration {
                    next.phase.duration = duration;
                }
                if payload.host_id.is_some() {
                    next.host = payload.host_id.clone();
                }
            }
            ServerMessage::UserStatusChanged(payload) => {
                next.patch_connectivity(&payload.user_id, payload.new_status.implies_connected());
            }
            ServerMessage::PlayerConnected(payload) => {
                next.patch_connectivity(&payload.user_id, true);
            }
            ServerMessage::PlayerDisconnected(payload) => {
                next.patch_connectivity(&payload.user_id, false);
            }
            ServerMessage::PhaseChanged(payload) => {
                // Wholesale replacement; no carry-over of the old timer.
                next.phase = PhaseState {
                    current: payload.current,
                    time_remaining: payload.time_remaining,
                    duration: payload.duration,
                };
            }
            ServerMessage::VotingStarted(payload) => {
                next.voting = Some(VotingSession::from_payload(payload));
                next.user_vote = None;
            }
            ServerMessage::VoteCast(record) => {
                let is_local_vote = next.local_player.as_ref() == Some(&record.voter_id);
                if let Some(session) = next.voting.as_mut() {
                    if session.status == VotingStatus::Active {
                        if is_local_vote {
                            next.user_vote = Some(record.target_id.clone());
                        }
                        session.upsert_vote(record.clone());
                    }
                }
            }
            ServerMessage::VotingResults(payload) => {
                if let Some(session) = next.voting.as_mut() {
                    session.results = Some(payload.results.clone());
                    session.status = VotingStatus::Finished;
                }
            }
            ServerMessage::PlayerEliminated(payload) => {
                next.eliminate(&payload.player_id, payload.role.clone());
            }
            ServerMessage::ChatMessage(payload) => {
                next.push_chat(payload);
            }
            ServerMessage::GameStarted(payload) => {
                if !payload.players.is_empty() {
                    next.start_roster(&payload.players);
                }
            }
            ServerMessage::Error(payload) => {
                next.last_error = Some(payload.message.clone());
            }
            ServerMessage::GameConnectionState(payload) => {
                next.patch_status_entries(&payload.players_status);
            }
            ServerMessage::PlayersStatusUpdate(entries) => {
                next.patch_status_entries(entries);
            }
            // Liveness and acknowledgments carry no game state.
            ServerMessage::Heartbeat(_) | ServerMessage::Success(_) => {}
        }
        next
    }

    // ── Folding helpers ─────────────────────────────────────────────

    fn replace_roster(&mut self, players: &[SnapshotPlayer], connected_ids: Option<&[PlayerId]>) {
        self.players = players
            .iter()
            .map(|player| {
                let connected = match player.status {
                    Some(status) => status.implies_connected(),
                    None => connected_ids.is_some_and(|ids| ids.contains(&player.id)),
                };
                PlayerEntry {
                    id: player.id.clone(),
                    name: player.name.clone(),
                    alive: player.alive.unwrap_or(true),
                    connected,
                    role: player.role.clone(),
                    last_seen: None,
                }
            })
            .collect();
        self.rebuild_sets();
    }

    /// Roster at game start: everyone alive, prior connectivity retained.
    fn start_roster(&mut self, players: &[SnapshotPlayer]) {
        let previously_connected = self.connected.clone();
        self.players = players
            .iter()
            .map(|player| PlayerEntry {
                id: player.id.clone(),
                name: player.name.clone(),
                alive: true,
                connected: player
                    .status
                    .map_or_else(|| previously_connected.contains(&player.id), |status| {
                        status.implies_connected()
                    }),
                role: player.role.clone(),
                last_seen: None,
            })
            .collect();
        self.rebuild_sets();
    }

    /// Patch one roster entry's connected flag. Unknown ids are ignored —
    /// the roster is only ever grown by snapshots.
    fn patch_connectivity(&mut self, player_id: &PlayerId, connected: bool) {
        let Some(entry) = self
            .players
            .iter_mut()
            .find(|player| &player.id == player_id)
        else {
            return;
        };
        entry.connected = connected;
        entry.last_seen = Some(Utc::now());
        if connected {
            self.connected.insert(player_id.clone());
        } else {
            self.connected.remove(player_id);
        }
    }

    fn patch_status_entries(&mut self, entries: &[PlayerStatusEntry]) {
        for entry in entries {
            let connected = entry
                .status
                .map_or(entry.is_connected, |status| status.implies_connected());
            self.patch_connectivity(&entry.player_id, connected);
        }
    }

    fn eliminate(&mut self, player_id: &PlayerId, role: Option<String>) {
        let Some(entry) = self
            .players
            .iter_mut()
            .find(|player| &player.id == player_id)
        else {
            return;
        };
        entry.alive = false;
        if role.is_some() {
            entry.role = role;
        }
        self.living.remove(player_id);
        self.dead.insert(player_id.clone());
    }

    fn push_chat(&mut self, payload: &ChatPayload) {
        self.chat.push_back(ChatEntry {
            id: Uuid::new_v4(),
            sender_id: payload.sender_id.clone(),
            sender_name: payload
                .sender_name
                .clone()
                .unwrap_or_else(|| "unknown".to_owned()),
            message: payload.message.clone(),
            channel: payload.channel.clone(),
            timestamp: payload.timestamp.clone(),
        });
        while self.chat.len() > self.chat_capacity {
            self.chat.pop_front();
        }
    }

    fn set_connected_ids(&mut self, ids: &[PlayerId]) {
        for player in &mut self.players {
            player.connected = ids.contains(&player.id);
        }
        self.connected = self
            .players
            .iter()
            .filter(|player| player.connected)
            .map(|player| player.id.clone())
            .collect();
    }

    fn set_living_ids(&mut self, ids: &[PlayerId]) {
        for player in &mut self.players {
            player.alive = ids.contains(&player.id);
        }
        self.living = ids.iter().cloned().collect();
    }

    fn set_dead_ids(&mut self, ids: &[PlayerId]) {
        for player in &mut self.players {
            if ids.contains(&player.id) {
                player.alive = false;
            }
        }
        self.dead = ids.iter().cloned().collect();
    }

    fn rebuild_sets(&mut self) {
        self.connected = self
            .players
            .iter()
            .filter(|player| player.connected)
            .map(|player| player.id.clone())
            .collect();
        self.living = self
            .players
            .iter()
            .filter(|player| player.alive)
            .map(|player| player.id.clone())
            .collect();
        self.dead = self
            .players
            .iter()
            .filter(|player| !player.alive)
            .map(|player| player.id.clone())
            .collect();
    }

    // ── Derived views ───────────────────────────────────────────────

    /// Count of roster entries whose status implies connectivity.
    pub fn connected_players_count(&self) -> usize {
        self.players.iter().filter(|player| player.connected).count()
    }

    /// Whether a voting session exists and is still accepting votes.
    pub fn is_voting_active(&self) -> bool {
        self.voting
            .as_ref()
            .is_some_and(|session| session.status == VotingStatus::Active)
    }

    pub fn has_user_voted(&self) -> bool {
        self.user_vote.is_some()
    }

    /// Whether the local player is in the living set.
    pub fn is_local_alive(&self) -> bool {
        self.local_player
            .as_ref()
            .is_some_and(|id| self.living.contains(id))
    }

    /// Whether the local player hosts the game.
    pub fn is_local_host(&self) -> bool {
        match (&self.local_player, &self.host) {
            (Some(local), Some(host)) => local == host,
            _ => false,
        }
    }

    pub fn player(&self, player_id: &PlayerId) -> Option<&PlayerEntry> {
        self.players.iter().find(|player| &player.id == player_id)
    }

    /// Display name for a player id, falling back to the id itself.
    pub fn player_name(&self, player_id: &PlayerId) -> String {
        self.player(player_id)
            .map_or_else(|| player_id.clone(), |player| player.name.clone())
    }

    // ── Local eligibility guards ────────────────────────────────────

    /// Check the local preconditions for casting a vote. These are
    /// client-side conveniences only — the server still validates.
    pub fn check_vote_eligibility(
        &self,
        target: &PlayerId,
    ) -> std::result::Result<(), String> {
        let Some(local) = &self.local_player else {
            return Err("local player is unknown".to_owned());
        };
        if !self.is_local_alive() {
            return Err("only living players may vote".to_owned());
        }
        if !self.phase.current.accepts_votes() {
            return Err(format!(
                "votes are not accepted during the {:?} phase",
                self.phase.current
            ));
        }
        if let Some(session) = &self.voting {
            if session.status == VotingStatus::Finished {
                return Err("the voting session has ended".to_owned());
            }
            if !session.eligible_voters.is_empty() && !session.eligible_voters.contains(local) {
                return Err("you are not eligible to vote in this session".to_owned());
            }
            if !session.valid_targets.is_empty() && !session.valid_targets.contains(target) {
                return Err(format!("{} is not a valid vote target", target));
            }
        }
        Ok(())
    }

    /// Check the local precondition for forcing the next phase.
    pub fn check_force_next_phase(&self) -> std::result::Result<(), String> {
        if self.is_local_host() {
            Ok(())
        } else {
            Err("only the host may force the next phase".to_owned())
        }
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new(None, None)
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
    use crate::protocol::{
        EliminationPayload, ErrorPayload, PhaseChangePayload, PlayerConnectionPayload,
        StatusChangePayload, SystemMessagePayload, UserStatus, VotingResultsPayload,
    };

    fn snapshot_player(id: &str, name: &str, status: UserStatus, alive: bool) -> SnapshotPlayer {
        SnapshotPlayer {
            id: id.to_owned(),
            name: name.to_owned(),
            status: Some(status),
            alive: Some(alive),
            role: None,
        }
    }

    /// Snapshot with 4 players, 2 of them connected.
    fn four_player_snapshot() -> ServerMessage {
        ServerMessage::SystemMessage(SystemMessagePayload {
            players: Some(vec![
                snapshot_player("p1", "Alice", UserStatus::Connected, true),
                snapshot_player("p2", "Bob", UserStatus::InGame, true),
                snapshot_player("p3", "Cleo", UserStatus::Disconnected, true),
                snapshot_player("p4", "Dan", UserStatus::Disconnected, true),
            ]),
            host_id: Some("p1".to_owned()),
            ..Default::default()
        })
    }

    fn connected(id: &str) -> ServerMessage {
        ServerMessage::PlayerConnected(PlayerConnectionPayload {
            user_id: id.to_owned(),
        })
    }

    fn disconnected(id: &str) -> ServerMessage {
        ServerMessage::PlayerDisconnected(PlayerConnectionPayload {
            user_id: id.to_owned(),
        })
    }

    fn phase(current: GamePhase) -> ServerMessage {
        ServerMessage::PhaseChanged(PhaseChangePayload {
            current,
            previous: None,
            time_remaining: 60,
            duration: 90,
        })
    }

    fn voting_started(session_id: &str, voters: &[&str], targets: &[&str]) -> ServerMessage {
        ServerMessage::VotingStarted(VotingStartedPayload {
            session_id: session_id.to_owned(),
            vote_type: "day_vote".to_owned(),
            eligible_voters: voters.iter().map(|s| (*s).to_owned()).collect(),
            valid_targets: targets.iter().map(|s| (*s).to_owned()).collect(),
            started_at: None,
            ends_at: None,
        })
    }

    fn vote(voter: &str, target: &str) -> ServerMessage {
        ServerMessage::VoteCast(VoteRecord {
            voter_id: voter.to_owned(),
            target_id: target.to_owned(),
            weight: 1,
            timestamp: None,
        })
    }

    fn base_state() -> GameState {
        GameState::new(Some("g1".to_owned()), Some("p1".to_owned()))
            .apply(&four_player_snapshot())
    }

    #[test]
    fn snapshot_replaces_roster_and_derives_sets() {
        let state = base_state();
        assert_eq!(state.players.len(), 4);
        assert_eq!(state.connected_players_count(), 2);
        assert_eq!(state.living.len(), 4);
        assert!(state.dead.is_empty());
        assert_eq!(state.host.as_deref(), Some("p1"));
        assert!(state.is_local_host());
    }

    #[test]
    fn connect_disconnect_events_track_the_count() {
        // 4 players, 2 connected; one disconnected player connects ->
        // count becomes 3.
        let state = base_state();
        let state = state.apply(&connected("p3"));
        assert_eq!(state.connected_players_count(), 3);

        let state = state.apply(&disconnected("p2"));
        assert_eq!(state.connected_players_count(), 2);
        assert!(state.player(&"p2".to_owned()).unwrap().last_seen.is_some());
    }

    #[test]
    fn unknown_player_ids_are_ignored() {
        let state = base_state();
        let next = state.apply(&connected("ghost"));
        assert_eq!(next.connected_players_count(), 2);
        assert!(next.player(&"ghost".to_owned()).is_none());

        let next = next.apply(&ServerMessage::PlayerEliminated(EliminationPayload {
            player_id: "ghost".to_owned(),
            player_name: None,
            role: None,
            elimination_type: None,
        }));
        assert_eq!(next.living.len(), 4);
        assert!(next.dead.is_empty());
    }

    #[test]
    fn status_change_patches_one_entry() {
        let state = base_state();
        let next = state.apply(&ServerMessage::UserStatusChanged(StatusChangePayload {
            user_id: "p4".to_owned(),
            new_status: UserStatus::InGame,
            old_status: Some(UserStatus::Disconnected),
            message: None,
        }));
        assert!(next.player(&"p4".to_owned()).unwrap().connected);
        assert_eq!(next.connected_players_count(), 3);
    }

    #[test]
    fn phase_change_replaces_timer_wholesale() {
        let state = base_state().apply(&phase(GamePhase::Day));
        assert_eq!(state.phase.current, GamePhase::Day);
        assert_eq!(state.phase.time_remaining, 60);

        let state = state.apply(&ServerMessage::PhaseChanged(PhaseChangePayload {
            current: GamePhase::Night,
            previous: Some(GamePhase::Day),
            time_remaining: 0,
            duration: 0,
        }));
        assert_eq!(state.phase.current, GamePhase::Night);
        // No carry-over from the previous timer.
        assert_eq!(state.phase.time_remaining, 0);
        assert_eq!(state.phase.duration, 0);
    }

    #[test]
    fn voting_is_active_only_after_voting_started() {
        // The phase turning to "voting" alone does not activate voting.
        let state = base_state().apply(&phase(GamePhase::Voting));
        assert!(!state.is_voting_active());

        let state = state.apply(&voting_started("s1", &["p1", "p2"], &["p3", "p4"]));
        assert!(state.is_voting_active());
    }

    #[test]
    fn voting_started_clears_prior_vote_and_replaces_session() {
        let state = base_state()
            .apply(&phase(GamePhase::Voting))
            .apply(&voting_started("s1", &["p1", "p2"], &[]))
            .apply(&vote("p1", "p3"));
        assert_eq!(state.user_vote.as_deref(), Some("p3"));
        assert_eq!(state.voting.as_ref().unwrap().votes.len(), 1);

        let state = state.apply(&voting_started("s2", &["p1", "p2"], &[]));
        let session = state.voting.as_ref().unwrap();
        assert_eq!(session.session_id, "s2");
        // Old votes never leak into the new session.
        assert!(session.votes.is_empty());
        assert!(state.user_vote.is_none());
        assert!(!state.has_user_voted());
    }

    #[test]
    fn revote_is_last_write_wins_per_voter() {
        let state = base_state()
            .apply(&phase(GamePhase::Voting))
            .apply(&voting_started("s1", &["p1", "p2"], &[]))
            .apply(&vote("p1", "p3"))
            .apply(&vote("p2", "p3"))
            .apply(&vote("p1", "p4"));

        let session = state.voting.as_ref().unwrap();
        assert_eq!(session.votes.len(), 2);
        // p1's record was replaced in place, keeping its original position.
        assert_eq!(session.votes[0].voter_id, "p1");
        assert_eq!(session.votes[0].target_id, "p4");
        assert_eq!(state.user_vote.as_deref(), Some("p4"));

        let counts = session.vote_counts();
        assert_eq!(counts.get("p3"), Some(&1));
        assert_eq!(counts.get("p4"), Some(&1));
    }

    #[test]
    fn results_finish_the_session_without_clearing_it() {
        let state = base_state()
            .apply(&phase(GamePhase::Voting))
            .apply(&voting_started("s1", &["p1", "p2"], &[]))
            .apply(&vote("p1", "p3"))
            .apply(&ServerMessage::VotingResults(VotingResultsPayload {
                results: VoteResults {
                    winner: Some("p3".to_owned()),
                    tie: false,
                    vote_counts: HashMap::from([("p3".to_owned(), 1)]),
                },
            }));

        let session = state.voting.as_ref().unwrap();
        assert_eq!(session.status, VotingStatus::Finished);
        assert_eq!(
            session.results.as_ref().unwrap().winner.as_deref(),
            Some("p3")
        );
        assert!(!state.is_voting_active());

        // Votes arriving after the results are ignored — the session is
        // terminal.
        let after = state.apply(&vote("p2", "p4"));
        assert_eq!(after.voting.as_ref().unwrap().votes.len(), 1);
    }

    #[test]
    fn elimination_moves_living_to_dead_and_reveals_role() {
        let state = base_state().apply(&ServerMessage::PlayerEliminated(EliminationPayload {
            player_id: "p2".to_owned(),
            player_name: Some("Bob".to_owned()),
            role: Some("werewolf".to_owned()),
            elimination_type: Some("lynch".to_owned()),
        }));

        let bob = state.player(&"p2".to_owned()).unwrap();
        assert!(!bob.alive);
        assert_eq!(bob.role.as_deref(), Some("werewolf"));
        assert!(!state.living.contains("p2"));
        assert!(state.dead.contains("p2"));
    }

    #[test]
    fn error_sets_text_without_touching_game_fields() {
        let state = base_state();
        let next = state.apply(&ServerMessage::Error(ErrorPayload {
            message: "invalid vote target".to_owned(),
            error_code: Some("INVALID_TARGET".to_owned()),
            details: None,
        }));
        assert_eq!(next.last_error.as_deref(), Some("invalid vote target"));
        assert_eq!(next.players, state.players);
        assert_eq!(next.phase, state.phase);
    }

    #[test]
    fn chat_log_is_bounded_most_recent_retained() {
        let mut state = base_state().with_chat_capacity(3);
        for i in 0..5 {
            state = state.apply(&ServerMessage::ChatMessage(ChatPayload {
                message: format!("msg {i}"),
                sender_id: Some("p1".to_owned()),
                sender_name: Some("Alice".to_owned()),
                channel: "all".to_owned(),
                timestamp: None,
            }));
        }
        assert_eq!(state.chat.len(), 3);
        assert_eq!(state.chat.front().unwrap().message, "msg 2");
        assert_eq!(state.chat.back().unwrap().message, "msg 4");
    }

    #[test]
    fn vote_guard_rejects_outside_voting_phase() {
        // Casting during "day" is rejected locally, before any send.
        let state = base_state().apply(&phase(GamePhase::Day));
        let rejection = state.check_vote_eligibility(&"p2".to_owned());
        assert!(rejection.is_err());
    }

    #[test]
    fn vote_guard_rejects_dead_and_ineligible_voters() {
        let state = base_state()
            .apply(&phase(GamePhase::Voting))
            .apply(&voting_started("s1", &["p2"], &["p3"]));
        // p1 (local) is alive but not among the eligible voters.
        assert!(state.check_vote_eligibility(&"p3".to_owned()).is_err());

        let dead_local = base_state()
            .apply(&ServerMessage::PlayerEliminated(EliminationPayload {
                player_id: "p1".to_owned(),
                player_name: None,
                role: None,
                elimination_type: None,
            }))
            .apply(&phase(GamePhase::Voting));
        assert!(dead_local.check_vote_eligibility(&"p3".to_owned()).is_err());
    }

    #[test]
    fn vote_guard_accepts_valid_vote_and_checks_targets() {
        let state = base_state()
            .apply(&phase(GamePhase::Voting))
            .apply(&voting_started("s1", &["p1", "p2"], &["p3", "p4"]));
        assert!(state.check_vote_eligibility(&"p3".to_owned()).is_ok());
        assert!(state.check_vote_eligibility(&"p2".to_owned()).is_err());
    }

    #[test]
    fn force_next_phase_is_host_only() {
        let host = base_state();
        assert!(host.check_force_next_phase().is_ok());

        let guest = GameState::new(Some("g1".to_owned()), Some("p2".to_owned()))
            .apply(&four_player_snapshot());
        assert!(guest.check_force_next_phase().is_err());
    }

    #[test]
    fn leading_candidate_reports_ties() {
        let state = base_state()
            .apply(&phase(GamePhase::Voting))
            .apply(&voting_started("s1", &["p1", "p2", "p3"], &[]))
            .apply(&vote("p1", "p3"))
            .apply(&vote("p2", "p4"));
        let (_, votes, tied) = state.voting.as_ref().unwrap().leading_candidate().unwrap();
        assert_eq!(votes, 1);
        assert!(tied);

        let state = state.apply(&vote("p3", "p4"));
        let (leader, votes, tied) = state.voting.as_ref().unwrap().leading_candidate().unwrap();
        assert_eq!(leader, "p4");
        assert_eq!(votes, 2);
        assert!(!tied);
    }

    #[test]
    fn reset_keeps_identity_only() {
        let state = base_state().apply(&phase(GamePhase::Night));
        let reset = state.reset();
        assert_eq!(reset.game_id.as_deref(), Some("g1"));
        assert_eq!(reset.local_player.as_deref(), Some("p1"));
        assert!(reset.players.is_empty());
        assert_eq!(reset.phase.current, GamePhase::Waiting);
    }

    #[test]
    fn game_started_marks_everyone_alive_and_keeps_connectivity() {
        let state = base_state().apply(&ServerMessage::GameStarted(
            crate::protocol::GameStartedPayload {
                players: vec![
                    SnapshotPlayer {
                        id: "p1".to_owned(),
                        name: "Alice".to_owned(),
                        status: None,
                        alive: None,
                        role: None,
                    },
                    SnapshotPlayer {
                        id: "p3".to_owned(),
                        name: "Cleo".to_owned(),
                        status: None,
                        alive: None,
                        role: None,
                    },
                ],
                started_at: None,
            },
        ));
        assert_eq!(state.players.len(), 2);
        assert!(state.players.iter().all(|p| p.alive));
        // p1 was connected before the start, p3 was not.
        assert!(state.player(&"p1".to_owned()).unwrap().connected);
        assert!(!state.player(&"p3".to_owned()).unwrap().connected);
    }
}
