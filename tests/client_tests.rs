//! Integration-style client tests for the Nocturne client.
//!
//! Uses the scripted `MockConnector` from `tests/common` to drive full game
//! flows through `GameClient`: snapshot folding, voting rounds, heartbeat
//! contract, reconnection policy, and event delivery.

mod common;

use std::time::Duration;

use nocturne_client::{
    ClientConfig, DisconnectReason, GameClient, GameEvent, GamePhase, NocturneError, UserStatus,
};
use serde_json::Value;

use common::{
    chat_json, eliminated_json, error_json, heartbeat_ping_json, heartbeat_pong_json,
    phase_changed_json, player_connected_json, player_disconnected_json, snapshot_json,
    vote_cast_json, voting_results_json, voting_started_json, MockConnector,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn test_config() -> ClientConfig {
    ClientConfig::new("game-42")
        .with_local_player("p1")
        .with_reconnect_base_delay(Duration::from_millis(10))
        .with_shutdown_timeout(Duration::from_millis(200))
}

/// Consume events up to and including the first `Connected`.
async fn drain_until_connected(rx: &mut tokio::sync::mpsc::Receiver<GameEvent>) {
    loop {
        let ev = rx.recv().await.expect("expected Connected event");
        if matches!(ev, GameEvent::Connected) {
            return;
        }
    }
}

fn frame_type(frame: &str) -> String {
    let value: Value = serde_json::from_str(frame).expect("sent frame is JSON");
    value["type"].as_str().expect("frame has type").to_owned()
}

// ════════════════════════════════════════════════════════════════════
// Full voting round
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn full_voting_round_folds_into_state() {
    let connector = MockConnector::single(vec![
        Some(Ok(snapshot_json("day"))),
        Some(Ok(phase_changed_json("voting", 60))),
        Some(Ok(voting_started_json("s1", &["p1", "p2"], &["p3", "p4"]))),
        Some(Ok(vote_cast_json("p2", "p3"))),
        Some(Ok(vote_cast_json("p1", "p3"))),
        Some(Ok(voting_results_json("p3"))),
        Some(Ok(eliminated_json("p3", "villager"))),
    ]);
    let (mut client, mut events) = GameClient::start(connector, test_config());

    drain_until_connected(&mut events).await;

    // Walk the scripted round via events.
    let mut saw_results = false;
    let mut saw_elimination = false;
    while let Some(event) = events.recv().await {
        match event {
            GameEvent::VotingResults(payload) => {
                assert_eq!(payload.results.winner.as_deref(), Some("p3"));
                saw_results = true;
            }
            GameEvent::PlayerEliminated(payload) => {
                assert_eq!(payload.player_id, "p3");
                saw_elimination = true;
                break;
            }
            _ => {}
        }
    }
    assert!(saw_results);
    assert!(saw_elimination);

    let state = client.state();
    let state = state.borrow();
    assert_eq!(state.phase.current, GamePhase::Voting);
    assert!(!state.is_voting_active(), "results finish the session");
    assert_eq!(state.user_vote.as_deref(), Some("p3"));
    assert!(state.dead.contains("p3"));
    assert!(!state.living.contains("p3"));
    let p3 = state.player(&"p3".to_owned()).expect("p3 in roster");
    assert_eq!(p3.role.as_deref(), Some("villager"));
    drop(state);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Connectivity tracking
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn connect_disconnect_events_update_the_roster() {
    let connector = MockConnector::single(vec![
        Some(Ok(snapshot_json("waiting"))),
        Some(Ok(player_connected_json("p3"))),
        Some(Ok(player_disconnected_json("p2"))),
    ]);
    let (mut client, mut events) = GameClient::start(connector, test_config());

    drain_until_connected(&mut events).await;
    loop {
        if let Some(GameEvent::PlayerDisconnected(payload)) = events.recv().await {
            assert_eq!(payload.user_id, "p2");
            break;
        }
    }

    let state = client.state();
    // Snapshot had p1+p2 connected; p3 joined and p2 left.
    assert_eq!(state.borrow().connected_players_count(), 2);
    assert!(state.borrow().connected.contains("p3"));
    assert!(!state.borrow().connected.contains("p2"));

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Chat and errors
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn chat_log_is_bounded_and_errors_are_surfaced() {
    let mut incoming = vec![Some(Ok(snapshot_json("night")))];
    for i in 0..5 {
        incoming.push(Some(Ok(chat_json("p2", &format!("msg {i}")))));
    }
    incoming.push(Some(Ok(error_json("vote rejected", "INVALID_TARGET"))));

    let connector = MockConnector::single(incoming);
    let config = test_config().with_chat_log_capacity(3);
    let (mut client, mut events) = GameClient::start(connector, config);

    drain_until_connected(&mut events).await;
    loop {
        if let Some(GameEvent::ServerError(payload)) = events.recv().await {
            assert_eq!(payload.message, "vote rejected");
            assert_eq!(payload.error_code.as_deref(), Some("INVALID_TARGET"));
            break;
        }
    }

    let state = client.state();
    let state = state.borrow();
    assert_eq!(state.chat.len(), 3);
    assert_eq!(state.chat.back().expect("chat entry").message, "msg 4");
    assert_eq!(state.last_error.as_deref(), Some("vote rejected"));
    drop(state);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Heartbeat contract
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn heartbeat_ping_is_answered_and_pong_is_not() {
    let connector = MockConnector::single(vec![
        Some(Ok(heartbeat_ping_json())),
        Some(Ok(heartbeat_pong_json())),
    ]);
    let sent = std::sync::Arc::clone(&connector.sent);
    let (mut client, mut events) = GameClient::start(connector, test_config());

    drain_until_connected(&mut events).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    {
        let messages = sent.lock().expect("sent log");
        let heartbeats = messages
            .iter()
            .filter(|m| frame_type(m) == "heartbeat")
            .count();
        // Exactly one: the reply to the ping. The pong acknowledgment must
        // not be echoed back, or both sides ping-pong forever.
        assert_eq!(heartbeats, 1);
    }

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Reconnection policy
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn bounded_reconnection_with_attempt_reset() {
    // Session 1 drops; attempt 1 fails; attempt 2 connects and stays up.
    let connector = MockConnector::new(vec![
        Ok(vec![None]),
        Err(NocturneError::Timeout),
        Ok(vec![]),
    ]);
    let sent = std::sync::Arc::clone(&connector.sent);
    let (mut client, mut events) = GameClient::start(connector, test_config());

    drain_until_connected(&mut events).await;

    let ev = events.recv().await.expect("event");
    assert!(matches!(
        ev,
        GameEvent::Disconnected {
            reason: DisconnectReason::ConnectionLost(_)
        }
    ));

    // Messages sent while down are queued, but the call reports failure so
    // the caller knows delivery is deferred.
    let err = client.send_chat("still here?", None).expect_err("deferred");
    assert!(matches!(err, NocturneError::NotConnected));

    let ev = events.recv().await.expect("event");
    assert!(matches!(ev, GameEvent::Reconnecting { attempt: 1, .. }));
    let ev = events.recv().await.expect("event");
    assert!(matches!(ev, GameEvent::Reconnecting { attempt: 2, .. }));
    let ev = events.recv().await.expect("event");
    assert!(matches!(ev, GameEvent::Connected));

    tokio::time::sleep(Duration::from_millis(50)).await;
    {
        let messages = sent.lock().expect("sent log");
        let chats = messages
            .iter()
            .filter(|m| frame_type(m) == "chat_message")
            .count();
        assert_eq!(chats, 1, "queued chat flushed exactly once");
    }

    let status = client.status();
    assert!(status.borrow().is_connected);
    assert_eq!(
        status.borrow().reconnect_attempts,
        0,
        "successful connect resets the attempt counter"
    );

    client.shutdown().await;
}

#[tokio::test]
async fn exhaustion_requires_explicit_reconnect() {
    let connector = MockConnector::new(vec![
        Ok(vec![None]),
        Err(NocturneError::Timeout),
        Err(NocturneError::Timeout),
        Ok(vec![]),
    ]);
    let config = test_config().with_max_reconnect_attempts(2);
    let (mut client, mut events) = GameClient::start(connector, config);

    drain_until_connected(&mut events).await;
    loop {
        if let Some(GameEvent::ReconnectFailed { attempts }) = events.recv().await {
            assert_eq!(attempts, 2);
            break;
        }
    }

    {
        let status = client.status();
        let status = status.borrow();
        assert!(!status.is_connected);
        assert!(!status.is_reconnecting, "exhaustion is terminal, not retrying");
        assert_eq!(status.reconnect_attempts, 2);
        assert!(status.error.is_some());
    }

    // No spontaneous recovery.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!client.is_connected());

    client.reconnect().expect("loop still running");
    let ev = events.recv().await.expect("event");
    assert!(matches!(ev, GameEvent::Connected));

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Outbound actions
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn update_user_status_and_chat_reach_the_wire() {
    let connector = MockConnector::single(vec![]);
    let sent = std::sync::Arc::clone(&connector.sent);
    let (mut client, mut events) = GameClient::start(connector, test_config());

    drain_until_connected(&mut events).await;

    client
        .update_user_status(UserStatus::InGame, Some("game-42".to_owned()))
        .expect("queued");
    client
        .send_chat("good evening", Some("werewolves".to_owned()))
        .expect("queued");
    tokio::time::sleep(Duration::from_millis(50)).await;

    {
        let messages = sent.lock().expect("sent log");
        let status = messages
            .iter()
            .find(|m| frame_type(m) == "update_user_status")
            .expect("update_user_status frame");
        let value: Value = serde_json::from_str(status).expect("json");
        assert_eq!(value["data"]["status"], "in_game");
        assert_eq!(value["data"]["game_id"], "game-42");

        let chat = messages
            .iter()
            .find(|m| frame_type(m) == "chat_message")
            .expect("chat_message frame");
        let value: Value = serde_json::from_str(chat).expect("json");
        assert_eq!(value["data"]["channel"], "werewolves");
    }

    client.shutdown().await;
}

#[tokio::test]
async fn vote_guard_blocks_ineligible_votes_locally() {
    let connector = MockConnector::single(vec![
        Some(Ok(snapshot_json("voting"))),
        Some(Ok(voting_started_json("s1", &["p2"], &["p3"]))),
    ]);
    let sent = std::sync::Arc::clone(&connector.sent);
    let (mut client, mut events) = GameClient::start(connector, test_config());

    drain_until_connected(&mut events).await;
    loop {
        if let Some(GameEvent::VotingStarted(_)) = events.recv().await {
            break;
        }
    }

    // p1 is alive and the phase accepts votes, but p1 is not an eligible
    // voter in this session.
    let err = client.cast_vote("p3").expect_err("ineligible");
    assert!(matches!(err, NocturneError::NotEligible(_)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!sent
        .lock()
        .expect("sent log")
        .iter()
        .any(|m| frame_type(m) == "cast_vote"));

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Shutdown
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn shutdown_closes_transport_and_ends_the_event_stream() {
    let connector = MockConnector::single(vec![]);
    let closed = std::sync::Arc::clone(&connector.closed);
    let (mut client, mut events) = GameClient::start(connector, test_config());

    drain_until_connected(&mut events).await;
    client.shutdown().await;

    let ev = events.recv().await.expect("final event");
    assert!(matches!(
        ev,
        GameEvent::Disconnected {
            reason: DisconnectReason::ClientRequested
        }
    ));
    assert!(events.recv().await.is_none());
    assert!(closed.load(std::sync::atomic::Ordering::Relaxed));

    let err = client.request_game_status().expect_err("loop stopped");
    assert!(matches!(err, NocturneError::NotConnected));
}
