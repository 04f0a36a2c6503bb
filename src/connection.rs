//! Background connection loop: transport lifecycle, heartbeat, reconnection.
//!
//! The loop owns the transport and everything derived from it. Inbound frames
//! flow through a fixed pipeline: parse the [`Envelope`], answer server
//! heartbeats, decode the typed [`ServerMessage`], fold it into the
//! [`GameState`] (publishing the new value on the state `watch` channel),
//! emit the matching [`GameEvent`], and finally fan the raw envelope out to
//! dispatcher subscribers.
//!
//! Connection policy:
//! - a lost connection is retried with linear backoff
//!   (`attempt * base_delay`), up to `max_reconnect_attempts` times
//! - exhaustion is terminal but recoverable: the loop parks until an explicit
//!   [`Command::Reconnect`] arrives (which resets the attempt counter)
//! - messages sent while disconnected are queued and flushed, oldest first,
//!   exactly once per successful connect
//! - every successful connect first requests a fresh game snapshot

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, warn};

use crate::dispatcher::MessageDispatcher;
use crate::error::Result;
use crate::event::{DisconnectReason, GameEvent};
use crate::protocol::{ClientMessage, Envelope, ServerMessage};
use crate::state::GameState;
use crate::status::ConnectionStatus;
use crate::transport::{Connector, Transport};

/// Default interval between client heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default base delay for linear reconnection backoff.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(3);

/// Default cap on consecutive reconnection attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Timing and retry knobs handed to the connection loop.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionSettings {
    pub heartbeat_interval: Duration,
    pub reconnect_base_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Commands from the client handle to the connection loop.
#[derive(Debug)]
pub(crate) enum Command {
    /// Queue a message for the server. Sent immediately when connected,
    /// otherwise held until the next successful connect.
    Send(ClientMessage),
    /// Restart the connection cycle, clearing a terminal exhausted state.
    Reconnect,
}

/// Why one connected session ended.
enum SessionEnd {
    /// Shutdown signal or client handle dropped; the loop must exit.
    Stop,
    /// The transport dropped; the loop should try to reconnect.
    Lost(String),
}

/// Serialize an outbound message and stamp the envelope timestamp.
fn encode_outbound(message: &ClientMessage) -> Result<String> {
    let mut value = serde_json::to_value(message)?;
    if let Value::Object(map) = &mut value {
        map.insert(
            "timestamp".to_owned(),
            Value::String(Utc::now().to_rfc3339()),
        );
    }
    Ok(value.to_string())
}

/// Publish a status transition on the watch channel.
fn publish_status(
    status_tx: &watch::Sender<ConnectionStatus>,
    transition: impl FnOnce(&ConnectionStatus) -> ConnectionStatus,
) {
    let next = transition(&status_tx.borrow());
    let _ = status_tx.send(next);
}

/// Emit an event to the event channel. Non-critical events are dropped with a
/// warning when the consumer falls behind; connection-down events wait for
/// capacity so they are never lost.
async fn emit_event(event_tx: &mpsc::Sender<GameEvent>, event: GameEvent) {
    if event.must_deliver() {
        if event_tx.send(event).await.is_err() {
            debug!("event channel closed, receiver dropped");
        }
        return;
    }
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Everything the connection loop reads from and publishes to.
pub(crate) struct ConnectionShared {
    pub cmd_rx: mpsc::UnboundedReceiver<Command>,
    pub event_tx: mpsc::Sender<GameEvent>,
    pub status_tx: watch::Sender<ConnectionStatus>,
    pub state_tx: watch::Sender<GameState>,
    pub dispatcher: MessageDispatcher,
    pub shutdown_rx: oneshot::Receiver<()>,
}

/// Run the connection loop until shutdown.
///
/// Structure: an outer cycle per connection attempt, an inner `select!` loop
/// per live session. The outer cycle owns the backoff policy; the inner loop
/// multiplexes commands, inbound frames, the heartbeat timer, and shutdown.
pub(crate) async fn connection_loop<C: Connector>(
    mut connector: C,
    settings: ConnectionSettings,
    mut shared: ConnectionShared,
) {
    debug!("connection loop started");

    let mut outbox: VecDeque<ClientMessage> = VecDeque::new();
    let mut attempt: u32 = 0;

    'cycle: loop {
        let mut transport = match connector.connect().await {
            Ok(transport) => transport,
            Err(e) => {
                error!("connection attempt failed: {e}");
                publish_status(&shared.status_tx, |s| s.with_error(e.to_string()));
                match schedule_reconnect(&settings, &mut shared, &mut outbox, &mut attempt).await {
                    BackoffOutcome::Retry => continue 'cycle,
                    BackoffOutcome::Stop => break 'cycle,
                }
            }
        };

        attempt = 0;
        publish_status(&shared.status_tx, ConnectionStatus::connected);
        emit_event(&shared.event_tx, GameEvent::Connected).await;

        // Ask for a fresh snapshot before anything queued goes out, so the
        // reducer starts from authoritative state.
        let mut backlog = std::mem::take(&mut outbox);
        backlog.push_front(ClientMessage::GetGameStatus);
        let mut flush_failed = None;
        while let Some(message) = backlog.pop_front() {
            if let Err(e) = send_message(&mut transport, &message).await {
                // Put it back; the rest of the backlog survives for the next
                // connect. The snapshot request is re-issued on every connect
                // and must not accumulate across failed flushes.
                if message != ClientMessage::GetGameStatus {
                    backlog.push_front(message);
                }
                flush_failed = Some(e.to_string());
                break;
            }
        }
        outbox = backlog;
        if let Some(reason) = flush_failed {
            handle_session_loss(&mut shared, &reason).await;
            match schedule_reconnect(&settings, &mut shared, &mut outbox, &mut attempt).await {
                BackoffOutcome::Retry => continue 'cycle,
                BackoffOutcome::Stop => break 'cycle,
            }
        }

        match run_session(&mut transport, &settings, &mut shared, &mut outbox).await {
            SessionEnd::Stop => {
                let _ = transport.close().await;
                publish_status(&shared.status_tx, ConnectionStatus::disconnected);
                publish_reset(&shared.state_tx);
                emit_event(
                    &shared.event_tx,
                    GameEvent::Disconnected {
                        reason: DisconnectReason::ClientRequested,
                    },
                )
                .await;
                break 'cycle;
            }
            SessionEnd::Lost(reason) => {
                handle_session_loss(&mut shared, &reason).await;
                match schedule_reconnect(&settings, &mut shared, &mut outbox, &mut attempt).await {
                    BackoffOutcome::Retry => continue 'cycle,
                    BackoffOutcome::Stop => break 'cycle,
                }
            }
        }
    }

    debug!("connection loop exited");
}

/// One live session: multiplex commands, frames, heartbeat, shutdown.
async fn run_session(
    transport: &mut impl Transport,
    settings: &ConnectionSettings,
    shared: &mut ConnectionShared,
    outbox: &mut VecDeque<ClientMessage>,
) -> SessionEnd {
    let interval = settings.heartbeat_interval.max(Duration::from_millis(1));
    let mut heartbeat = tokio::time::interval(interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of a tokio interval fires immediately; skip it so the
    // first heartbeat goes out one full interval after connecting.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            // Branch 1: command from the client handle
            cmd = shared.cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(message)) => {
                        if let Err(e) = send_message(transport, &message).await {
                            outbox.push_front(message);
                            return SessionEnd::Lost(format!("transport send error: {e}"));
                        }
                    }
                    // Already connected; nothing to restart.
                    Some(Command::Reconnect) => {}
                    // Command channel closed — client handle dropped.
                    None => {
                        debug!("command channel closed, stopping connection loop");
                        return SessionEnd::Stop;
                    }
                }
            }

            // Branch 2: shutdown signal
            _ = &mut shared.shutdown_rx => {
                debug!("shutdown signal received");
                return SessionEnd::Stop;
            }

            // Branch 3: heartbeat timer
            _ = heartbeat.tick() => {
                if let Err(e) = send_message(transport, &ClientMessage::Heartbeat).await {
                    return SessionEnd::Lost(format!("heartbeat send error: {e}"));
                }
            }

            // Branch 4: inbound frame from the server
            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        if let Err(e) = handle_frame(&text, transport, shared).await {
                            return SessionEnd::Lost(e);
                        }
                    }
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        return SessionEnd::Lost(format!("transport receive error: {e}"));
                    }
                    None => {
                        debug!("transport closed by server");
                        return SessionEnd::Lost("connection closed by server".to_owned());
                    }
                }
            }
        }
    }
}

/// Process one inbound frame through the full pipeline.
///
/// Malformed frames and malformed known payloads are logged and dropped; the
/// session only ends on a transport-level failure (the heartbeat reply).
async fn handle_frame(
    text: &str,
    transport: &mut impl Transport,
    shared: &mut ConnectionShared,
) -> std::result::Result<(), String> {
    let envelope = match Envelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("dropping malformed frame: {e} — raw: {text}");
            return Ok(());
        }
    };

    match ServerMessage::from_envelope(&envelope) {
        Ok(Some(message)) => {
            // A server liveness ping must be answered; the server's pong
            // acknowledgment must not be, or the two sides ping-pong forever.
            if let ServerMessage::Heartbeat(payload) = &message {
                if !payload.is_pong() {
                    if let Err(e) = send_message(transport, &ClientMessage::Heartbeat).await {
                        return Err(format!("heartbeat reply failed: {e}"));
                    }
                }
            }

            let next = shared.state_tx.borrow().apply(&message);
            let _ = shared.state_tx.send(next);

            if let Some(event) = GameEvent::from_server_message(message) {
                emit_event(&shared.event_tx, event).await;
            }
        }
        Ok(None) => {
            debug!(kind = %envelope.kind, "unknown envelope type, dispatch only");
        }
        Err(e) => {
            warn!(kind = %envelope.kind, "malformed payload: {e}");
        }
    }

    shared.dispatcher.dispatch(&envelope);
    Ok(())
}

async fn send_message(transport: &mut impl Transport, message: &ClientMessage) -> Result<()> {
    let frame = encode_outbound(message)?;
    debug!("sending client message: {:?}", std::mem::discriminant(message));
    transport.send(frame).await
}

/// Publish the disconnect status/state transitions for a lost session and
/// deliver the Disconnected event.
async fn handle_session_loss(shared: &mut ConnectionShared, reason: &str) {
    publish_status(&shared.status_tx, |s| s.disconnected().with_error(reason));
    publish_reset(&shared.state_tx);
    emit_event(
        &shared.event_tx,
        GameEvent::Disconnected {
            reason: DisconnectReason::ConnectionLost(reason.to_owned()),
        },
    )
    .await;
}

fn publish_reset(state_tx: &watch::Sender<GameState>) {
    let next = state_tx.borrow().reset();
    let _ = state_tx.send(next);
}

enum BackoffOutcome {
    Retry,
    Stop,
}

/// Wait out the backoff before the next attempt, or park on exhaustion.
///
/// Commands arriving during the wait are handled: sends are queued, an
/// explicit reconnect skips the remaining delay (and clears exhaustion).
async fn schedule_reconnect(
    settings: &ConnectionSettings,
    shared: &mut ConnectionShared,
    outbox: &mut VecDeque<ClientMessage>,
    attempt: &mut u32,
) -> BackoffOutcome {
    *attempt += 1;

    if *attempt > settings.max_reconnect_attempts {
        warn!(
            attempts = settings.max_reconnect_attempts,
            "reconnection attempts exhausted"
        );
        publish_status(&shared.status_tx, |s| {
            s.exhausted(format!(
                "reconnection attempts exhausted after {} tries",
                settings.max_reconnect_attempts
            ))
        });
        emit_event(
            &shared.event_tx,
            GameEvent::ReconnectFailed {
                attempts: settings.max_reconnect_attempts,
            },
        )
        .await;

        // Park until the client explicitly restarts the cycle.
        loop {
            tokio::select! {
                cmd = shared.cmd_rx.recv() => match cmd {
                    Some(Command::Reconnect) => {
                        *attempt = 0;
                        return BackoffOutcome::Retry;
                    }
                    Some(Command::Send(message)) => outbox.push_back(message),
                    None => return BackoffOutcome::Stop,
                },
                _ = &mut shared.shutdown_rx => return BackoffOutcome::Stop,
            }
        }
    }

    publish_status(&shared.status_tx, |s| s.reconnecting(*attempt));
    emit_event(
        &shared.event_tx,
        GameEvent::Reconnecting {
            attempt: *attempt,
            max_attempts: settings.max_reconnect_attempts,
        },
    )
    .await;

    // Linear backoff.
    let delay = settings.reconnect_base_delay * *attempt;
    debug!(attempt = *attempt, ?delay, "waiting before reconnect");
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            () = &mut sleep => return BackoffOutcome::Retry,
            cmd = shared.cmd_rx.recv() => match cmd {
                Some(Command::Send(message)) => outbox.push_back(message),
                // Skip the remaining delay.
                Some(Command::Reconnect) => return BackoffOutcome::Retry,
                None => return BackoffOutcome::Stop,
            },
            _ = &mut shared.shutdown_rx => return BackoffOutcome::Stop,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn outbound_frames_carry_type_and_timestamp() {
        let frame = encode_outbound(&ClientMessage::Heartbeat).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "heartbeat");
        assert!(value["timestamp"].is_string());

        let frame = encode_outbound(&ClientMessage::CastVote {
            target_player_id: "p3".to_owned(),
        })
        .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "cast_vote");
        assert_eq!(value["data"]["target_player_id"], "p3");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn settings_defaults_match_protocol_contract() {
        let settings = ConnectionSettings::default();
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(settings.reconnect_base_delay, Duration::from_secs(3));
        assert_eq!(settings.max_reconnect_attempts, 5);
    }
}
