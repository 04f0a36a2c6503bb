//! # Nocturne Client
//!
//! Transport-agnostic Rust client for the realtime protocol of Nocturne, a
//! multiplayer social-deduction (werewolf) game.
//!
//! This crate provides a high-level async client that keeps one game session
//! synchronized with the server over any bidirectional JSON text transport:
//! it maintains the connection (heartbeat, linear-backoff reconnection with a
//! bounded attempt budget), folds every inbound message into a consolidated
//! [`GameState`] snapshot, and fans raw envelopes out to type-keyed
//! subscribers.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement [`Transport`] and [`Connector`] for
//!   any backend
//! - **WebSocket built-in** — the default `transport-websocket` feature
//!   provides [`WebSocketTransport`] and [`WsConnector`]
//! - **Polling fallback** — the `polling-client` feature provides
//!   [`PollingTransport`] for deployments where WebSocket upgrades fail
//! - **Event-driven** — typed [`GameEvent`]s via a bounded channel, plus
//!   `watch`-published [`GameState`] / [`ConnectionStatus`] snapshots
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nocturne_client::{ClientConfig, GameClient, GameEvent, WsConnector};
//!
//! let connector = WsConnector::new("wss://play.example.com", "game-42")
//!     .with_token("bearer-token");
//! let config = ClientConfig::new("game-42").with_local_player("p1");
//! let (client, mut events) = GameClient::start(connector, config);
//!
//! client.join_game()?;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         GameEvent::PhaseChanged(change) => println!("{:?}", change.current),
//!         GameEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

pub mod client;
mod connection;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod protocol;
pub mod state;
pub mod status;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use client::{ClientConfig, GameClient};
pub use dispatcher::{MessageDispatcher, Subscription, WILDCARD};
pub use error::NocturneError;
pub use event::{DisconnectReason, GameEvent};
pub use protocol::{ClientMessage, Envelope, GamePhase, ServerMessage, UserStatus};
pub use state::{GameState, VotingSession};
pub use status::ConnectionStatus;
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::websocket::{WebSocketTransport, WsConnector};

#[cfg(feature = "polling-client")]
pub use transports::polling::{PollingTransport, SnapshotSource};
