//! Transport implementations for the Nocturne realtime protocol.
//!
//! This module provides concrete [`Transport`](crate::Transport)
//! implementations behind feature gates. Enable the corresponding Cargo
//! feature to pull in a transport:
//!
//! | Feature                | Transport              |
//! |------------------------|------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] |
//! | `polling-client`       | [`PollingTransport`]   |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), nocturne_client::NocturneError> {
//! use nocturne_client::{Transport, WebSocketTransport};
//!
//! let mut ws = WebSocketTransport::connect("ws://localhost:8000/ws/game-42").await?;
//! ws.send(r#"{"type":"heartbeat"}"#.to_string()).await?;
//!
//! if let Some(Ok(msg)) = ws.recv().await {
//!     println!("server said: {msg}");
//! }
//!
//! ws.close().await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "polling-client")]
pub mod polling;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketTransport, WsConnector};

#[cfg(feature = "polling-client")]
pub use polling::{PollingTransport, SnapshotSource};
