//! Transport abstraction for the Nocturne realtime protocol.
//!
//! The [`Transport`] trait defines a bidirectional text message channel
//! between the client and the game server. The protocol uses JSON text
//! envelopes, so every transport implementation must handle message framing
//! internally (e.g., WebSocket frames, long-polling request batches).
//!
//! Because the client reconnects automatically, it cannot be handed a single
//! pre-connected transport: it needs a way to mint a fresh one for every
//! attempt. That is the [`Connector`] trait. Connection parameters (URL,
//! token, game id) live inside the connector, not the trait.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use nocturne_client::error::NocturneError;
//! use nocturne_client::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), NocturneError> {
//!         // Send the JSON text envelope over your transport
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, NocturneError>> {
//!         // Receive the next JSON text envelope
//!         // Return None when the connection is closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), NocturneError> {
//!         // Gracefully shut down the connection
//!         todo!()
//!     }
//! }
//!
//! struct MyConnector { /* url, credentials, ... */ }
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     type Transport = MyTransport;
//!
//!     async fn connect(&mut self) -> Result<Self::Transport, NocturneError> {
//!         // Open a fresh connection
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::NocturneError;

/// A bidirectional text message transport for the Nocturne realtime protocol.
///
/// Implementors shuttle serialized JSON envelopes between the client and the
/// server. Each call to [`send`](Transport::send) transmits one complete JSON
/// message; each call to [`recv`](Transport::recv) returns one.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is
/// polled inside `tokio::select!` alongside the heartbeat timer and the
/// command channel. If `recv` is cancelled before completion, calling it
/// again must not lose data. Channel-based implementations (e.g., wrapping
/// `mpsc::Receiver`) are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text envelope to the server.
    ///
    /// # Errors
    ///
    /// Returns [`NocturneError::TransportSend`] if the message could not be
    /// sent (e.g., connection broken, write buffer full).
    async fn send(&mut self, message: String) -> Result<(), NocturneError>;

    /// Receive the next JSON text envelope from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete message was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly by the server
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait documentation](Transport)).
    async fn recv(&mut self) -> Option<Result<String, NocturneError>>;

    /// Close the transport connection gracefully.
    ///
    /// After calling this method, subsequent calls to [`send`](Transport::send)
    /// and [`recv`](Transport::recv) may return errors or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), NocturneError>;
}

/// A factory for fresh [`Transport`] connections.
///
/// The connection loop calls [`connect`](Connector::connect) once at startup
/// and again for every reconnection attempt. Implementations own their
/// connection parameters and may refresh credentials between attempts.
#[async_trait]
pub trait Connector: Send + 'static {
    /// The transport type this connector produces.
    type Transport: Transport;

    /// Open a new connection to the server.
    ///
    /// # Errors
    ///
    /// Returns a transport-level error when the connection cannot be
    /// established. The connection loop treats this as a failed attempt and
    /// schedules the next one per its backoff policy.
    async fn connect(&mut self) -> Result<Self::Transport, NocturneError>;
}
