use std::fmt;

use thiserror::Error;
use uuid::Uuid;
use waka_model::ExecStatus;

/// Opaque identity of one live client link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Why the server is closing a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The run finished; the status is the last thing the client sees.
    Completed(ExecStatus),
    /// The client broke the protocol.
    Rejected(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection is closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("send queue is full")]
    Overflow,
}

/// Transport-neutral handle to a client link.
///
/// The registries only ever talk to this trait, never to a concrete socket.
/// Implementations must not block and must not call back into the registries.
pub trait Connection: Send + Sync + 'static {
    fn id(&self) -> ConnectionId;

    /// `false` once the link is closed or known to be gone.
    fn is_open(&self) -> bool;

    /// Queue one text message for delivery.
    fn send_text(&self, text: &str) -> Result<(), DeliveryError>;

    /// Close the link, carrying `reason` to the peer. Idempotent.
    fn close(&self, reason: CloseReason) -> Result<(), DeliveryError>;
}
