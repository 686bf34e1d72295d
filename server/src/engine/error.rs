use thiserror::Error;

use super::events::SessionId;

/// Failures of the hub itself, as opposed to room-level failures that are
/// reported to the offending session as an `error` event.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub is shutting down")]
    ShuttingDown,

    #[error("session {0} not found")]
    SessionNotFound(SessionId),
}

/// Delivery failure to a single recipient. Never aborts the rest of a fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("outbound queue is full")]
    QueueFull,

    #[error("outbound channel is closed")]
    Closed,
}
