use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::error::TransportError;
use super::events::{ServerEvent, SessionId};

/// Maximum queued outbound events per session (prevents memory exhaustion from slow clients).
pub const MAX_OUTBOUND_QUEUE: usize = 1024;

/// A connected, authenticated browser session.
///
/// The identity is fixed at handshake time and never re-verified.
#[derive(Debug)]
pub struct UserSession {
    pub id: SessionId,
    pub user_id: String,
    pub display_name: String,
    /// Send outbound events to this session's write loop.
    outbound: mpsc::Sender<ServerEvent>,
    pub connected_at: DateTime<Utc>,
}

impl UserSession {
    pub fn new(
        id: SessionId,
        user_id: String,
        display_name: String,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> Self {
        Self {
            id,
            user_id,
            display_name,
            outbound,
            connected_at: Utc::now(),
        }
    }

    /// Time since the handshake completed.
    pub fn connected_for(&self) -> Duration {
        Utc::now().signed_duration_since(self.connected_at)
    }

    /// Queue an event for this session without blocking. A slow client loses
    /// the event rather than stalling the sender.
    pub fn send(&self, event: ServerEvent) -> Result<(), TransportError> {
        self.outbound.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::QueueFull,
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}
