use std::future::Future;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::announce::Persisted;
use super::typing::TypingTracker;
use crate::engine::events::ClientEvent;

/// The socket went away before an event could be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("connection closed")]
pub struct Disconnected;

#[derive(Debug, Error)]
pub enum DualWriteError<E> {
    /// The REST call failed; nothing was announced.
    #[error("persist failed: {0}")]
    Persist(E),

    /// The change is stored but could not be announced. Other sessions see it
    /// only after their next refetch.
    #[error("stored but not announced: {0}")]
    Disconnected(Disconnected),
}

/// One browser session's view of a study group room.
///
/// `outbound` is the queue feeding the socket; the transport owns reconnects,
/// after which a fresh session re-joins and the caller refetches.
pub struct ClientSession {
    group_id: String,
    outbound: mpsc::Sender<ClientEvent>,
    typing: TypingTracker,
}

impl ClientSession {
    /// Join the group's room.
    pub async fn open(
        group_id: impl Into<String>,
        outbound: mpsc::Sender<ClientEvent>,
    ) -> Result<Self, Disconnected> {
        let group_id = group_id.into();
        outbound
            .send(ClientEvent::JoinGroup(group_id.clone()))
            .await
            .map_err(|_| Disconnected)?;

        let typing = TypingTracker::spawn(group_id.clone(), outbound.clone());
        Ok(Self {
            group_id,
            outbound,
            typing,
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Local keystroke in the message box.
    pub fn keystroke(&self) {
        self.typing.keystroke();
    }

    /// Store a change through `persist`, then announce the stored result.
    ///
    /// Nothing is announced unless `persist` succeeds. Submitting a message
    /// also ends the typing indicator.
    pub async fn commit<F, E>(&self, persist: F) -> Result<Persisted, DualWriteError<E>>
    where
        F: Future<Output = Result<Persisted, E>>,
    {
        let persisted = persist.await.map_err(DualWriteError::Persist)?;

        let event = persisted.clone().announce(&self.group_id);
        let kind = event.name();
        if self.outbound.send(event).await.is_err() {
            warn!(group_id = %self.group_id, event = kind, "change stored but not announced");
            return Err(DualWriteError::Disconnected(Disconnected));
        }
        debug!(group_id = %self.group_id, event = kind, "announced stored change");

        if matches!(persisted, Persisted::Message(_)) {
            self.typing.stop();
        }
        Ok(persisted)
    }

    /// Leave the room: end the typing indicator first, then `leave-group`.
    pub async fn close(self) -> Result<(), Disconnected> {
        let Self {
            group_id,
            outbound,
            typing,
        } = self;

        typing.shutdown().await;
        outbound
            .send(ClientEvent::LeaveGroup(group_id))
            .await
            .map_err(|_| Disconnected)
    }
}
