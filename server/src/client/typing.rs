//! "Who is typing" presence.
//!
//! The sending side is a small actor that owns the idle timer: a keystroke
//! emits `typing-start` and pushes the deadline out; the deadline passing,
//! an explicit stop, or teardown emits `typing-stop`. The receiving side is a
//! plain set keyed by user id. The relay keeps no presence state, so a lost
//! `typing-stop` leaves a stale entry until the next one arrives.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::engine::events::{ClientEvent, ServerEvent};

/// Quiet period after the last keystroke before `typing-stop` is sent.
pub const TYPING_IDLE: Duration = Duration::from_millis(2000);

enum Command {
    Keystroke,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypingState {
    Idle,
    Typing { deadline: Instant },
}

/// Handle to the typing actor for one room. Dropping it tears the actor down,
/// which sends `typing-stop` first if the user was typing.
pub struct TypingTracker {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl TypingTracker {
    pub fn spawn(group_id: String, outbound: mpsc::Sender<ClientEvent>) -> Self {
        Self::with_idle(group_id, outbound, TYPING_IDLE)
    }

    pub fn with_idle(group_id: String, outbound: mpsc::Sender<ClientEvent>, idle: Duration) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(group_id, idle, rx, outbound));
        Self { commands, task }
    }

    /// Local keystroke: announce typing and restart the idle timer.
    pub fn keystroke(&self) {
        if self.commands.send(Command::Keystroke).is_err() {
            debug!("keystroke dropped: typing tracker has stopped");
        }
    }

    /// Force the idle state now, e.g. when the message is submitted.
    pub fn stop(&self) {
        if self.commands.send(Command::Stop).is_err() {
            debug!("typing stop dropped: typing tracker has stopped");
        }
    }

    /// Tear down: send `typing-stop` if needed, then wait for the timer to be released.
    pub async fn shutdown(self) {
        let Self { commands, task } = self;
        drop(commands);
        let _ = task.await;
    }
}

async fn run(
    group_id: String,
    idle: Duration,
    mut commands: mpsc::UnboundedReceiver<Command>,
    outbound: mpsc::Sender<ClientEvent>,
) {
    let mut state = TypingState::Idle;

    loop {
        let deadline = match state {
            TypingState::Typing { deadline } => Some(deadline),
            TypingState::Idle => None,
        };

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Keystroke) => {
                    emit(&outbound, ClientEvent::TypingStart { group_id: group_id.clone() }).await;
                    state = TypingState::Typing { deadline: Instant::now() + idle };
                }
                Some(Command::Stop) => {
                    if state != TypingState::Idle {
                        emit(&outbound, ClientEvent::TypingStop { group_id: group_id.clone() }).await;
                        state = TypingState::Idle;
                    }
                }
                None => {
                    if state != TypingState::Idle {
                        emit(&outbound, ClientEvent::TypingStop { group_id: group_id.clone() }).await;
                    }
                    break;
                }
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                emit(&outbound, ClientEvent::TypingStop { group_id: group_id.clone() }).await;
                state = TypingState::Idle;
            }
        }
    }
}

async fn emit(outbound: &mpsc::Sender<ClientEvent>, event: ClientEvent) {
    if outbound.send(event).await.is_err() {
        debug!("typing event dropped: connection closed");
    }
}

/// A remote user shown as typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUser {
    pub user_id: String,
    pub username: String,
}

/// Receiving-side typing set for one room.
#[derive(Debug, Clone)]
pub struct TypingSet {
    self_id: String,
    users: Vec<TypingUser>,
}

impl TypingSet {
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            users: Vec::new(),
        }
    }

    /// Apply a presence event. Returns true if the set changed.
    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::UserTyping { user_id, username } => {
                if *user_id == self.self_id || self.users.iter().any(|u| u.user_id == *user_id) {
                    return false;
                }
                self.users.push(TypingUser {
                    user_id: user_id.clone(),
                    username: username.clone(),
                });
                true
            }
            ServerEvent::UserStoppedTyping { user_id } => {
                let before = self.users.len();
                self.users.retain(|u| u.user_id != *user_id);
                self.users.len() != before
            }
            _ => false,
        }
    }

    pub fn users(&self) -> &[TypingUser] {
        &self.users
    }

    /// Indicator text, e.g. "alice is typing..." or "alice, bob are typing...".
    pub fn summary(&self) -> Option<String> {
        match self.users.as_slice() {
            [] => None,
            [only] => Some(format!("{} is typing...", only.username)),
            many => {
                let names: Vec<&str> = many.iter().map(|u| u.username.as_str()).collect();
                Some(format!("{} are typing...", names.join(", ")))
            }
        }
    }
}
