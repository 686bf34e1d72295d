use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for a connected session (one per connection, not per user).
pub type SessionId = Uuid;

/// Events a browser session sends to the relay.
///
/// On the wire every frame is `{"event": "<name>", "data": <payload>}`. Message,
/// task and member payloads are the bodies returned by the REST layer and are
/// relayed untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    /// Subscribe to a study group's room.
    JoinGroup(String),

    /// Unsubscribe from a study group's room.
    LeaveGroup(String),

    /// A chat message that was already stored.
    SendMessage { group_id: String, message: Value },

    /// A task that was already created.
    TaskCreated { group_id: String, task: Value },

    /// A task that was already updated.
    TaskUpdated { group_id: String, task: Value },

    /// A task that was already deleted.
    TaskDeleted { group_id: String, task_id: String },

    /// The group's member list after an add.
    MemberAdded { group_id: String, members: Value },

    /// A member that was removed from the group.
    MemberRemoved { group_id: String, member_id: String },

    /// The sender started typing.
    TypingStart { group_id: String },

    /// The sender stopped typing.
    TypingStop { group_id: String },
}

impl ClientEvent {
    /// The study group this event targets.
    pub fn group_id(&self) -> &str {
        match self {
            Self::JoinGroup(group_id) | Self::LeaveGroup(group_id) => group_id,
            Self::SendMessage { group_id, .. }
            | Self::TaskCreated { group_id, .. }
            | Self::TaskUpdated { group_id, .. }
            | Self::TaskDeleted { group_id, .. }
            | Self::MemberAdded { group_id, .. }
            | Self::MemberRemoved { group_id, .. }
            | Self::TypingStart { group_id }
            | Self::TypingStop { group_id } => group_id,
        }
    }

    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinGroup(_) => "join-group",
            Self::LeaveGroup(_) => "leave-group",
            Self::SendMessage { .. } => "send-message",
            Self::TaskCreated { .. } => "task-created",
            Self::TaskUpdated { .. } => "task-updated",
            Self::TaskDeleted { .. } => "task-deleted",
            Self::MemberAdded { .. } => "member-added",
            Self::MemberRemoved { .. } => "member-removed",
            Self::TypingStart { .. } => "typing-start",
            Self::TypingStop { .. } => "typing-stop",
        }
    }
}

/// Events the relay delivers to sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Acknowledgment of a successful `join-group`, sent to the joiner only.
    JoinedGroup { group_id: String },

    /// Another user entered the room.
    UserJoined { user_id: String, username: String },

    /// Another user explicitly left the room.
    UserLeft { user_id: String, username: String },

    ReceiveMessage(Value),

    TaskAdded(Value),

    TaskModified(Value),

    TaskRemoved(String),

    /// Full member list after an add.
    MemberJoined(Value),

    MemberLeft(String),

    UserTyping { user_id: String, username: String },

    UserStoppedTyping { user_id: String },

    /// Failure scoped to the session that caused it.
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinedGroup { .. } => "joined-group",
            Self::UserJoined { .. } => "user-joined",
            Self::UserLeft { .. } => "user-left",
            Self::ReceiveMessage(_) => "receive-message",
            Self::TaskAdded(_) => "task-added",
            Self::TaskModified(_) => "task-modified",
            Self::TaskRemoved(_) => "task-removed",
            Self::MemberJoined(_) => "member-joined",
            Self::MemberLeft(_) => "member-left",
            Self::UserTyping { .. } => "user-typing",
            Self::UserStoppedTyping { .. } => "user-stopped-typing",
            Self::Error { .. } => "error",
        }
    }
}
