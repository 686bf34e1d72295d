//! The fixed relay table: for each inbound event, the outbound event it becomes,
//! who in the room receives it, and whether the group must exist first.

use super::events::{ClientEvent, ServerEvent};
use super::user_session::UserSession;

/// Which occupants of a room receive a relayed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    /// Every occupant, the sender included if it occupies the room.
    All,
    /// Every occupant except the sender.
    ExceptSender,
}

/// Directory check performed before fanning out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupCheck {
    /// Relay without touching the directory.
    Skip,
    /// Drop the event with only a log line if the group is missing or the lookup fails.
    DropIfMissing,
    /// Tell the sender if the group is missing; `failure` is sent when the lookup errors.
    ReportIfMissing { failure: &'static str },
}

/// A fully resolved relay of one inbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct Relay {
    pub group_id: String,
    pub outbound: ServerEvent,
    pub scope: FanOut,
    pub check: GroupCheck,
}

/// What the hub must do with an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Join(String),
    Leave(String),
    Relay(Relay),
}

impl Dispatch {
    /// Join and leave. These must take effect in the order the client sent them.
    pub fn changes_membership(&self) -> bool {
        matches!(self, Self::Join(_) | Self::Leave(_))
    }

    /// True when handling reads the directory and may therefore suspend.
    pub fn reads_directory(&self) -> bool {
        match self {
            Self::Join(_) => true,
            Self::Leave(_) => false,
            Self::Relay(relay) => relay.check != GroupCheck::Skip,
        }
    }
}

/// Resolve an inbound event from `sender` against the relay table.
pub fn route(event: ClientEvent, sender: &UserSession) -> Dispatch {
    let (group_id, outbound, scope, check) = match event {
        ClientEvent::JoinGroup(group_id) => return Dispatch::Join(group_id),
        ClientEvent::LeaveGroup(group_id) => return Dispatch::Leave(group_id),
        ClientEvent::SendMessage { group_id, message } => (
            group_id,
            ServerEvent::ReceiveMessage(message),
            FanOut::All,
            GroupCheck::ReportIfMissing {
                failure: "Error sending message",
            },
        ),
        ClientEvent::TaskCreated { group_id, task } => (
            group_id,
            ServerEvent::TaskAdded(task),
            FanOut::ExceptSender,
            GroupCheck::DropIfMissing,
        ),
        ClientEvent::TaskUpdated { group_id, task } => (
            group_id,
            ServerEvent::TaskModified(task),
            FanOut::All,
            GroupCheck::DropIfMissing,
        ),
        ClientEvent::TaskDeleted { group_id, task_id } => (
            group_id,
            ServerEvent::TaskRemoved(task_id),
            FanOut::All,
            GroupCheck::DropIfMissing,
        ),
        ClientEvent::MemberAdded { group_id, members } => (
            group_id,
            ServerEvent::MemberJoined(members),
            FanOut::ExceptSender,
            GroupCheck::Skip,
        ),
        ClientEvent::MemberRemoved {
            group_id,
            member_id,
        } => (
            group_id,
            ServerEvent::MemberLeft(member_id),
            FanOut::ExceptSender,
            GroupCheck::Skip,
        ),
        ClientEvent::TypingStart { group_id } => (
            group_id,
            ServerEvent::UserTyping {
                user_id: sender.user_id.clone(),
                username: sender.display_name.clone(),
            },
            FanOut::ExceptSender,
            GroupCheck::Skip,
        ),
        ClientEvent::TypingStop { group_id } => (
            group_id,
            ServerEvent::UserStoppedTyping {
                user_id: sender.user_id.clone(),
            },
            FanOut::ExceptSender,
            GroupCheck::Skip,
        ),
    };

    Dispatch::Relay(Relay {
        group_id,
        outbound,
        scope,
        check,
    })
}
