use serde_json::Value;

use crate::engine::events::ClientEvent;

/// A body returned by a successful REST mutation, ready to announce.
#[derive(Debug, Clone, PartialEq)]
pub enum Persisted {
    /// The stored chat message.
    Message(Value),
    TaskCreated(Value),
    TaskUpdated(Value),
    TaskDeleted(String),
    /// The group's member list after the add.
    MembersAdded(Value),
    MemberRemoved(String),
}

impl Persisted {
    /// The socket event announcing this change to the group.
    pub fn announce(self, group_id: &str) -> ClientEvent {
        let group_id = group_id.to_string();
        match self {
            Self::Message(message) => ClientEvent::SendMessage { group_id, message },
            Self::TaskCreated(task) => ClientEvent::TaskCreated { group_id, task },
            Self::TaskUpdated(task) => ClientEvent::TaskUpdated { group_id, task },
            Self::TaskDeleted(task_id) => ClientEvent::TaskDeleted { group_id, task_id },
            Self::MembersAdded(members) => ClientEvent::MemberAdded { group_id, members },
            Self::MemberRemoved(member_id) => ClientEvent::MemberRemoved {
                group_id,
                member_id,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::ServerEvent;
    use crate::engine::fanout::{Dispatch, FanOut, route};
    use crate::engine::user_session::UserSession;
    use serde_json::json;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[test]
    fn test_announce_event_names() {
        let cases = [
            (Persisted::Message(json!({})), "send-message"),
            (Persisted::TaskCreated(json!({})), "task-created"),
            (Persisted::TaskUpdated(json!({})), "task-updated"),
            (Persisted::TaskDeleted("T1".into()), "task-deleted"),
            (Persisted::MembersAdded(json!([])), "member-added"),
            (Persisted::MemberRemoved("U1".into()), "member-removed"),
        ];
        for (persisted, name) in cases {
            let event = persisted.announce("G7");
            assert_eq!(event.name(), name);
            assert_eq!(event.group_id(), "G7");
        }
    }

    #[test]
    fn test_announced_body_reaches_receivers_verbatim() {
        let (tx, _rx) = mpsc::channel(1);
        let sender = UserSession::new(Uuid::new_v4(), "U1".into(), "alice".into(), tx);
        let task = json!({"_id": "T1", "title": "Problem set 4", "status": "pending"});

        let Dispatch::Relay(relay) = route(Persisted::TaskCreated(task.clone()).announce("G7"), &sender)
        else {
            panic!("task-created should relay");
        };
        assert_eq!(relay.outbound, ServerEvent::TaskAdded(task));
        assert_eq!(relay.scope, FanOut::ExceptSender);
    }

    #[test]
    fn test_announce_wire_format() {
        let event = Persisted::TaskDeleted("T3".into()).announce("G1");
        assert_eq!(
            serde_json::to_value(event).unwrap(),
            json!({"event": "task-deleted", "data": {"groupId": "G1", "taskId": "T3"}})
        );
    }
}
