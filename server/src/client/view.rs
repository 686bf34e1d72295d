use serde_json::Value;

use super::announce::Persisted;
use super::typing::TypingSet;
use crate::engine::events::ServerEvent;

/// Identity field of tasks and members in REST bodies.
pub const ID_FIELD: &str = "_id";

fn id_of(value: &Value) -> Option<&str> {
    value.get(ID_FIELD).and_then(Value::as_str)
}

/// One session's local copy of a study group, kept current from socket events.
///
/// Tasks are replaced by id, so receiving an update the session already
/// applied itself changes nothing. Events missed while disconnected are never
/// replayed; call `resync` with a fresh fetch instead.
#[derive(Debug, Clone)]
pub struct GroupView {
    pub group_id: String,
    messages: Vec<Value>,
    tasks: Vec<Value>,
    members: Vec<Value>,
    typing: TypingSet,
}

impl GroupView {
    pub fn new(group_id: impl Into<String>, self_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            messages: Vec::new(),
            tasks: Vec::new(),
            members: Vec::new(),
            typing: TypingSet::new(self_id),
        }
    }

    /// Replace local state with an authoritative fetch.
    pub fn resync(&mut self, messages: Vec<Value>, tasks: Vec<Value>, members: Vec<Value>) {
        self.messages = messages;
        self.tasks = tasks;
        self.members = members;
    }

    pub fn messages(&self) -> &[Value] {
        &self.messages
    }

    pub fn tasks(&self) -> &[Value] {
        &self.tasks
    }

    pub fn members(&self) -> &[Value] {
        &self.members
    }

    pub fn typing(&self) -> &TypingSet {
        &self.typing
    }

    /// Apply an event relayed by the server.
    pub fn apply(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::ReceiveMessage(message) => self.messages.push(message.clone()),
            ServerEvent::TaskAdded(task) => self.tasks.push(task.clone()),
            ServerEvent::TaskModified(task) => self.replace_task(task),
            ServerEvent::TaskRemoved(task_id) => self.remove_task(task_id),
            ServerEvent::MemberJoined(members) => self.set_members(members),
            ServerEvent::MemberLeft(member_id) => self.remove_member(member_id),
            ServerEvent::UserTyping { .. } | ServerEvent::UserStoppedTyping { .. } => {
                self.typing.apply(event);
            }
            ServerEvent::JoinedGroup { .. }
            | ServerEvent::UserJoined { .. }
            | ServerEvent::UserLeft { .. }
            | ServerEvent::Error { .. } => {}
        }
    }

    /// Apply the sender's own stored change before announcing it. Messages are
    /// left to the relay echo, which includes the sender.
    pub fn apply_persisted(&mut self, persisted: &Persisted) {
        match persisted {
            Persisted::Message(_) => {}
            Persisted::TaskCreated(task) => self.tasks.push(task.clone()),
            Persisted::TaskUpdated(task) => self.replace_task(task),
            Persisted::TaskDeleted(task_id) => self.remove_task(task_id),
            Persisted::MembersAdded(members) => self.set_members(members),
            Persisted::MemberRemoved(member_id) => self.remove_member(member_id),
        }
    }

    fn replace_task(&mut self, updated: &Value) {
        let Some(updated_id) = id_of(updated) else {
            return;
        };
        for task in &mut self.tasks {
            if id_of(task) == Some(updated_id) {
                *task = updated.clone();
            }
        }
    }

    fn remove_task(&mut self, task_id: &str) {
        self.tasks.retain(|task| id_of(task) != Some(task_id));
    }

    fn set_members(&mut self, members: &Value) {
        if let Some(list) = members.as_array() {
            self.members = list.clone();
        }
    }

    fn remove_member(&mut self, member_id: &str) {
        self.members.retain(|member| id_of(member) != Some(member_id));
    }
}
