use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::HubError;
use super::events::{ClientEvent, ServerEvent, SessionId};
use super::fanout::{self, Dispatch, FanOut, GroupCheck, Relay};
use super::registry::RoomRegistry;
use super::user_session::{MAX_OUTBOUND_QUEUE, UserSession};
use crate::auth::handshake::Identity;
use crate::db::directory::Directory;

/// The relay's single owner of live state: connected sessions and the rooms
/// they occupy. Created once at startup and handed to every connection.
pub struct Hub {
    /// All currently connected sessions, keyed by session ID.
    sessions: DashMap<SessionId, Arc<UserSession>>,
    rooms: RoomRegistry,
    directory: Directory,
    /// Cancelled by `stop`; open connections watch it to close.
    shutdown: CancellationToken,
}

impl Hub {
    pub fn new(directory: Directory) -> Self {
        Self {
            sessions: DashMap::new(),
            rooms: RoomRegistry::new(),
            directory,
            shutdown: CancellationToken::new(),
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Stop accepting connections and signal open ones to close.
    pub fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            info!(sessions = self.sessions.len(), "hub stopping");
            self.shutdown.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Token that fires when the hub stops.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    // ── Session management ──────────────────────────────────────────

    /// Register an authenticated session. Returns the session ID and its outbound receiver.
    pub fn connect(
        &self,
        identity: Identity,
    ) -> Result<(SessionId, mpsc::Receiver<ServerEvent>), HubError> {
        if !self.is_running() {
            return Err(HubError::ShuttingDown);
        }

        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(MAX_OUTBOUND_QUEUE);

        let session = Arc::new(UserSession::new(
            session_id,
            identity.user_id,
            identity.display_name,
            tx,
        ));

        info!(%session_id, user_id = %session.user_id, "session connected");
        self.rooms.register(session_id);
        self.sessions.insert(session_id, session);

        Ok((session_id, rx))
    }

    /// Drop a session and every room membership it held. Remaining occupants
    /// are not told: only an explicit `leave-group` announces a departure.
    pub fn disconnect(&self, session_id: SessionId) {
        let Some((_, session)) = self.sessions.remove(&session_id) else {
            return;
        };

        let rooms = self.rooms.unregister(session_id);
        info!(
            %session_id,
            user_id = %session.user_id,
            rooms = rooms.len(),
            connected_secs = session.connected_for().num_seconds(),
            "session disconnected"
        );
    }

    pub fn get_session(&self, session_id: SessionId) -> Option<Arc<UserSession>> {
        self.sessions.get(&session_id).map(|s| s.clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Sessions currently occupying a group's room.
    pub fn occupants(&self, group_id: &str) -> Vec<SessionId> {
        self.rooms.occupants(group_id, None)
    }

    pub fn is_in_room(&self, group_id: &str, session_id: SessionId) -> bool {
        self.rooms.contains(group_id, session_id)
    }

    fn session(&self, session_id: SessionId) -> Result<Arc<UserSession>, HubError> {
        self.get_session(session_id)
            .ok_or(HubError::SessionNotFound(session_id))
    }

    // ── Event handling ──────────────────────────────────────────────

    /// Resolve an inbound event for a session against the relay table.
    pub fn dispatch(&self, session_id: SessionId, event: ClientEvent) -> Result<Dispatch, HubError> {
        let session = self.session(session_id)?;
        Ok(fanout::route(event, &session))
    }

    /// Handle one inbound event to completion.
    pub async fn handle_event(
        &self,
        session_id: SessionId,
        event: ClientEvent,
    ) -> Result<(), HubError> {
        let dispatch = self.dispatch(session_id, event)?;
        self.execute(session_id, dispatch).await
    }

    /// Carry out an already-routed event.
    pub async fn execute(&self, session_id: SessionId, dispatch: Dispatch) -> Result<(), HubError> {
        match dispatch {
            Dispatch::Join(group_id) => self.join_group(session_id, &group_id).await,
            Dispatch::Leave(group_id) => self.leave_group(session_id, &group_id),
            Dispatch::Relay(relay) => self.relay(session_id, relay).await,
        }
    }

    // ── Room membership ─────────────────────────────────────────────

    /// Admit a session to a group's room if the directory lists it as a member.
    /// Failures are reported to the caller only and leave state unchanged.
    pub async fn join_group(&self, session_id: SessionId, group_id: &str) -> Result<(), HubError> {
        let session = self.session(session_id)?;

        let group = match self.directory.find_group(group_id).await {
            Ok(Some(group)) => group,
            Ok(None) => {
                warn!(%session_id, %group_id, "join refused: group not found");
                self.reply(&session, ServerEvent::error("Group not found"));
                return Ok(());
            }
            Err(e) => {
                error!(%session_id, %group_id, error = %e, "error joining group");
                self.reply(&session, ServerEvent::error("Error joining group"));
                return Ok(());
            }
        };

        if !group.has_member(&session.user_id) {
            warn!(%session_id, %group_id, user_id = %session.user_id, "join refused: not a member");
            self.reply(
                &session,
                ServerEvent::error("Not authorized to join this group"),
            );
            return Ok(());
        }

        if !self.rooms.join(group_id, session_id) {
            debug!(%session_id, %group_id, "session disconnected before join completed");
            return Ok(());
        }

        info!(%session_id, %group_id, username = %session.display_name, "joined group");

        let joined = ServerEvent::UserJoined {
            user_id: session.user_id.clone(),
            username: session.display_name.clone(),
        };
        self.broadcast(group_id, &joined, Some(session_id));
        self.reply(
            &session,
            ServerEvent::JoinedGroup {
                group_id: group_id.to_string(),
            },
        );
        Ok(())
    }

    /// Remove a session from a group's room and tell the remaining occupants.
    /// Membership is not re-checked and the caller gets no acknowledgment.
    pub fn leave_group(&self, session_id: SessionId, group_id: &str) -> Result<(), HubError> {
        let session = self.session(session_id)?;

        self.rooms.leave(group_id, session_id);
        info!(%session_id, %group_id, username = %session.display_name, "left group");

        let left = ServerEvent::UserLeft {
            user_id: session.user_id.clone(),
            username: session.display_name.clone(),
        };
        self.broadcast(group_id, &left, Some(session_id));
        Ok(())
    }

    // ── Relay ───────────────────────────────────────────────────────

    async fn relay(&self, session_id: SessionId, relay: Relay) -> Result<(), HubError> {
        let session = self.session(session_id)?;
        let group_id = relay.group_id.as_str();

        match relay.check {
            GroupCheck::Skip => {}
            GroupCheck::DropIfMissing => match self.directory.find_group(group_id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!(%session_id, %group_id, event = relay.outbound.name(), "dropping relay: group not found");
                    return Ok(());
                }
                Err(e) => {
                    error!(%session_id, %group_id, event = relay.outbound.name(), error = %e, "dropping relay: group lookup failed");
                    return Ok(());
                }
            },
            GroupCheck::ReportIfMissing { failure } => {
                match self.directory.find_group(group_id).await {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        warn!(%session_id, %group_id, event = relay.outbound.name(), "relay refused: group not found");
                        self.reply(&session, ServerEvent::error("Group not found"));
                        return Ok(());
                    }
                    Err(e) => {
                        error!(%session_id, %group_id, event = relay.outbound.name(), error = %e, "relay failed: group lookup failed");
                        self.reply(&session, ServerEvent::error(failure));
                        return Ok(());
                    }
                }
            }
        }

        let exclude = match relay.scope {
            FanOut::All => None,
            FanOut::ExceptSender => Some(session_id),
        };
        let delivered = self.broadcast(group_id, &relay.outbound, exclude);
        debug!(%session_id, %group_id, event = relay.outbound.name(), delivered, "relayed");
        Ok(())
    }

    /// Deliver an event to every occupant of a room except `exclude`.
    /// A failed delivery to one recipient does not affect the others.
    /// Returns how many recipients accepted the event.
    pub fn broadcast(&self, group_id: &str, event: &ServerEvent, exclude: Option<SessionId>) -> usize {
        let mut delivered = 0;
        for member_id in self.rooms.occupants(group_id, exclude) {
            let Some(session) = self.get_session(member_id) else {
                continue;
            };
            match session.send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(%member_id, %group_id, event = event.name(), error = %e, "failed to send event to session");
                }
            }
        }
        delivered
    }

    /// Send an event to one session by ID.
    pub fn send_to(&self, session_id: SessionId, event: ServerEvent) {
        if let Some(session) = self.get_session(session_id) {
            self.reply(&session, event);
        }
    }

    /// Send an event to one session only.
    fn reply(&self, session: &UserSession, event: ServerEvent) {
        if let Err(e) = session.send(event) {
            warn!(session_id = %session.id, error = %e, "failed to reply to session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::directory::MemoryDirectory;
    use serde_json::json;

    /// Helper: hub over an in-memory directory with group G7 = {alice, bob}.
    fn setup_hub() -> (Hub, Arc<MemoryDirectory>) {
        let (directory, store) = Directory::memory();
        store.insert_user("u1", "alice");
        store.insert_user("u2", "bob");
        store.insert_user("u3", "carol");
        store.insert_group("G7", "Linear Algebra", &["u1", "u2"]);
        (Hub::new(directory), store)
    }

    fn connect(hub: &Hub, user_id: &str, name: &str) -> (SessionId, mpsc::Receiver<ServerEvent>) {
        hub.connect(Identity {
            user_id: user_id.into(),
            display_name: name.into(),
        })
        .unwrap()
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Alice and Bob both joined G7, receivers drained.
    async fn joined_pair(
        hub: &Hub,
    ) -> (
        (SessionId, mpsc::Receiver<ServerEvent>),
        (SessionId, mpsc::Receiver<ServerEvent>),
    ) {
        let (a, mut rx_a) = connect(hub, "u1", "alice");
        let (b, mut rx_b) = connect(hub, "u2", "bob");
        hub.join_group(a, "G7").await.unwrap();
        hub.join_group(b, "G7").await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);
        ((a, rx_a), (b, rx_b))
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let (hub, _) = setup_hub();
        let (sid, _rx) = connect(&hub, "u1", "alice");
        assert_eq!(hub.session_count(), 1);
        assert_eq!(hub.get_session(sid).unwrap().display_name, "alice");

        hub.disconnect(sid);
        assert_eq!(hub.session_count(), 0);
        assert!(hub.get_session(sid).is_none());
    }

    #[tokio::test]
    async fn test_join_acknowledges_caller_and_notifies_others() {
        let (hub, _) = setup_hub();
        let (a, mut rx_a) = connect(&hub, "u1", "alice");
        let (b, mut rx_b) = connect(&hub, "u2", "bob");

        hub.join_group(a, "G7").await.unwrap();
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerEvent::JoinedGroup {
                group_id: "G7".into()
            }]
        );

        hub.join_group(b, "G7").await.unwrap();
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerEvent::UserJoined {
                user_id: "u2".into(),
                username: "bob".into()
            }]
        );
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::JoinedGroup {
                group_id: "G7".into()
            }]
        );
        assert!(hub.is_in_room("G7", a));
        assert!(hub.is_in_room("G7", b));
    }

    #[tokio::test]
    async fn test_join_refused_for_non_member() {
        let (hub, _) = setup_hub();
        let ((_, mut rx_a), _) = joined_pair(&hub).await;
        let (c, mut rx_c) = connect(&hub, "u3", "carol");

        hub.join_group(c, "G7").await.unwrap();

        assert_eq!(
            drain(&mut rx_c),
            vec![ServerEvent::error("Not authorized to join this group")]
        );
        assert!(!hub.is_in_room("G7", c));
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn test_join_missing_group() {
        let (hub, _) = setup_hub();
        let (a, mut rx_a) = connect(&hub, "u1", "alice");

        hub.join_group(a, "nope").await.unwrap();

        assert_eq!(drain(&mut rx_a), vec![ServerEvent::error("Group not found")]);
        assert!(hub.occupants("nope").is_empty());
    }

    #[tokio::test]
    async fn test_join_store_failure() {
        let (hub, store) = setup_hub();
        let (a, mut rx_a) = connect(&hub, "u1", "alice");
        store.set_offline(true);

        hub.join_group(a, "G7").await.unwrap();

        assert_eq!(drain(&mut rx_a), vec![ServerEvent::error("Error joining group")]);
        assert!(!hub.is_in_room("G7", a));
    }

    #[tokio::test]
    async fn test_send_message_reaches_sender_and_others() {
        let (hub, _) = setup_hub();
        let ((a, mut rx_a), (_, mut rx_b)) = joined_pair(&hub).await;

        let message = json!({"text": "hi"});
        hub.handle_event(
            a,
            ClientEvent::SendMessage {
                group_id: "G7".into(),
                message: message.clone(),
            },
        )
        .await
        .unwrap();

        assert_eq!(drain(&mut rx_a), vec![ServerEvent::ReceiveMessage(message.clone())]);
        assert_eq!(drain(&mut rx_b), vec![ServerEvent::ReceiveMessage(message)]);
    }

    #[tokio::test]
    async fn test_task_created_excludes_sender() {
        let (hub, _) = setup_hub();
        let ((a, mut rx_a), (_, mut rx_b)) = joined_pair(&hub).await;

        let task = json!({"id": "T1"});
        hub.handle_event(
            a,
            ClientEvent::TaskCreated {
                group_id: "G7".into(),
                task: task.clone(),
            },
        )
        .await
        .unwrap();

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec![ServerEvent::TaskAdded(task)]);
    }

    #[tokio::test]
    async fn test_task_updated_and_deleted_include_sender() {
        let (hub, _) = setup_hub();
        let ((a, mut rx_a), (_, mut rx_b)) = joined_pair(&hub).await;

        let task = json!({"_id": "T1", "status": "completed"});
        hub.handle_event(
            a,
            ClientEvent::TaskUpdated {
                group_id: "G7".into(),
                task: task.clone(),
            },
        )
        .await
        .unwrap();
        hub.handle_event(
            a,
            ClientEvent::TaskDeleted {
                group_id: "G7".into(),
                task_id: "T1".into(),
            },
        )
        .await
        .unwrap();

        let expected = vec![
            ServerEvent::TaskModified(task),
            ServerEvent::TaskRemoved("T1".into()),
        ];
        assert_eq!(drain(&mut rx_a), expected);
        assert_eq!(drain(&mut rx_b), expected);
    }

    #[tokio::test]
    async fn test_member_events_exclude_sender() {
        let (hub, _) = setup_hub();
        let ((a, mut rx_a), (_, mut rx_b)) = joined_pair(&hub).await;

        let members = json!([{"_id": "u1"}, {"_id": "u2"}, {"_id": "u3"}]);
        hub.handle_event(
            a,
            ClientEvent::MemberAdded {
                group_id: "G7".into(),
                members: members.clone(),
            },
        )
        .await
        .unwrap();
        hub.handle_event(
            a,
            ClientEvent::MemberRemoved {
                group_id: "G7".into(),
                member_id: "u3".into(),
            },
        )
        .await
        .unwrap();

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(
            drain(&mut rx_b),
            vec![
                ServerEvent::MemberJoined(members),
                ServerEvent::MemberLeft("u3".into())
            ]
        );
    }

    #[tokio::test]
    async fn test_typing_relays_identity_to_others_only() {
        let (hub, _) = setup_hub();
        let ((a, mut rx_a), (_, mut rx_b)) = joined_pair(&hub).await;

        hub.handle_event(a, ClientEvent::TypingStart { group_id: "G7".into() })
            .await
            .unwrap();
        hub.handle_event(a, ClientEvent::TypingStop { group_id: "G7".into() })
            .await
            .unwrap();

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(
            drain(&mut rx_b),
            vec![
                ServerEvent::UserTyping {
                    user_id: "u1".into(),
                    username: "alice".into()
                },
                ServerEvent::UserStoppedTyping {
                    user_id: "u1".into()
                }
            ]
        );
    }

    #[tokio::test]
    async fn test_leave_announces_and_stops_delivery() {
        let (hub, _) = setup_hub();
        let ((a, mut rx_a), (b, mut rx_b)) = joined_pair(&hub).await;

        hub.handle_event(a, ClientEvent::LeaveGroup("G7".into()))
            .await
            .unwrap();
        assert!(drain(&mut rx_a).is_empty(), "leave is not acknowledged");
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::UserLeft {
                user_id: "u1".into(),
                username: "alice".into()
            }]
        );

        let message = json!({"text": "still here?"});
        hub.handle_event(
            b,
            ClientEvent::SendMessage {
                group_id: "G7".into(),
                message: message.clone(),
            },
        )
        .await
        .unwrap();
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec![ServerEvent::ReceiveMessage(message)]);
    }

    #[tokio::test]
    async fn test_disconnect_does_not_announce_departure() {
        let (hub, _) = setup_hub();
        let ((a, _rx_a), (b, mut rx_b)) = joined_pair(&hub).await;

        hub.disconnect(a);

        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(hub.occupants("G7"), vec![b]);
    }

    #[tokio::test]
    async fn test_task_relay_for_missing_group_is_silently_dropped() {
        let (hub, store) = setup_hub();
        let ((a, mut rx_a), (_, mut rx_b)) = joined_pair(&hub).await;
        store.remove_group("G7");

        hub.handle_event(
            a,
            ClientEvent::TaskUpdated {
                group_id: "G7".into(),
                task: json!({"_id": "T1"}),
            },
        )
        .await
        .unwrap();

        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_task_relay_on_store_failure_is_silently_dropped() {
        let (hub, store) = setup_hub();
        let ((a, mut rx_a), (_, mut rx_b)) = joined_pair(&hub).await;
        store.set_offline(true);

        hub.handle_event(
            a,
            ClientEvent::TaskDeleted {
                group_id: "G7".into(),
                task_id: "T1".into(),
            },
        )
        .await
        .unwrap();

        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_send_message_failures_are_reported_to_sender() {
        let (hub, store) = setup_hub();
        let ((a, mut rx_a), (_, mut rx_b)) = joined_pair(&hub).await;

        let send = |group_id: &str| ClientEvent::SendMessage {
            group_id: group_id.into(),
            message: json!({"text": "hello?"}),
        };

        hub.handle_event(a, send("missing")).await.unwrap();
        assert_eq!(drain(&mut rx_a), vec![ServerEvent::error("Group not found")]);

        store.set_offline(true);
        hub.handle_event(a, send("G7")).await.unwrap();
        assert_eq!(drain(&mut rx_a), vec![ServerEvent::error("Error sending message")]);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_membership_not_rechecked_after_join() {
        let (hub, store) = setup_hub();
        let ((a, _rx_a), (_, mut rx_b)) = joined_pair(&hub).await;
        store.remove_member("G7", "u1");

        hub.handle_event(
            a,
            ClientEvent::TaskCreated {
                group_id: "G7".into(),
                task: json!({"_id": "T2"}),
            },
        )
        .await
        .unwrap();

        assert_eq!(drain(&mut rx_b), vec![ServerEvent::TaskAdded(json!({"_id": "T2"}))]);
    }

    #[tokio::test]
    async fn test_failed_recipient_does_not_block_others() {
        let (hub, _) = setup_hub();
        let ((a, rx_a), (_, mut rx_b)) = joined_pair(&hub).await;
        drop(rx_a);

        let message = json!({"text": "anyone?"});
        let delivered = hub.broadcast("G7", &ServerEvent::ReceiveMessage(message.clone()), None);

        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut rx_b), vec![ServerEvent::ReceiveMessage(message)]);
        assert!(hub.is_in_room("G7", a));
    }

    #[tokio::test]
    async fn test_relay_from_session_outside_room() {
        let (hub, _) = setup_hub();
        let ((_, mut rx_a), (_, mut rx_b)) = joined_pair(&hub).await;
        let (c, mut rx_c) = connect(&hub, "u3", "carol");

        hub.handle_event(c, ClientEvent::TypingStart { group_id: "G7".into() })
            .await
            .unwrap();

        assert!(drain(&mut rx_c).is_empty());
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_session_is_an_error() {
        let (hub, _) = setup_hub();
        let result = hub
            .handle_event(Uuid::new_v4(), ClientEvent::JoinGroup("G7".into()))
            .await;
        assert!(matches!(result, Err(HubError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_stop_refuses_new_sessions() {
        let (hub, _) = setup_hub();
        let token = hub.shutdown_token();
        assert!(hub.is_running());

        hub.stop();

        assert!(!hub.is_running());
        assert!(token.is_cancelled());
        let result = hub.connect(Identity {
            user_id: "u1".into(),
            display_name: "alice".into(),
        });
        assert!(matches!(result, Err(HubError::ShuttingDown)));
    }
}
