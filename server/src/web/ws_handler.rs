//! WebSocket endpoint: handshake authentication, then one read loop per
//! connection feeding the hub and one write task draining the session queue.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::app_state::AppState;
use crate::auth::handshake::{Identity, authenticate};
use crate::engine::events::{ClientEvent, ServerEvent, SessionId};
use crate::engine::fanout::Dispatch;
use crate::engine::hub::Hub;

/// `GET /ws`. The session cookie is verified before the upgrade; a rejected
/// handshake never becomes a session.
pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !state.hub.is_running() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Server shutting down").into_response();
    }

    let identity = match authenticate(
        &jar,
        &state.auth_config.jwt_secret,
        state.hub.directory(),
    )
    .await
    {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "websocket handshake rejected");
            return (StatusCode::UNAUTHORIZED, e.client_message()).into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, identity, hub))
}

async fn handle_socket(socket: WebSocket, identity: Identity, hub: Arc<Hub>) {
    let (session_id, mut outbound_rx) = match hub.connect(identity) {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "refusing websocket session");
            return;
        }
    };

    let (mut ws_sender, ws_receiver) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "failed to serialize outbound event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    serve_session(&hub, session_id, ws_receiver).await;
    writer.abort();
    info!(%session_id, "websocket connection closed");
}

/// Work started by one connection that may outlive the frame that caused it.
struct Inflight {
    /// Relays waiting on a directory read.
    relays: JoinSet<()>,
    /// Join and leave, applied one at a time in arrival order.
    membership: mpsc::UnboundedSender<Dispatch>,
    membership_task: JoinHandle<()>,
}

impl Inflight {
    fn new(hub: Arc<Hub>, session_id: SessionId) -> Self {
        let (membership, mut rx) = mpsc::unbounded_channel::<Dispatch>();
        let membership_task = tokio::spawn(async move {
            while let Some(dispatch) = rx.recv().await {
                if let Err(e) = hub.execute(session_id, dispatch).await {
                    warn!(%session_id, error = %e, "membership change failed");
                }
            }
        });

        Self {
            relays: JoinSet::new(),
            membership,
            membership_task,
        }
    }

    fn abort(&mut self) {
        self.relays.abort_all();
        self.membership_task.abort();
    }
}

/// Read frames until the peer goes away or the hub stops, then drop the
/// session. Anything still in flight for it is cancelled.
async fn serve_session<S>(hub: &Arc<Hub>, session_id: SessionId, mut frames: S)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let shutdown = hub.shutdown_token();
    let mut inflight = Inflight::new(hub.clone(), session_id);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(done) = inflight.relays.join_next(), if !inflight.relays.is_empty() => {
                if let Err(e) = done
                    && e.is_panic()
                {
                    error!(%session_id, error = %e, "event handler panicked");
                }
            }
            frame = frames.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(hub, session_id, text.as_str(), &mut inflight).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(%session_id, error = %e, "websocket read error");
                        break;
                    }
                }
            }
        }
    }

    inflight.abort();
    hub.disconnect(session_id);
}

/// Decode and route one text frame.
///
/// Join and leave go through the connection's membership queue. Relays that
/// read the directory run concurrently so a slow lookup holds up only that
/// event. Everything else is handled inline in arrival order.
async fn handle_frame(hub: &Arc<Hub>, session_id: SessionId, text: &str, inflight: &mut Inflight) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(%session_id, error = %e, "invalid frame");
            hub.send_to(
                session_id,
                ServerEvent::error(format!("Invalid message format: {e}")),
            );
            return;
        }
    };

    debug!(%session_id, event = event.name(), group_id = event.group_id(), "inbound event");

    let dispatch = match hub.dispatch(session_id, event) {
        Ok(dispatch) => dispatch,
        Err(e) => {
            warn!(%session_id, error = %e, "dropping inbound event");
            return;
        }
    };

    if dispatch.changes_membership() {
        if inflight.membership.send(dispatch).is_err() {
            warn!(%session_id, "membership queue closed");
        }
    } else if dispatch.reads_directory() {
        let hub = hub.clone();
        inflight.relays.spawn(async move {
            if let Err(e) = hub.execute(session_id, dispatch).await {
                warn!(%session_id, error = %e, "event handling failed");
            }
        });
    } else if let Err(e) = hub.execute(session_id, dispatch).await {
        warn!(%session_id, error = %e, "event handling failed");
    }
}
