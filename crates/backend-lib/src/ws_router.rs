// ============================
// crates/backend-lib/src/ws_router.rs
// ============================
//! WebSocket router and connection handling.
//!
//! One task pair per connection: a writer draining the session's outbound
//! queue (and pinging on the heartbeat cadence), and a reader parsing,
//! validating and dispatching inbound frames to the joined room's actor.
//! Every request-scoped failure goes back to the offending socket as an
//! `error` event; nothing a single client sends can take a room down.

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use teleconsult_common::{ClientMessage, UserId};
use tokio::time::timeout;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::metrics::{HEARTBEAT_PRUNED, WS_ACTIVE, WS_CONNECTION};
use crate::room_actor::{RelayKind, RoomHandle};
use crate::session::SessionHandle;
use crate::validation;
use crate::AppState;

/// Create the signaling router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(health))
        .route("/rooms", post(mint_room_id))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "roomsActive": state.registry.active_rooms(),
    }))
}

/// Mint an unused room id for a scheduled appointment. The room itself is
/// only created when the first participant joins it.
async fn mint_room_id(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut rng = rand::rng();
    loop {
        let room_id = format!(
            "{}-{}-{}",
            rng.random_range(100..1000),
            rng.random_range(100..1000),
            rng.random_range(100..1000)
        );
        if !state.registry.is_known(&room_id) {
            return (StatusCode::CREATED, Json(json!({ "roomId": room_id })));
        }
    }
}

/// Handler for WebSocket connections
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    counter!(WS_CONNECTION).increment(1);
    gauge!(WS_ACTIVE).increment(1.0);

    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let config = state.settings.room_config();
    let heartbeat = config.heartbeat;
    let session = SessionHandle::new(config.session_queue);

    // Writer: drain the session queue, interleaving pings at twice the
    // heartbeat cadence so a dead session is caught within one interval
    let writer_session = session.clone();
    let mut send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(heartbeat / 2);
        ping.tick().await;
        loop {
            tokio::select! {
                event = writer_session.recv() => {
                    let Some(event) = event else { break };
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "failed to serialize outbound event");
                            continue;
                        },
                    };
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        writer_session.close();
                        break;
                    }
                },
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        writer_session.close();
                        break;
                    }
                },
            }
        }
    });

    let mut conn = Connection {
        state,
        session: session.clone(),
        joined: None,
    };

    // Reader: a live client answers every ping, so a socket that stays
    // silent for a full heartbeat interval has lost liveness and is pruned
    loop {
        tokio::select! {
            () = session.closed() => break,
            frame = timeout(heartbeat, ws_rx.next()) => match frame {
                Err(_) => {
                    counter!(HEARTBEAT_PRUNED).increment(1);
                    debug!("no liveness signal within heartbeat window, pruning");
                    break;
                },
                Ok(Some(Ok(Message::Text(text)))) => conn.handle_text(&text).await,
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => break,
                // Pongs count as liveness just by arriving
                Ok(Some(Ok(_))) => {},
            },
        }
    }

    // The room prunes the participant and notifies the others; a stale
    // connection id (already replaced by a reconnect) is ignored there
    if let Some((room, user_id)) = conn.joined.take() {
        room.disconnect(user_id, session.connection_id());
    }
    session.close();
    // The writer exits on its own after flushing whatever the close left
    // queued, the teardown frames included; only cut it off if the socket
    // refuses to drain
    if timeout(heartbeat, &mut send_task).await.is_err() {
        send_task.abort();
    }

    gauge!(WS_ACTIVE).decrement(1.0);
}

struct Connection {
    state: Arc<AppState>,
    session: SessionHandle,
    /// Set once this socket has joined a room
    joined: Option<(RoomHandle, UserId)>,
}

impl Connection {
    async fn handle_text(&mut self, text: &str) {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                self.report(AppError::Protocol(format!("malformed message: {e}")));
                return;
            },
        };

        if let Err(e) = validation::validate_client_message(&message) {
            self.report(AppError::Validation(e));
            return;
        }

        if let Err(e) = self.dispatch(message).await {
            self.report(e);
        }
    }

    async fn dispatch(&mut self, message: ClientMessage) -> Result<(), AppError> {
        if let ClientMessage::JoinRoom {
            room_id,
            user,
            metadata,
        } = message
        {
            if self.joined.is_some() {
                return Err(AppError::Protocol(
                    "this connection already joined a room".to_string(),
                ));
            }

            let (room, _created) = self.state.registry.get_or_create(&room_id)?;
            let user_id = user.id.clone();
            room.join(user, metadata, self.session.clone()).await?;
            self.joined = Some((room, user_id));
            return Ok(());
        }

        let Some((room, user_id)) = &self.joined else {
            return Err(AppError::Protocol(
                "join-room must be the first message".to_string(),
            ));
        };
        if message.room_id() != room.room_id() {
            return Err(AppError::Protocol(
                "connection is joined to a different room".to_string(),
            ));
        }
        let from = user_id.clone();

        match message {
            ClientMessage::Offer {
                target, payload, ..
            } => room.relay(from, RelayKind::Offer, target, payload).await,
            ClientMessage::Answer {
                target, payload, ..
            } => room.relay(from, RelayKind::Answer, target, payload).await,
            ClientMessage::IceCandidate {
                target, payload, ..
            } => {
                room.relay(from, RelayKind::IceCandidate, target, payload)
                    .await
            },
            ClientMessage::ChatMessage { text, .. } => room.chat(from, text).await.map(|_seq| ()),
            ClientMessage::UpdateMedicalRecord { notes, .. } => {
                room.update_record(from, notes).await
            },
            ClientMessage::EndAppointment {
                summary, follow_up, ..
            } => room.end(from, summary, follow_up).await,
            ClientMessage::JoinRoom { .. } => unreachable!("handled above"),
        }
    }

    /// Errors go to the offending sender only, as `error` events.
    fn report(&self, error: AppError) {
        debug!(code = error.error_code(), error = %error, "reporting error to sender");
        self.session.send(error.to_event());
    }
}
