//! Realtime HTTP Routes
//!
//! WebSocket endpoint for a live consultation. The access token is read
//! from the handshake cookie (or bearer header). Handshake failures are
//! reported by accepting the upgrade and closing with a specific code:
//!
//! | Code | Meaning |
//! |---|---|
//! | 4001 | authentication failed |
//! | 4003 | not a participant, or inactive |
//! | 4004 | no such consultation |
//! | 4008 | fell behind and was dropped |
//! | 4009 | consultation closed |

use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use futures_util::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use tracing::{debug, error};
use uuid::Uuid;

use super::state::AppState;
use crate::consultation::SessionError;
use crate::observability::Event;
use crate::realtime::{
    Connection, ConnectionGuard, ConnectionManager, DeliveryReport, InboundFrame, OutboundFrame,
    RealtimeError,
};
use crate::store::{self, SqliteStore};

pub fn realtime_routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws/{id}", get(websocket_handler))
}

// ==================
// WebSocket Handler
// ==================

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(consultation_id): Path<Uuid>,
    jar: CookieJar,
    headers: HeaderMap,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state, consultation_id, jar, headers))
}

/// Authenticate, authorize and register the connection
async fn accept(
    state: Arc<AppState>,
    consultation_id: Uuid,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Connection<SqliteStore>, RealtimeError> {
    store::blocking(move || -> Result<_, RealtimeError> {
        let identity = state.authenticate(&jar, &headers)?;
        state.registry.load_authorized(consultation_id, identity.id)?;
        Ok(state.connections.connect(consultation_id, identity.id)?)
    })
    .await
}

/// Persist and fan out one message as the connection's participant
async fn relay(
    connections: Arc<ConnectionManager<SqliteStore>>,
    guard: &ConnectionGuard<SqliteStore>,
    content: String,
) -> Result<DeliveryReport, SessionError> {
    let consultation_id = guard.consultation_id();
    let participant_id = guard.participant_id();
    store::blocking(move || connections.send(consultation_id, participant_id, &content)).await
}

async fn close_with(mut socket: WebSocket, reason: &RealtimeError) {
    let frame = CloseFrame {
        code: reason.close_code(),
        reason: reason.to_string().into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: &OutboundFrame,
) -> Result<(), axum::Error> {
    match frame.to_json() {
        Ok(json) => sink.send(Message::Text(json.into())).await,
        Err(e) => {
            error!(error = %e, "Failed to encode frame");
            Ok(())
        }
    }
}

/// Handle individual WebSocket connection
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    consultation_id: Uuid,
    jar: CookieJar,
    headers: HeaderMap,
) {
    let mut connection = match accept(Arc::clone(&state), consultation_id, jar, headers).await {
        Ok(connection) => connection,
        Err(e) => {
            debug!(
                event = %Event::ConnectionRejected,
                consultation_id = %consultation_id,
                code = e.close_code(),
                error = %e,
                "Handshake rejected"
            );
            close_with(socket, &e).await;
            return;
        }
    };

    serve(socket, &state, &mut connection).await;

    // Unregistering waits on the partition lock, which a store write may hold
    let _ = tokio::task::spawn_blocking(move || drop(connection)).await;
}

/// Replay history, then pump frames both ways until either side stops
async fn serve(socket: WebSocket, state: &AppState, connection: &mut Connection<SqliteStore>) {
    let consultation_id = connection.guard.consultation_id();
    let (mut sink, mut stream) = socket.split();

    for message in std::mem::take(&mut connection.history) {
        if send_frame(&mut sink, &OutboundFrame::from(&message)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            outbound = connection.receiver.recv() => match outbound {
                Some(frame) => {
                    if send_frame(&mut sink, &frame).await.is_err() {
                        return;
                    }
                }
                None => {
                    // Removed from fan-out; the registry has already let go
                    let reason = RealtimeError::Lagged;
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: reason.close_code(),
                            reason: reason.to_string().into(),
                        })))
                        .await;
                    return;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let reply = match InboundFrame::parse(text.as_str()) {
                        Ok(frame) => match relay(
                            Arc::clone(&state.connections),
                            &connection.guard,
                            frame.content,
                        )
                        .await
                        {
                            Ok(_) => None,
                            Err(e) => {
                                log_send_failure(consultation_id, &e);
                                Some(OutboundFrame::from(&e))
                            }
                        },
                        Err(e) => Some(OutboundFrame::invalid_frame(e.to_string())),
                    };
                    if let Some(reply) = reply {
                        if send_frame(&mut sink, &reply).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    let reply = OutboundFrame::invalid_frame("binary frames are not supported");
                    if send_frame(&mut sink, &reply).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
            },
        }
    }
}

fn log_send_failure(consultation_id: Uuid, e: &SessionError) {
    match e {
        SessionError::Store(_) => error!(
            event = %Event::StoreFailure,
            consultation_id = %consultation_id,
            error = %e,
            "Message not persisted"
        ),
        _ => debug!(consultation_id = %consultation_id, error = %e, "Message rejected"),
    }
}
