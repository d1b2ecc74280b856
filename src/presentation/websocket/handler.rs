//! WebSocket Connection Handler
//!
//! Accepts a socket with a bearer token, authenticates once, wires the
//! connection into the registries, then runs the per-connection loop:
//! inbound frame dispatch, outbound queue draining, and heartbeat
//! supervision. Every inbound operation except `pong` passes the rate
//! limiter first.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::interval;
use uuid::Uuid;

use super::messages::{ClientFrame, Outbound, ServerFrame};
use super::session::SessionState;
use crate::application::services::rate_limiter::RequestContext;
use crate::domain::{ConnectionId, DisconnectReason, Room, UserId};
use crate::shared::error::AppError;
use crate::startup::{AppState, SyncServices};

/// Query fallback for clients that cannot set headers on the upgrade
/// request (browser WebSocket API).
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Query(params): Query<ConnectParams>,
) -> Response {
    let token = bearer
        .map(|TypedHeader(Authorization(bearer))| bearer.token().to_string())
        .or(params.token);
    ws.max_message_size(state.services.settings.websocket.max_message_size)
        .max_frame_size(state.services.settings.websocket.max_frame_size)
        .on_upgrade(move |socket| handle_socket(socket, state.services, token, addr))
}

/// Handle one WebSocket connection for its whole lifetime.
async fn handle_socket(
    socket: WebSocket,
    services: Arc<SyncServices>,
    token: Option<String>,
    addr: SocketAddr,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    // Writer task: drains the outbound queue onto the socket.
    let writer = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            match out {
                Outbound::Frame(frame) => {
                    let text = match serde_json::to_string(&frame) {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize frame");
                            continue;
                        }
                    };
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Ping => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Authenticate exactly once. Failure closes the socket; no retry.
    let identity = match token {
        Some(token) => match services.identity.verify(&token).await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::debug!(error = %e, "WebSocket authentication failed");
                reject(&tx, &e).await;
                writer.abort();
                return;
            }
        },
        None => {
            let e = AppError::AuthenticationFailure("Missing bearer token".into());
            reject(&tx, &e).await;
            writer.abort();
            return;
        }
    };

    let user_id = identity.user_id;
    let connection_id: ConnectionId = Uuid::new_v4();
    let heartbeat_ms = services.settings.websocket.heartbeat_interval_ms;

    services
        .connections
        .register(connection_id, user_id, tx.clone());
    services
        .rooms
        .insert_membership(connection_id, user_id, Room::user(user_id));
    services.recovery.register(connection_id, user_id);
    services.presence.touch(user_id).await;

    let _ = tx.send(Outbound::Frame(ServerFrame::established(
        connection_id,
        user_id,
        heartbeat_ms,
    )));
    // Prime the heartbeat so the first tick sees a fresh pong.
    let _ = tx.send(Outbound::Ping);

    tracing::info!(user_id, connection_id = %connection_id, "User connected");

    let mut session = SessionState::new();
    let mut heartbeat = interval(Duration::from_millis(heartbeat_ms));
    heartbeat.tick().await; // skip the immediate tick

    let mut reason = DisconnectReason::TransportClose;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(
                            &text,
                            &services,
                            &mut session,
                            connection_id,
                            user_id,
                            addr,
                            &tx,
                        )
                        .await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        session.pong();
                        services.presence.touch(user_id).await;
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // Protocol pong is handled by axum.
                    }
                    Some(Ok(Message::Close(_))) => {
                        reason = DisconnectReason::Clean;
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary frames are not part of the protocol.
                    }
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => break,
                }
            }

            _ = heartbeat.tick() => {
                if session.responded_within(heartbeat_ms) {
                    let _ = tx.send(Outbound::Ping);
                } else if session.tick_missed() {
                    tracing::info!(
                        connection_id = %connection_id,
                        "Heartbeat timeout, entering recovery flow"
                    );
                    reason = DisconnectReason::Timeout;
                    break;
                } else {
                    tracing::debug!(connection_id = %connection_id, "Connection stale");
                    let _ = tx.send(Outbound::Ping);
                }
            }
        }
    }

    if services.is_shutting_down() {
        reason = DisconnectReason::ServerShutdown;
    }

    services.connections.unregister(connection_id);
    services.recovery.on_disconnect(connection_id, reason);
    writer.abort();

    tracing::info!(
        user_id,
        connection_id = %connection_id,
        ?reason,
        "User disconnected"
    );
}

/// Send an error frame and give the writer a moment to flush it.
async fn reject(tx: &mpsc::UnboundedSender<Outbound>, error: &AppError) {
    let _ = tx.send(Outbound::Frame(ServerFrame::error(error.client_code())));
    let _ = tx.send(Outbound::Close);
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Parse and dispatch one inbound frame.
async fn handle_frame(
    text: &str,
    services: &Arc<SyncServices>,
    session: &mut SessionState,
    connection_id: ConnectionId,
    user_id: UserId,
    addr: SocketAddr,
    tx: &mpsc::UnboundedSender<Outbound>,
) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            // Reported to the originating client only; never tears down
            // the connection or affects others.
            tracing::debug!(connection_id = %connection_id, error = %e, "Malformed frame");
            let _ = tx.send(Outbound::Frame(ServerFrame::error("malformed_frame")));
            return;
        }
    };

    // App-level pong is heartbeat plumbing; it skips the limiter.
    if matches!(frame, ClientFrame::Pong) {
        session.pong();
        services.presence.touch(user_id).await;
        return;
    }

    let ctx = RequestContext {
        user_id,
        connection_id,
        ip: Some(addr.ip()),
    };
    if let Err(refusal) = services.rate_limiter.check(&ctx) {
        let _ = tx.send(Outbound::Frame(ServerFrame::rate_limit_exceeded(&refusal)));
        return;
    }

    match frame {
        ClientFrame::Activity(update) => {
            services.presence.mark_active(user_id, &update).await;
        }

        ClientFrame::Subscribe { room_type, room_id } => {
            let room = Room::new(room_type, room_id);
            match services.rooms.join(connection_id, user_id, room).await {
                Ok(()) => {
                    let _ = tx.send(Outbound::Frame(ServerFrame::subscription_confirmed(&room)));
                }
                Err(AppError::AuthorizationDenied(_)) => {
                    // Only this subscribe is rejected; the connection
                    // stays open.
                    let _ = tx.send(Outbound::Frame(ServerFrame::subscription_denied(&room)));
                }
                Err(e) => {
                    tracing::warn!(connection_id = %connection_id, error = %e, "Join failed");
                    let _ = tx.send(Outbound::Frame(ServerFrame::error(e.client_code())));
                }
            }
        }

        ClientFrame::Unsubscribe { room_type, room_id } => {
            let room = Room::new(room_type, room_id);
            services.rooms.leave(connection_id, &room);
            let _ = tx.send(Outbound::Frame(ServerFrame::subscription_removed(&room)));
        }

        ClientFrame::Ping => {
            let _ = tx.send(Outbound::Frame(ServerFrame::pong()));
        }

        ClientFrame::Pong => {
            // Handled above.
        }

        ClientFrame::ReconnectRequest { session_id } => {
            match services.recovery.reconnect(session_id, connection_id, user_id) {
                Ok(replay) => {
                    let _ = tx.send(Outbound::Frame(
                        ServerFrame::missed_events_since_disconnect(&replay.since_disconnect),
                    ));
                    if !replay.earlier.is_empty() {
                        let _ = tx.send(Outbound::Frame(ServerFrame::missed_events(
                            &replay.earlier,
                        )));
                    }
                }
                Err(e) => {
                    let _ = tx.send(Outbound::Frame(ServerFrame::error(e.client_code())));
                }
            }
        }

        ClientFrame::RequestMissedEvents => {
            let events = services.missed.drain(user_id);
            let _ = tx.send(Outbound::Frame(ServerFrame::missed_events(&events)));
        }
    }
}
