use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use shared::auth::extract_claims;

use crate::fabric::game_room;
use crate::models::{ClientEvent, ServerEvent};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HandshakeQuery {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

/// Identity is settled before the upgrade: a bearer token whose claims the
/// gateway already validated, or the legacy explicit user id.
fn authenticate(query: &HandshakeQuery) -> Option<String> {
    if let Some(token) = &query.token {
        match extract_claims(token) {
            Ok(claims) => return Some(claims.sub),
            Err(e) => {
                warn!("Rejected handshake with invalid token: {}", e);
                return None;
            }
        }
    }
    query.user_id.clone().filter(|id| !id.is_empty())
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<HandshakeQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = match authenticate(&query) {
        Some(user_id) => user_id,
        None => return (StatusCode::UNAUTHORIZED, "authentication required").into_response(),
    };
    ws.on_upgrade(move |socket| handle_socket(state, socket, user_id))
}

/// One task per connection: outbound events drain from the fabric channel,
/// inbound frames are validated and dispatched. Frames that fail schema
/// validation are answered with `error` and never reach the coordinator.
async fn handle_socket(state: AppState, socket: WebSocket, user_id: String) {
    let connection_id = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    state.fabric.register(&connection_id, &user_id, tx.clone());
    info!("User {} connected ({})", user_id, connection_id);
    state.fabric.broadcast_all(&ServerEvent::OnlineCount {
        count: state.fabric.connection_count(),
    });

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let event = match outbound {
                    Some(event) => event,
                    None => break,
                };
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize event for {}: {}", connection_id, e);
                        continue;
                    }
                };
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => dispatch(&state, &connection_id, &user_id, event).await,
                            Err(e) => {
                                let _ = tx.send(ServerEvent::Error {
                                    message: format!("Invalid message: {}", e),
                                });
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => continue,
                }
            }
        }
    }

    let game_rooms = state.fabric.unregister(&connection_id);
    info!("User {} disconnected ({})", user_id, connection_id);
    state
        .coordinator
        .handle_disconnect(&user_id, &game_rooms)
        .await;
    state.fabric.broadcast_all(&ServerEvent::OnlineCount {
        count: state.fabric.connection_count(),
    });
}

async fn dispatch(state: &AppState, connection_id: &str, user_id: &str, event: ClientEvent) {
    let action = event.action();
    let coordinator = &state.coordinator;

    let result = match &event {
        ClientEvent::JoinGame { game_id, .. } => {
            coordinator.join_game(connection_id, user_id, game_id).await
        }
        ClientEvent::MakeMove {
            game_id,
            mv,
            client_timestamp,
            trace_id,
        } => {
            coordinator
                .make_move(user_id, game_id, mv, *client_timestamp, trace_id.as_deref())
                .await
        }
        ClientEvent::SetPremove {
            game_id,
            premove,
            trace_id,
        } => {
            coordinator
                .set_premove(user_id, game_id, premove, trace_id.as_deref())
                .await
        }
        ClientEvent::CancelPremove { game_id } => {
            coordinator.cancel_premove(user_id, game_id).await
        }
        ClientEvent::ResignGame { game_id } => coordinator.resign(user_id, game_id).await,
        ClientEvent::OfferDraw { game_id } => coordinator.offer_draw(user_id, game_id).await,
        ClientEvent::AcceptDraw { game_id } => coordinator.accept_draw(user_id, game_id).await,
        ClientEvent::RejectDraw { game_id } => coordinator.reject_draw(user_id, game_id).await,
        ClientEvent::CancelGame { game_id } => coordinator.cancel_early(user_id, game_id).await,
        ClientEvent::OfferRematch { game_id } => coordinator.offer_rematch(user_id, game_id).await,
        ClientEvent::AcceptRematch { game_id } => {
            coordinator.accept_rematch(user_id, game_id).await
        }
        ClientEvent::RejectRematch { game_id } => {
            coordinator.reject_rematch(user_id, game_id).await
        }
        ClientEvent::LeaveGame { game_id } => {
            let room = game_room(game_id);
            state.fabric.leave(connection_id, &room);
            coordinator
                .handle_disconnect(user_id, std::slice::from_ref(&room))
                .await;
            Ok(())
        }
    };

    match result {
        Ok(()) => {
            state.fabric.emit_connection(
                connection_id,
                &ServerEvent::Ack {
                    action: action.to_string(),
                    status: "success".to_string(),
                },
            );
        }
        Err(e) => {
            info!("Rejected {} from {}: {}", action, user_id, e);
            state.fabric.emit_connection(
                connection_id,
                &ServerEvent::Error {
                    message: e.to_string(),
                },
            );
        }
    }
}
