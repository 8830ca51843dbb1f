// handler/realtime.rs
use std::sync::Arc;

use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    Extension,
};
use futures::{SinkExt, StreamExt};
use tokio::time::{interval, Duration};

use crate::{
    error::HttpError,
    middleware::{Actor, AdminPermission},
    models::conversationmodel::{MessageType, SenderType},
    service::{
        error::ServiceError,
        realtime_hub::{ClientEvent, ConnectionId, Room, ServerEvent},
    },
    AppState,
};

const HEARTBEAT_SECS: u64 = 30;

/// Upgrades to a websocket. The actor was resolved by the HTTP middleware
/// during the handshake and is trusted for the lifetime of the socket.
pub async fn realtime_handler(
    ws: WebSocketUpgrade,
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, actor))
}

/// Rooms joined on connect, before any conversation lookup.
pub fn identity_rooms(actor: &Actor) -> Vec<Room> {
    match actor {
        Actor::Visitor { .. } => Vec::new(),
        Actor::User { id, .. } => vec![Room::User(*id)],
        Actor::Admin { id, .. } => vec![Room::User(*id), Room::Admin],
    }
}

fn sender_type_of(actor: &Actor) -> SenderType {
    if actor.is_admin() {
        SenderType::Admin
    } else {
        SenderType::User
    }
}

fn failure(err: ServiceError) -> (String, Option<serde_json::Value>) {
    let err = HttpError::from(err);
    (err.message, err.data)
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, actor: Actor) {
    let hub = app_state.hub.clone();
    let (connection, mut outbound) = hub.register().await;
    let (mut sink, mut stream) = socket.split();

    for room in identity_rooms(&actor) {
        hub.join(connection, room).await;
    }

    match app_state.conversation_service.open_conversation_for(&actor).await {
        Ok(Some(conversation)) => {
            hub.join(connection, Room::Conversation(conversation.id)).await;
        }
        Ok(None) => {}
        Err(e) => tracing::warn!("Could not look up open conversation on connect: {}", e),
    }

    let writer = tokio::spawn(async move {
        let mut heartbeat = interval(Duration::from_secs(HEARTBEAT_SECS));
        heartbeat.tick().await;

        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    let Some(frame) = frame else { break };
                    if sink.send(WsMessage::Text(frame.to_string())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(incoming) = stream.next().await {
        match incoming {
            Ok(WsMessage::Text(text)) => {
                let reply = match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => dispatch(&app_state, &actor, connection, event).await,
                    Err(e) => Some(ServerEvent::Error {
                        message: format!("Unrecognised event: {}", e),
                    }),
                };
                if let Some(reply) = reply {
                    hub.send_to(connection, &reply).await;
                }
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Socket {} read error: {}", connection, e);
                break;
            }
        }
    }

    hub.unregister(connection).await;
    writer.abort();
}

/// Handles one client event; the returned event goes back to the sender only.
async fn dispatch(
    app_state: &AppState,
    actor: &Actor,
    connection: ConnectionId,
    event: ClientEvent,
) -> Option<ServerEvent> {
    let hub = &app_state.hub;

    match event {
        ClientEvent::JoinConversation { conversation_id } => {
            match app_state.conversation_service.authorize(actor, conversation_id).await {
                Ok(_) => {
                    hub.join(connection, Room::Conversation(conversation_id)).await;
                    None
                }
                Err(e) => Some(ServerEvent::Error { message: failure(e).0 }),
            }
        }
        ClientEvent::LeaveConversation { conversation_id } => {
            hub.leave(connection, &Room::Conversation(conversation_id)).await;
            None
        }
        ClientEvent::JoinAuction { auction_id } => {
            match app_state.auction_service.get_auction(auction_id).await {
                Ok(_) => {
                    hub.join(connection, Room::Auction(auction_id)).await;
                    None
                }
                Err(e) => Some(ServerEvent::Error { message: failure(e).0 }),
            }
        }
        ClientEvent::LeaveAuction { auction_id } => {
            hub.leave(connection, &Room::Auction(auction_id)).await;
            None
        }
        ClientEvent::SendMessage {
            request_id,
            body,
            conversation_id,
            message_type,
        } => Some(send_message(app_state, actor, connection, request_id, body, conversation_id, message_type).await),
        ClientEvent::Typing { conversation_id } => {
            typing(app_state, actor, connection, conversation_id, true).await
        }
        ClientEvent::StoppedTyping { conversation_id } => {
            typing(app_state, actor, connection, conversation_id, false).await
        }
        ClientEvent::MarkDelivered {
            conversation_id,
            up_to_message_id,
        } => match app_state
            .conversation_service
            .mark_delivered(actor, conversation_id, up_to_message_id)
            .await
        {
            Ok(_) => None,
            Err(e) => Some(ServerEvent::Error { message: failure(e).0 }),
        },
        ClientEvent::Ping => Some(ServerEvent::Pong),
    }
}

async fn send_message(
    app_state: &AppState,
    actor: &Actor,
    connection: ConnectionId,
    request_id: String,
    body: String,
    conversation_id: Option<i64>,
    message_type: MessageType,
) -> ServerEvent {
    let service = &app_state.conversation_service;

    match (actor, conversation_id) {
        (Actor::Admin { .. }, Some(conversation_id)) => {
            let (admin_id, admin_name) = match actor.require_permission(AdminPermission::ManageConversations) {
                Ok(admin) => admin,
                Err(e) => return ServerEvent::ack_err(request_id, e.message, None),
            };
            match service
                .send_admin_reply(admin_id, admin_name, conversation_id, &body)
                .await
            {
                Ok(outcome) => ServerEvent::ack_ok(
                    request_id,
                    serde_json::json!({
                        "conversation_id": outcome.conversation.id,
                        "message": outcome.message,
                    }),
                ),
                Err(e) => {
                    let (message, data) = failure(e);
                    ServerEvent::ack_err(request_id, message, data)
                }
            }
        }
        (Actor::Admin { .. }, None) => ServerEvent::ack_err(
            request_id,
            "conversation_id is required for admin replies".to_string(),
            None,
        ),
        _ => match service.send_visitor_message(actor, &body, message_type).await {
            Ok(outcome) => {
                let conversation_id = outcome.conversation.id;
                app_state
                    .hub
                    .join(connection, Room::Conversation(conversation_id))
                    .await;
                ServerEvent::ack_ok(
                    request_id,
                    serde_json::json!({
                        "conversation_id": conversation_id,
                        "message": outcome.message,
                        "created": outcome.created,
                        "reopened": outcome.reopened,
                    }),
                )
            }
            Err(e) => {
                let (message, data) = failure(e);
                ServerEvent::ack_err(request_id, message, data)
            }
        },
    }
}

/// Typing indicators are fire-and-forget and never persisted.
async fn typing(
    app_state: &AppState,
    actor: &Actor,
    connection: ConnectionId,
    conversation_id: i64,
    started: bool,
) -> Option<ServerEvent> {
    let room = Room::Conversation(conversation_id);
    if !actor.is_admin() && !app_state.hub.is_member(connection, &room).await {
        return Some(ServerEvent::Error {
            message: "Join the conversation before sending typing events".to_string(),
        });
    }

    let sender_type = sender_type_of(actor);
    let sender_name = actor.display_name().to_string();
    let event = if started {
        ServerEvent::UserTyping {
            conversation_id,
            sender_type,
            sender_name,
        }
    } else {
        ServerEvent::UserStoppedTyping {
            conversation_id,
            sender_type,
            sender_name,
        }
    };

    app_state.hub.broadcast_except(&room, &event, Some(connection)).await;
    if sender_type == SenderType::User {
        app_state.hub.broadcast_except(&Room::Admin, &event, Some(connection)).await;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn identity_decides_the_initial_rooms() {
        let visitor = Actor::Visitor { session_id: "s1".to_string() };
        assert!(identity_rooms(&visitor).is_empty());

        let user_id = Uuid::new_v4();
        let user = Actor::User { id: user_id, name: "Ada".to_string() };
        assert_eq!(identity_rooms(&user), vec![Room::User(user_id)]);

        let admin_id = Uuid::new_v4();
        let admin = Actor::Admin {
            id: admin_id,
            name: "Grace".to_string(),
            permissions: vec![AdminPermission::ManageConversations],
        };
        assert_eq!(identity_rooms(&admin), vec![Room::User(admin_id), Room::Admin]);
        assert_eq!(sender_type_of(&admin), SenderType::Admin);
        assert_eq!(sender_type_of(&user), SenderType::User);
    }

    #[test]
    fn failures_carry_the_public_message_and_data() {
        let (message, data) = failure(ServiceError::BidTooLow { minimum: 130 });
        assert!(message.contains("1.30"));
        assert_eq!(data, Some(serde_json::json!({ "minimum_bid": 130 })));

        let (message, data) = failure(ServiceError::Database(sqlx::Error::PoolTimedOut));
        assert_eq!(message, "Something went wrong, please try again");
        assert_eq!(data, None);
    }
}
