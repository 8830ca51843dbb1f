// service/realtime_hub.rs
//! In-process fan-out for websocket connections.
//!
//! Delivery is at-most-once: nothing is queued for connections that are not
//! registered, and a client that reconnects recovers state through the REST
//! read endpoints.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::models::{
    auctionmodel::{Auction, Bid},
    conversationmodel::{Conversation, Message, MessageType, SenderType},
    countdownmodel::Countdown,
    notificationmodel::UserNotification,
};

pub type ConnectionId = u64;
pub type Frame = Arc<str>;

/// Frames buffered per connection before new ones are dropped.
const OUTBOUND_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    Conversation(i64),
    Admin,
    User(Uuid),
    Auction(i64),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Conversation(id) => write!(f, "conversation_{}", id),
            Room::Admin => f.write_str("admin_room"),
            Room::User(id) => write!(f, "user_{}", id),
            Room::Auction(id) => write!(f, "auction_{}", id),
        }
    }
}

/// Events pushed to clients, framed as `{"event": "...", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Ack {
        request_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    NewMessage {
        conversation_id: i64,
        message: Message,
    },
    ConversationClosed {
        conversation: Conversation,
    },
    ConversationReopened {
        conversation: Conversation,
    },
    MessagesSeen {
        conversation_id: i64,
        message_ids: Vec<i64>,
    },
    MessagesDelivered {
        conversation_id: i64,
        message_ids: Vec<i64>,
    },
    LiveChatRequested {
        conversation: Conversation,
    },
    UserTyping {
        conversation_id: i64,
        sender_type: SenderType,
        sender_name: String,
    },
    UserStoppedTyping {
        conversation_id: i64,
        sender_type: SenderType,
        sender_name: String,
    },
    BidPlaced {
        auction: Auction,
        bid: Bid,
    },
    AuctionActivated {
        auction: Auction,
    },
    AuctionSettled {
        auction: Auction,
        reserve_met: bool,
    },
    AuctionCancelled {
        auction: Auction,
    },
    AuctionExtended {
        auction: Auction,
    },
    CountdownUpdated {
        countdown: Countdown,
        remaining_seconds: i64,
    },
    CountdownDeleted {
        countdown_id: i64,
    },
    Notification {
        notification: UserNotification,
    },
    Error {
        message: String,
    },
    Pong,
}

impl ServerEvent {
    pub fn ack_ok(request_id: String, data: serde_json::Value) -> Self {
        ServerEvent::Ack {
            request_id,
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn ack_err(request_id: String, message: String, data: Option<serde_json::Value>) -> Self {
        ServerEvent::Ack {
            request_id,
            success: false,
            message: Some(message),
            data,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Ack { .. } => "ack",
            ServerEvent::NewMessage { .. } => "new_message",
            ServerEvent::ConversationClosed { .. } => "conversation_closed",
            ServerEvent::ConversationReopened { .. } => "conversation_reopened",
            ServerEvent::MessagesSeen { .. } => "messages_seen",
            ServerEvent::MessagesDelivered { .. } => "messages_delivered",
            ServerEvent::LiveChatRequested { .. } => "live_chat_requested",
            ServerEvent::UserTyping { .. } => "user_typing",
            ServerEvent::UserStoppedTyping { .. } => "user_stopped_typing",
            ServerEvent::BidPlaced { .. } => "bid_placed",
            ServerEvent::AuctionActivated { .. } => "auction_activated",
            ServerEvent::AuctionSettled { .. } => "auction_settled",
            ServerEvent::AuctionCancelled { .. } => "auction_cancelled",
            ServerEvent::AuctionExtended { .. } => "auction_extended",
            ServerEvent::CountdownUpdated { .. } => "countdown_updated",
            ServerEvent::CountdownDeleted { .. } => "countdown_deleted",
            ServerEvent::Notification { .. } => "notification",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong => "pong",
        }
    }
}

/// Events a connected client may send.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinConversation {
        conversation_id: i64,
    },
    LeaveConversation {
        conversation_id: i64,
    },
    JoinAuction {
        auction_id: i64,
    },
    LeaveAuction {
        auction_id: i64,
    },
    SendMessage {
        request_id: String,
        body: String,
        #[serde(default)]
        conversation_id: Option<i64>,
        #[serde(default)]
        message_type: MessageType,
    },
    Typing {
        conversation_id: i64,
    },
    StoppedTyping {
        conversation_id: i64,
    },
    MarkDelivered {
        conversation_id: i64,
        up_to_message_id: i64,
    },
    Ping,
}

#[derive(Debug)]
struct Connection {
    sender: mpsc::Sender<Frame>,
    rooms: HashSet<Room>,
}

impl Connection {
    /// Never waits on a slow reader; a full buffer drops the frame.
    fn offer(&self, id: ConnectionId, frame: Frame, event: &ServerEvent) -> bool {
        match self.sender.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("⚠️ Connection {} is not keeping up, dropping {}", id, event.name());
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Dropping {} for closed connection {}", event.name(), id);
                false
            }
        }
    }
}

#[derive(Debug, Default)]
struct HubState {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<Room, HashSet<ConnectionId>>,
}

#[derive(Debug)]
pub struct BroadcastHub {
    next_id: AtomicU64,
    buffer: usize,
    state: RwLock<HubState>,
}

fn encode(event: &ServerEvent) -> Option<Frame> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            tracing::warn!("Failed to encode {} event: {}", event.name(), e);
            None
        }
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::with_buffer(OUTBOUND_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            buffer: buffer.max(1),
            state: RwLock::new(HubState::default()),
        }
    }

    /// Registers a connection and hands back the receiving end its writer drains.
    pub async fn register(&self) -> (ConnectionId, mpsc::Receiver<Frame>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = mpsc::channel(self.buffer);

        let mut state = self.state.write().await;
        state.connections.insert(
            id,
            Connection {
                sender,
                rooms: HashSet::new(),
            },
        );
        tracing::debug!("🔌 Connection {} registered ({} live)", id, state.connections.len());

        (id, receiver)
    }

    /// Drops the connection from every room it had joined.
    pub async fn unregister(&self, connection: ConnectionId) {
        let mut state = self.state.write().await;
        let Some(conn) = state.connections.remove(&connection) else {
            return;
        };

        for room in conn.rooms {
            if let Some(members) = state.rooms.get_mut(&room) {
                members.remove(&connection);
                if members.is_empty() {
                    state.rooms.remove(&room);
                }
            }
        }
        tracing::debug!("🔌 Connection {} unregistered ({} live)", connection, state.connections.len());
    }

    pub async fn join(&self, connection: ConnectionId, room: Room) -> bool {
        let mut state = self.state.write().await;
        let Some(conn) = state.connections.get_mut(&connection) else {
            return false;
        };

        conn.rooms.insert(room.clone());
        tracing::debug!("Connection {} joined {}", connection, room);
        state.rooms.entry(room).or_default().insert(connection);
        true
    }

    pub async fn leave(&self, connection: ConnectionId, room: &Room) {
        let mut state = self.state.write().await;
        if let Some(conn) = state.connections.get_mut(&connection) {
            conn.rooms.remove(room);
        }
        if let Some(members) = state.rooms.get_mut(room) {
            members.remove(&connection);
            if members.is_empty() {
                state.rooms.remove(room);
            }
        }
    }

    pub async fn is_member(&self, connection: ConnectionId, room: &Room) -> bool {
        let state = self.state.read().await;
        state
            .rooms
            .get(room)
            .map_or(false, |members| members.contains(&connection))
    }

    /// Sends to every member of `room`. Returns how many connections took the frame.
    pub async fn broadcast(&self, room: &Room, event: &ServerEvent) -> usize {
        self.broadcast_except(room, event, None).await
    }

    pub async fn broadcast_except(
        &self,
        room: &Room,
        event: &ServerEvent,
        skip: Option<ConnectionId>,
    ) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };

        let state = self.state.read().await;
        let Some(members) = state.rooms.get(room) else {
            return 0;
        };

        let mut delivered = 0;
        for id in members.iter().filter(|id| Some(**id) != skip) {
            if let Some(conn) = state.connections.get(id) {
                if conn.offer(*id, frame.clone(), event) {
                    delivered += 1;
                }
            }
        }

        tracing::debug!("📣 {} -> {} ({} delivered)", event.name(), room, delivered);
        delivered
    }

    /// Sends to every live connection regardless of room membership.
    pub async fn broadcast_all(&self, event: &ServerEvent) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };

        let state = self.state.read().await;
        let delivered = state
            .connections
            .iter()
            .filter(|(id, conn)| conn.offer(**id, frame.clone(), event))
            .count();

        tracing::debug!("📣 {} -> all ({} delivered)", event.name(), delivered);
        delivered
    }

    pub async fn send_to(&self, connection: ConnectionId, event: &ServerEvent) -> bool {
        let Some(frame) = encode(event) else {
            return false;
        };

        let state = self.state.read().await;
        state
            .connections
            .get(&connection)
            .map_or(false, |conn| conn.offer(connection, frame, event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooms_render_their_wire_names() {
        let user = Uuid::nil();
        assert_eq!(Room::Conversation(42).to_string(), "conversation_42");
        assert_eq!(Room::Admin.to_string(), "admin_room");
        assert_eq!(Room::User(user).to_string(), format!("user_{}", user));
        assert_eq!(Room::Auction(7).to_string(), "auction_7");
    }

    #[test]
    fn events_use_the_event_data_envelope() {
        let json = serde_json::to_value(ServerEvent::MessagesSeen {
            conversation_id: 3,
            message_ids: vec![10, 11],
        })
        .unwrap();
        assert_eq!(json["event"], "messages_seen");
        assert_eq!(json["data"]["conversation_id"], 3);
        assert_eq!(json["data"]["message_ids"], serde_json::json!([10, 11]));

        let pong = serde_json::to_value(ServerEvent::Pong).unwrap();
        assert_eq!(pong["event"], "pong");
    }

    #[test]
    fn client_frames_parse_into_events() {
        let send: ClientEvent = serde_json::from_str(
            r#"{"event":"send_message","data":{"request_id":"r1","body":"hello"}}"#,
        )
        .unwrap();
        assert_eq!(
            send,
            ClientEvent::SendMessage {
                request_id: "r1".to_string(),
                body: "hello".to_string(),
                conversation_id: None,
                message_type: MessageType::Text,
            }
        );

        let ping: ClientEvent = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(ping, ClientEvent::Ping);

        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"drop_tables"}"#).is_err());
    }

    #[tokio::test]
    async fn broadcast_reaches_only_room_members() {
        let hub = BroadcastHub::new();
        let (a, mut rx_a) = hub.register().await;
        let (_b, mut rx_b) = hub.register().await;

        assert!(hub.join(a, Room::Conversation(1)).await);
        let delivered = hub
            .broadcast(&Room::Conversation(1), &ServerEvent::CountdownDeleted { countdown_id: 5 })
            .await;

        assert_eq!(delivered, 1);
        let frame = rx_a.try_recv().unwrap();
        assert!(frame.contains("countdown_deleted"));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_rooms_are_a_silent_no_op() {
        let hub = BroadcastHub::new();
        let delivered = hub.broadcast(&Room::Admin, &ServerEvent::Pong).await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn broadcast_except_skips_the_origin() {
        let hub = BroadcastHub::new();
        let (a, mut rx_a) = hub.register().await;
        let (b, mut rx_b) = hub.register().await;
        hub.join(a, Room::Conversation(9)).await;
        hub.join(b, Room::Conversation(9)).await;

        let event = ServerEvent::UserTyping {
            conversation_id: 9,
            sender_type: SenderType::User,
            sender_name: "Visitor".to_string(),
        };
        assert_eq!(hub.broadcast_except(&Room::Conversation(9), &event, Some(a)).await, 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unregister_removes_every_membership() {
        let hub = BroadcastHub::new();
        let (a, _rx) = hub.register().await;
        hub.join(a, Room::Admin).await;
        hub.join(a, Room::Auction(2)).await;

        hub.unregister(a).await;

        assert!(!hub.is_member(a, &Room::Admin).await);
        assert!(!hub.is_member(a, &Room::Auction(2)).await);
        assert!(!hub.send_to(a, &ServerEvent::Pong).await);
        assert!(!hub.join(a, Room::Admin).await);
    }

    #[tokio::test]
    async fn broadcast_all_ignores_rooms_and_leave_works() {
        let hub = BroadcastHub::new();
        let (a, mut rx_a) = hub.register().await;
        let (_b, mut rx_b) = hub.register().await;

        hub.join(a, Room::Auction(1)).await;
        hub.leave(a, &Room::Auction(1)).await;
        assert!(!hub.is_member(a, &Room::Auction(1)).await);

        assert_eq!(hub.broadcast_all(&ServerEvent::CountdownDeleted { countdown_id: 1 }).await, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn slow_readers_lose_frames_without_blocking_others() {
        let hub = BroadcastHub::with_buffer(2);
        let (slow, mut rx_slow) = hub.register().await;
        let (fast, mut rx_fast) = hub.register().await;
        hub.join(slow, Room::Admin).await;
        hub.join(fast, Room::Admin).await;

        for countdown_id in 1..=3 {
            let event = ServerEvent::CountdownDeleted { countdown_id };
            hub.broadcast(&Room::Admin, &event).await;
            assert!(rx_fast.try_recv().is_ok());
        }

        assert!(rx_slow.try_recv().unwrap().contains("\"countdown_id\":1"));
        assert!(rx_slow.try_recv().unwrap().contains("\"countdown_id\":2"));
        assert!(rx_slow.try_recv().is_err());

        assert!(hub.send_to(slow, &ServerEvent::Pong).await);
        assert!(rx_slow.try_recv().unwrap().contains("pong"));
    }
}
