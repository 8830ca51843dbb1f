// models/conversationmodel.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "conversation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Closed,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "chat_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    Chatbot,
    LiveChat,
    OfflineMessage,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "sender_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    User,
    Admin,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Default)]
#[sqlx(type_name = "message_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Offline,
}

/// Delivery state of a message. Only ever moves forward:
/// `sent -> delivered -> seen`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "delivery_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Seen,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Conversation {
    pub id: i64,
    pub user_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub status: ConversationStatus,
    pub chat_mode: ChatMode,
    pub admin_id: Option<Uuid>,
    pub last_message_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_open(&self) -> bool {
        self.status == ConversationStatus::Open
    }

    pub fn visitor_key(&self) -> Option<VisitorKey> {
        match (self.user_id, &self.session_id) {
            (Some(id), None) => Some(VisitorKey::User(id)),
            (None, Some(sid)) => Some(VisitorKey::Session(sid.clone())),
            _ => None,
        }
    }

    pub fn belongs_to(&self, visitor: &VisitorKey) -> bool {
        match visitor {
            VisitorKey::User(id) => self.user_id == Some(*id),
            VisitorKey::Session(sid) => self.session_id.as_deref() == Some(sid.as_str()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_type: SenderType,
    pub sender_id: Option<Uuid>,
    pub sender_name: String,
    pub body: String,
    pub message_type: MessageType,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub seen_at: Option<DateTime<Utc>>,
}

/// Conversation row plus read-time projections over the message ledger.
#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct ConversationSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub conversation: Conversation,
    pub visitor_name: Option<String>,
    pub unread_count: i64,
    pub last_message: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ConversationWithMessages {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

/// The visitor side of a conversation. Exactly one of these identifies a thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VisitorKey {
    User(Uuid),
    Session(String),
}

impl VisitorKey {
    /// Key used for the transaction-scoped advisory lock serialising
    /// find-or-create for a single visitor.
    pub fn lock_key(&self) -> String {
        match self {
            VisitorKey::User(id) => format!("visitor:user:{}", id),
            VisitorKey::Session(sid) => format!("visitor:session:{}", sid),
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            VisitorKey::User(id) => Some(*id),
            VisitorKey::Session(_) => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            VisitorKey::User(_) => None,
            VisitorKey::Session(sid) => Some(sid),
        }
    }
}

/// Where an inbound visitor message lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitorRouting {
    Append(i64),
    Reopen(i64),
    Create,
}

impl VisitorRouting {
    pub fn decide(open: Option<&Conversation>, latest_closed: Option<&Conversation>) -> Self {
        match (open, latest_closed) {
            (Some(conversation), _) => VisitorRouting::Append(conversation.id),
            (None, Some(conversation)) => VisitorRouting::Reopen(conversation.id),
            (None, None) => VisitorRouting::Create,
        }
    }
}

/// Everything needed to append one message, independent of which side sent it.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_type: SenderType,
    pub sender_id: Option<Uuid>,
    pub sender_name: String,
    pub body: String,
    pub message_type: MessageType,
}

impl NewMessage {
    /// Mode a visitor message moves its conversation into, if any.
    pub fn visitor_mode_change(&self) -> Option<ChatMode> {
        match self.message_type {
            MessageType::Offline => Some(ChatMode::OfflineMessage),
            MessageType::Text => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VisitorSendOutcome {
    pub conversation: Conversation,
    pub message: Message,
    pub created: bool,
    pub reopened: bool,
}

#[derive(Debug, Clone)]
pub struct AdminReplyOutcome {
    pub conversation: Conversation,
    pub message: Message,
    pub reopened: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkSeenTarget {
    UpTo(i64),
    AllFromVisitor,
}

#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    pub status: Option<ConversationStatus>,
    pub chat_mode: Option<ChatMode>,
    pub search: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(id: i64, status: ConversationStatus) -> Conversation {
        let now = Utc::now();
        Conversation {
            id,
            user_id: None,
            session_id: Some("s1".to_string()),
            status,
            chat_mode: ChatMode::Chatbot,
            admin_id: None,
            last_message_at: now,
            last_activity_at: now,
            closed_at: None,
            created_at: now,
        }
    }

    #[test]
    fn first_message_creates_a_conversation() {
        assert_eq!(VisitorRouting::decide(None, None), VisitorRouting::Create);
    }

    #[test]
    fn follow_up_message_reuses_the_open_conversation() {
        let open = conversation(7, ConversationStatus::Open);
        let closed = conversation(3, ConversationStatus::Closed);
        assert_eq!(VisitorRouting::decide(Some(&open), None), VisitorRouting::Append(7));
        assert_eq!(VisitorRouting::decide(Some(&open), Some(&closed)), VisitorRouting::Append(7));
    }

    #[test]
    fn message_after_close_reopens_the_same_conversation() {
        let closed = conversation(3, ConversationStatus::Closed);
        assert_eq!(VisitorRouting::decide(None, Some(&closed)), VisitorRouting::Reopen(3));
    }

    #[test]
    fn ownership_matches_on_the_identifying_side_only() {
        let conv = conversation(1, ConversationStatus::Open);
        assert!(conv.belongs_to(&VisitorKey::Session("s1".to_string())));
        assert!(!conv.belongs_to(&VisitorKey::Session("s2".to_string())));
        assert!(!conv.belongs_to(&VisitorKey::User(Uuid::new_v4())));
    }

    #[test]
    fn lock_keys_do_not_collide_across_identity_kinds() {
        let id = Uuid::new_v4();
        let as_user = VisitorKey::User(id).lock_key();
        let as_session = VisitorKey::Session(id.to_string()).lock_key();
        assert_ne!(as_user, as_session);
    }

    #[test]
    fn offline_messages_switch_the_chat_mode() {
        let mut msg = NewMessage {
            sender_type: SenderType::User,
            sender_id: None,
            sender_name: "Visitor".to_string(),
            body: "are you there?".to_string(),
            message_type: MessageType::Offline,
        };
        assert_eq!(msg.visitor_mode_change(), Some(ChatMode::OfflineMessage));
        msg.message_type = MessageType::Text;
        assert_eq!(msg.visitor_mode_change(), None);
    }
}
