use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::conversationmodel::*;

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct SendMessageDto {
    #[validate(length(min = 1, max = 5000, message = "Message must be between 1 and 5000 characters"))]
    pub body: String,

    #[serde(default)]
    pub message_type: MessageType,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct AdminReplyDto {
    #[validate(length(min = 1, max = 5000, message = "Message must be between 1 and 5000 characters"))]
    pub body: String,
}

#[derive(Debug, Default, Deserialize, Serialize, Validate)]
pub struct MarkSeenDto {
    #[validate(range(min = 1, message = "Message id must be positive"))]
    pub up_to_message_id: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConversationQueryDto {
    pub status: Option<ConversationStatus>,
    pub chat_mode: Option<ChatMode>,

    #[validate(length(max = 100, message = "Search term cannot exceed 100 characters"))]
    pub search: Option<String>,

    #[validate(range(min = 1))]
    pub page: Option<u32>,

    #[validate(range(min = 1, max = 100))]
    pub page_size: Option<u32>,
}

impl ConversationQueryDto {
    pub fn filter(&self) -> ConversationFilter {
        ConversationFilter {
            status: self.status,
            chat_mode: self.chat_mode,
            search: self.search.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VisitorSendResponseDto {
    pub conversation: Conversation,
    pub message: Message,
    pub created: bool,
    pub reopened: bool,
}

impl From<VisitorSendOutcome> for VisitorSendResponseDto {
    fn from(outcome: VisitorSendOutcome) -> Self {
        Self {
            conversation: outcome.conversation,
            message: outcome.message,
            created: outcome.created,
            reopened: outcome.reopened,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AdminReplyResponseDto {
    pub conversation: Conversation,
    pub message: Message,
    pub reopened: bool,
}

impl From<AdminReplyOutcome> for AdminReplyResponseDto {
    fn from(outcome: AdminReplyOutcome) -> Self {
        Self {
            conversation: outcome.conversation,
            message: outcome.message,
            reopened: outcome.reopened,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_body_length_is_enforced() {
        let ok = SendMessageDto { body: "hello".to_string(), message_type: MessageType::Text };
        assert!(ok.validate().is_ok());

        let empty = AdminReplyDto { body: String::new() };
        assert!(empty.validate().is_err());

        let long = AdminReplyDto { body: "x".repeat(5001) };
        assert!(long.validate().is_err());
    }

    #[test]
    fn message_type_defaults_to_text() {
        let dto: SendMessageDto = serde_json::from_str(r#"{"body":"hi"}"#).unwrap();
        assert_eq!(dto.message_type, MessageType::Text);

        let dto: SendMessageDto =
            serde_json::from_str(r#"{"body":"hi","message_type":"offline"}"#).unwrap();
        assert_eq!(dto.message_type, MessageType::Offline);
    }

    #[test]
    fn mark_seen_accepts_an_empty_body() {
        let dto: MarkSeenDto = serde_json::from_str("{}").unwrap();
        assert_eq!(dto.up_to_message_id, None);
        assert!(dto.validate().is_ok());
        assert!(MarkSeenDto { up_to_message_id: Some(0) }.validate().is_err());
    }
}
