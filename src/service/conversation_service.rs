// service/conversation_service.rs
use std::sync::Arc;

use uuid::Uuid;

use crate::{
    db::{
        conversationdb::{ConversationExt, ConversationWrite},
        db::{is_unique_violation, DBClient},
    },
    middleware::Actor,
    models::conversationmodel::*,
    service::{
        error::ServiceError,
        notification_service::NotificationService,
        realtime_hub::{BroadcastHub, Room, ServerEvent},
    },
};

pub const MAX_MESSAGE_CHARS: usize = 5000;

/// Trims a message body and enforces the 1..=5000 character bound.
pub fn normalize_body(body: &str) -> Result<String, ServiceError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::Validation("Message cannot be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ServiceError::Validation(format!(
            "Message cannot exceed {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(trimmed.to_string())
}

fn visitor_key_of(actor: &Actor) -> Result<VisitorKey, ServiceError> {
    actor.visitor_key().ok_or_else(|| {
        ServiceError::Forbidden("Admins reply through the admin conversation endpoints".to_string())
    })
}

/// The side whose messages `actor` receives, i.e. whose messages it can
/// acknowledge as delivered.
pub fn counterpart_of(actor: &Actor) -> SenderType {
    if actor.is_admin() {
        SenderType::User
    } else {
        SenderType::Admin
    }
}

#[derive(Debug, Clone)]
pub struct ConversationService {
    db_client: Arc<DBClient>,
    hub: Arc<BroadcastHub>,
    notification_service: Arc<NotificationService>,
}

impl ConversationService {
    pub fn new(
        db_client: Arc<DBClient>,
        hub: Arc<BroadcastHub>,
        notification_service: Arc<NotificationService>,
    ) -> Self {
        Self {
            db_client,
            hub,
            notification_service,
        }
    }

    pub async fn send_visitor_message(
        &self,
        actor: &Actor,
        body: &str,
        message_type: MessageType,
    ) -> Result<VisitorSendOutcome, ServiceError> {
        let visitor = visitor_key_of(actor)?;
        let new_message = NewMessage {
            sender_type: SenderType::User,
            sender_id: actor.user_id(),
            sender_name: actor.display_name().to_string(),
            body: normalize_body(body)?,
            message_type,
        };

        let outcome = match self
            .db_client
            .append_visitor_message(&visitor, new_message.clone())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) if is_unique_violation(&e) => {
                // A concurrent send won the race to open the conversation.
                tracing::warn!("Open conversation race for {}; retrying once", visitor.lock_key());
                self.db_client
                    .append_visitor_message(&visitor, new_message)
                    .await?
            }
            Err(e) => return Err(e.into()),
        };

        let conversation_id = outcome.conversation.id;
        if outcome.created {
            tracing::info!("💬 Conversation {} created for {}", conversation_id, visitor.lock_key());
        } else if outcome.reopened {
            tracing::info!("💬 Conversation {} reopened by visitor message", conversation_id);
        }
        tracing::debug!("Message {} appended to conversation {}", outcome.message.id, conversation_id);

        let event = ServerEvent::NewMessage {
            conversation_id,
            message: outcome.message.clone(),
        };
        self.hub.broadcast(&Room::Admin, &event).await;
        self.hub.broadcast(&Room::Conversation(conversation_id), &event).await;

        if outcome.reopened {
            let reopened = ServerEvent::ConversationReopened {
                conversation: outcome.conversation.clone(),
            };
            self.hub.broadcast(&Room::Admin, &reopened).await;
            self.hub.broadcast(&Room::Conversation(conversation_id), &reopened).await;
        }

        Ok(outcome)
    }

    pub async fn send_admin_reply(
        &self,
        admin_id: Uuid,
        admin_name: &str,
        conversation_id: i64,
        body: &str,
    ) -> Result<AdminReplyOutcome, ServiceError> {
        let new_message = NewMessage {
            sender_type: SenderType::Admin,
            sender_id: Some(admin_id),
            sender_name: admin_name.to_string(),
            body: normalize_body(body)?,
            message_type: MessageType::Text,
        };

        let outcome = match self
            .db_client
            .append_admin_reply(conversation_id, admin_id, new_message)
            .await?
        {
            ConversationWrite::Done(outcome) => outcome,
            ConversationWrite::NotFound => {
                return Err(ServiceError::ConversationNotFound(conversation_id))
            }
            ConversationWrite::VisitorHasOpen(other) => {
                return Err(ServiceError::Conflict(format!(
                    "The visitor already has an open conversation ({})",
                    other
                )))
            }
        };

        tracing::info!(
            "💬 Admin {} replied in conversation {}{}",
            admin_id,
            conversation_id,
            if outcome.reopened { " (reopened)" } else { "" }
        );

        let event = ServerEvent::NewMessage {
            conversation_id,
            message: outcome.message.clone(),
        };
        self.hub.broadcast(&Room::Conversation(conversation_id), &event).await;
        self.hub.broadcast(&Room::Admin, &event).await;

        if outcome.reopened {
            let reopened = ServerEvent::ConversationReopened {
                conversation: outcome.conversation.clone(),
            };
            self.hub.broadcast(&Room::Conversation(conversation_id), &reopened).await;
            self.hub.broadcast(&Room::Admin, &reopened).await;
        }

        if let Some(user_id) = outcome.conversation.user_id {
            self.hub.broadcast(&Room::User(user_id), &event).await;
            self.notification_service
                .notify_support_reply(user_id, &outcome.conversation, admin_name)
                .await;
        }

        Ok(outcome)
    }

    pub async fn close_conversation(
        &self,
        admin_id: Uuid,
        conversation_id: i64,
    ) -> Result<Conversation, ServiceError> {
        let (conversation, changed) = self
            .db_client
            .close_conversation(conversation_id)
            .await?
            .ok_or(ServiceError::ConversationNotFound(conversation_id))?;

        if changed {
            tracing::info!("🔒 Conversation {} closed by {}", conversation_id, admin_id);
            let event = ServerEvent::ConversationClosed {
                conversation: conversation.clone(),
            };
            self.hub.broadcast(&Room::Conversation(conversation_id), &event).await;
            self.hub.broadcast(&Room::Admin, &event).await;
        } else {
            tracing::debug!("Conversation {} was already closed", conversation_id);
        }

        Ok(conversation)
    }

    pub async fn reopen_conversation(
        &self,
        admin_id: Uuid,
        conversation_id: i64,
    ) -> Result<Conversation, ServiceError> {
        let conversation = match self
            .db_client
            .reopen_conversation(conversation_id, admin_id)
            .await?
        {
            ConversationWrite::Done(conversation) => conversation,
            ConversationWrite::NotFound => {
                return Err(ServiceError::ConversationNotFound(conversation_id))
            }
            ConversationWrite::VisitorHasOpen(other) => {
                return Err(ServiceError::Conflict(format!(
                    "The visitor already has an open conversation ({})",
                    other
                )))
            }
        };

        tracing::info!("🔓 Conversation {} reopened by {}", conversation_id, admin_id);

        let event = ServerEvent::ConversationReopened {
            conversation: conversation.clone(),
        };
        self.hub.broadcast(&Room::Conversation(conversation_id), &event).await;
        self.hub.broadcast(&Room::Admin, &event).await;

        Ok(conversation)
    }

    pub async fn mark_seen(
        &self,
        conversation_id: i64,
        up_to_message_id: Option<i64>,
    ) -> Result<Vec<i64>, ServiceError> {
        self.require_conversation(conversation_id).await?;

        let target = match up_to_message_id {
            Some(id) => MarkSeenTarget::UpTo(id),
            None => MarkSeenTarget::AllFromVisitor,
        };
        let message_ids = self.db_client.mark_seen(conversation_id, target).await?;

        if !message_ids.is_empty() {
            tracing::debug!("{} messages seen in conversation {}", message_ids.len(), conversation_id);
            let event = ServerEvent::MessagesSeen {
                conversation_id,
                message_ids: message_ids.clone(),
            };
            self.hub.broadcast(&Room::Conversation(conversation_id), &event).await;
            self.hub.broadcast(&Room::Admin, &event).await;
        }

        Ok(message_ids)
    }

    /// Acknowledges delivery of the counterpart's messages up to `up_to_message_id`.
    pub async fn mark_delivered(
        &self,
        actor: &Actor,
        conversation_id: i64,
        up_to_message_id: i64,
    ) -> Result<Vec<i64>, ServiceError> {
        self.authorize(actor, conversation_id).await?;

        let message_ids = self
            .db_client
            .mark_delivered(conversation_id, counterpart_of(actor), up_to_message_id)
            .await?;

        if !message_ids.is_empty() {
            let event = ServerEvent::MessagesDelivered {
                conversation_id,
                message_ids: message_ids.clone(),
            };
            self.hub.broadcast(&Room::Conversation(conversation_id), &event).await;
        }

        Ok(message_ids)
    }

    pub async fn request_live_chat(&self, actor: &Actor) -> Result<Conversation, ServiceError> {
        let visitor = visitor_key_of(actor)?;

        let conversation = self
            .db_client
            .find_visitor_conversation(&visitor)
            .await?
            .filter(Conversation::is_open)
            .ok_or_else(|| {
                ServiceError::Validation("Send a message before requesting a live agent".to_string())
            })?;

        if conversation.chat_mode == ChatMode::LiveChat {
            return Ok(conversation);
        }

        let conversation = self
            .db_client
            .update_chat_mode(conversation.id, ChatMode::LiveChat)
            .await?
            .ok_or(ServiceError::ConversationNotFound(conversation.id))?;

        tracing::info!("🙋 Live chat requested in conversation {}", conversation.id);

        self.hub
            .broadcast(
                &Room::Admin,
                &ServerEvent::LiveChatRequested {
                    conversation: conversation.clone(),
                },
            )
            .await;

        Ok(conversation)
    }

    pub async fn get_visitor_conversation(
        &self,
        actor: &Actor,
    ) -> Result<Option<ConversationWithMessages>, ServiceError> {
        let visitor = visitor_key_of(actor)?;

        let Some(conversation) = self.db_client.find_visitor_conversation(&visitor).await? else {
            return Ok(None);
        };
        let messages = self.db_client.get_messages(conversation.id).await?;

        Ok(Some(ConversationWithMessages {
            conversation,
            messages,
        }))
    }

    /// Admin detail view. Opening a thread marks the visitor's messages seen.
    pub async fn get_conversation_for_admin(
        &self,
        conversation_id: i64,
    ) -> Result<ConversationWithMessages, ServiceError> {
        self.mark_seen(conversation_id, None).await?;

        let conversation = self.require_conversation(conversation_id).await?;
        let messages = self.db_client.get_messages(conversation_id).await?;

        Ok(ConversationWithMessages {
            conversation,
            messages,
        })
    }

    pub async fn list_conversations(
        &self,
        filter: &ConversationFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ConversationSummary>, i64), ServiceError> {
        Ok(self.db_client.list_conversations(filter, limit, offset).await?)
    }

    /// Loads a conversation the actor is allowed to see.
    pub async fn authorize(
        &self,
        actor: &Actor,
        conversation_id: i64,
    ) -> Result<Conversation, ServiceError> {
        let conversation = self.require_conversation(conversation_id).await?;
        if !actor.can_access_conversation(&conversation) {
            return Err(ServiceError::Forbidden(
                "You do not have access to this conversation".to_string(),
            ));
        }
        Ok(conversation)
    }

    /// Visitor's currently open conversation, used to auto-join on connect.
    pub async fn open_conversation_for(&self, actor: &Actor) -> Result<Option<Conversation>, ServiceError> {
        let Some(visitor) = actor.visitor_key() else {
            return Ok(None);
        };
        Ok(self
            .db_client
            .find_visitor_conversation(&visitor)
            .await?
            .filter(Conversation::is_open))
    }

    async fn require_conversation(&self, conversation_id: i64) -> Result<Conversation, ServiceError> {
        self.db_client
            .get_conversation(conversation_id)
            .await?
            .ok_or(ServiceError::ConversationNotFound(conversation_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bodies_are_trimmed_and_bounded() {
        assert_eq!(normalize_body("  hello \n").unwrap(), "hello");
        assert!(matches!(normalize_body("   "), Err(ServiceError::Validation(_))));
        assert!(normalize_body(&"a".repeat(MAX_MESSAGE_CHARS)).is_ok());
        assert!(normalize_body(&"a".repeat(MAX_MESSAGE_CHARS + 1)).is_err());
        // Multi-byte characters count once each.
        assert!(normalize_body(&"é".repeat(MAX_MESSAGE_CHARS)).is_ok());
    }

    #[test]
    fn admins_cannot_use_the_visitor_send_path() {
        let admin = Actor::Admin {
            id: Uuid::new_v4(),
            name: "Grace".to_string(),
            permissions: vec![],
        };
        assert!(matches!(visitor_key_of(&admin), Err(ServiceError::Forbidden(_))));

        let visitor = Actor::Visitor { session_id: "s1".to_string() };
        assert_eq!(visitor_key_of(&visitor).unwrap(), VisitorKey::Session("s1".to_string()));
    }

    #[test]
    fn delivery_acks_target_the_other_side() {
        let admin = Actor::Admin {
            id: Uuid::new_v4(),
            name: "Grace".to_string(),
            permissions: vec![],
        };
        let user = Actor::User { id: Uuid::new_v4(), name: "Ada".to_string() };
        assert_eq!(counterpart_of(&admin), SenderType::User);
        assert_eq!(counterpart_of(&user), SenderType::Admin);
    }
}
