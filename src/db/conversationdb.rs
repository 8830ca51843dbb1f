// db/conversationdb.rs
use async_trait::async_trait;
use sqlx::{Error, PgConnection};
use uuid::Uuid;

use super::db::DBClient;
use crate::models::conversationmodel::*;

/// Result of a write that may be blocked by the one-open-conversation rule.
#[derive(Debug)]
pub enum ConversationWrite<T> {
    Done(T),
    NotFound,
    /// The visitor already has a different open conversation.
    VisitorHasOpen(i64),
}

#[async_trait]
pub trait ConversationExt {
    async fn append_visitor_message(
        &self,
        visitor: &VisitorKey,
        message: NewMessage,
    ) -> Result<VisitorSendOutcome, Error>;

    async fn append_admin_reply(
        &self,
        conversation_id: i64,
        admin_id: Uuid,
        message: NewMessage,
    ) -> Result<ConversationWrite<AdminReplyOutcome>, Error>;

    async fn get_conversation(
        &self,
        conversation_id: i64,
    ) -> Result<Option<Conversation>, Error>;

    async fn find_visitor_conversation(
        &self,
        visitor: &VisitorKey,
    ) -> Result<Option<Conversation>, Error>;

    async fn list_conversations(
        &self,
        filter: &ConversationFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ConversationSummary>, i64), Error>;

    async fn close_conversation(
        &self,
        conversation_id: i64,
    ) -> Result<Option<(Conversation, bool)>, Error>;

    async fn reopen_conversation(
        &self,
        conversation_id: i64,
        admin_id: Uuid,
    ) -> Result<ConversationWrite<Conversation>, Error>;

    async fn update_chat_mode(
        &self,
        conversation_id: i64,
        chat_mode: ChatMode,
    ) -> Result<Option<Conversation>, Error>;

    // Message ledger
    async fn get_messages(
        &self,
        conversation_id: i64,
    ) -> Result<Vec<Message>, Error>;

    async fn mark_seen(
        &self,
        conversation_id: i64,
        target: MarkSeenTarget,
    ) -> Result<Vec<i64>, Error>;

    async fn mark_delivered(
        &self,
        conversation_id: i64,
        sent_by: SenderType,
        up_to_message_id: i64,
    ) -> Result<Vec<i64>, Error>;
}

async fn lock_visitor(conn: &mut PgConnection, visitor: &VisitorKey) -> Result<(), Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(visitor.lock_key())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn other_open_conversation(
    conn: &mut PgConnection,
    visitor: &VisitorKey,
    exclude_id: i64,
) -> Result<Option<i64>, Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id FROM conversations
        WHERE status = 'open'
          AND user_id IS NOT DISTINCT FROM $1
          AND session_id IS NOT DISTINCT FROM $2
          AND id <> $3
        LIMIT 1
        "#
    )
    .bind(visitor.user_id())
    .bind(visitor.session_id())
    .bind(exclude_id)
    .fetch_optional(&mut *conn)
    .await
}

async fn insert_message(
    conn: &mut PgConnection,
    conversation_id: i64,
    message: NewMessage,
) -> Result<Message, Error> {
    sqlx::query_as::<_, Message>(
        r#"
        INSERT INTO messages (conversation_id, sender_type, sender_id, sender_name, body, message_type)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#
    )
    .bind(conversation_id)
    .bind(message.sender_type)
    .bind(message.sender_id)
    .bind(message.sender_name)
    .bind(message.body)
    .bind(message.message_type)
    .fetch_one(&mut *conn)
    .await
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[async_trait]
impl ConversationExt for DBClient {
    async fn append_visitor_message(
        &self,
        visitor: &VisitorKey,
        message: NewMessage,
    ) -> Result<VisitorSendOutcome, Error> {
        let mut tx = self.pool.begin().await?;

        // Serialises concurrent first messages from the same visitor.
        lock_visitor(&mut tx, visitor).await?;

        let open = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT * FROM conversations
            WHERE status = 'open'
              AND user_id IS NOT DISTINCT FROM $1
              AND session_id IS NOT DISTINCT FROM $2
            LIMIT 1
            FOR UPDATE
            "#
        )
        .bind(visitor.user_id())
        .bind(visitor.session_id())
        .fetch_optional(&mut *tx)
        .await?;

        let latest_closed = if open.is_none() {
            sqlx::query_as::<_, Conversation>(
                r#"
                SELECT * FROM conversations
                WHERE status = 'closed'
                  AND user_id IS NOT DISTINCT FROM $1
                  AND session_id IS NOT DISTINCT FROM $2
                ORDER BY last_activity_at DESC, id DESC
                LIMIT 1
                FOR UPDATE
                "#
            )
            .bind(visitor.user_id())
            .bind(visitor.session_id())
            .fetch_optional(&mut *tx)
            .await?
        } else {
            None
        };

        let mode_change = message.visitor_mode_change();
        let routing = VisitorRouting::decide(open.as_ref(), latest_closed.as_ref());

        let conversation_id = match routing {
            VisitorRouting::Append(id) => id,
            VisitorRouting::Reopen(id) => {
                sqlx::query(
                    r#"
                    UPDATE conversations
                    SET status = 'open', closed_at = NULL
                    WHERE id = $1
                    "#
                )
                .bind(id)
                .execute(&mut *tx)
                .await?;
                id
            }
            VisitorRouting::Create => {
                sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO conversations (user_id, session_id, status, chat_mode)
                    VALUES ($1, $2, 'open', $3)
                    RETURNING id
                    "#
                )
                .bind(visitor.user_id())
                .bind(visitor.session_id())
                .bind(mode_change.unwrap_or(ChatMode::Chatbot))
                .fetch_one(&mut *tx)
                .await?
            }
        };

        let message = insert_message(&mut tx, conversation_id, message).await?;

        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            UPDATE conversations
            SET last_message_at = NOW(),
                last_activity_at = NOW(),
                chat_mode = COALESCE($2, chat_mode)
            WHERE id = $1
            RETURNING *
            "#
        )
        .bind(conversation_id)
        .bind(mode_change)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(VisitorSendOutcome {
            conversation,
            message,
            created: routing == VisitorRouting::Create,
            reopened: matches!(routing, VisitorRouting::Reopen(_)),
        })
    }

    async fn append_admin_reply(
        &self,
        conversation_id: i64,
        admin_id: Uuid,
        message: NewMessage,
    ) -> Result<ConversationWrite<AdminReplyOutcome>, Error> {
        let Some(existing) = self.get_conversation(conversation_id).await? else {
            return Ok(ConversationWrite::NotFound);
        };

        let mut tx = self.pool.begin().await?;

        // Same lock order as the visitor path: visitor lock first, then the row.
        let visitor = existing.visitor_key();
        if let Some(visitor) = &visitor {
            lock_visitor(&mut tx, visitor).await?;
        }

        let current = sqlx::query_as::<_, Conversation>(
            "SELECT * FROM conversations WHERE id = $1 FOR UPDATE"
        )
        .bind(conversation_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            return Ok(ConversationWrite::NotFound);
        };

        let reopened = !current.is_open();
        if reopened {
            if let Some(visitor) = &visitor {
                if let Some(other) = other_open_conversation(&mut tx, visitor, conversation_id).await? {
                    return Ok(ConversationWrite::VisitorHasOpen(other));
                }
            }
        }

        let message = insert_message(&mut tx, conversation_id, message).await?;

        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            UPDATE conversations
            SET admin_id = $2,
                status = 'open',
                closed_at = NULL,
                chat_mode = 'live_chat',
                last_message_at = NOW(),
                last_activity_at = NOW()
            WHERE id = $1
            RETURNING *
            "#
        )
        .bind(conversation_id)
        .bind(admin_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ConversationWrite::Done(AdminReplyOutcome {
            conversation,
            message,
            reopened,
        }))
    }

    async fn get_conversation(
        &self,
        conversation_id: i64,
    ) -> Result<Option<Conversation>, Error> {
        sqlx::query_as::<_, Conversation>(
            r#"
            SELECT * FROM conversations
            WHERE id = $1
            "#
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_visitor_conversation(
        &self,
        visitor: &VisitorKey,
    ) -> Result<Option<Conversation>, Error> {
        sqlx::query_as::<_, Conversation>(
            r#"
            SELECT * FROM conversations
            WHERE user_id IS NOT DISTINCT FROM $1
              AND session_id IS NOT DISTINCT FROM $2
            ORDER BY (status = 'open') DESC, last_activity_at DESC, id DESC
            LIMIT 1
            "#
        )
        .bind(visitor.user_id())
        .bind(visitor.session_id())
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_conversations(
        &self,
        filter: &ConversationFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ConversationSummary>, i64), Error> {
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(like_pattern);

        let conversations = sqlx::query_as::<_, ConversationSummary>(
            r#"
            SELECT
                c.*,
                COALESCE(
                    u.name,
                    (SELECT m.sender_name FROM messages m
                     WHERE m.conversation_id = c.id AND m.sender_type = 'user'
                     ORDER BY m.created_at DESC, m.id DESC LIMIT 1)
                ) AS visitor_name,
                (SELECT COUNT(*) FROM messages m
                 WHERE m.conversation_id = c.id
                   AND m.sender_type = 'user'
                   AND m.status <> 'seen') AS unread_count,
                (SELECT m.body FROM messages m
                 WHERE m.conversation_id = c.id
                 ORDER BY m.created_at DESC, m.id DESC LIMIT 1) AS last_message
            FROM conversations c
            LEFT JOIN users u ON u.id = c.user_id
            WHERE ($1::conversation_status IS NULL OR c.status = $1)
              AND ($2::chat_mode IS NULL OR c.chat_mode = $2)
              AND ($3::text IS NULL
                   OR c.session_id ILIKE $3
                   OR u.name ILIKE $3
                   OR u.email ILIKE $3
                   OR EXISTS (SELECT 1 FROM messages m
                              WHERE m.conversation_id = c.id
                                AND (m.body ILIKE $3 OR m.sender_name ILIKE $3)))
            ORDER BY c.last_message_at DESC, c.id DESC
            LIMIT $4 OFFSET $5
            "#
        )
        .bind(filter.status)
        .bind(filter.chat_mode)
        .bind(search.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM conversations c
            LEFT JOIN users u ON u.id = c.user_id
            WHERE ($1::conversation_status IS NULL OR c.status = $1)
              AND ($2::chat_mode IS NULL OR c.chat_mode = $2)
              AND ($3::text IS NULL
                   OR c.session_id ILIKE $3
                   OR u.name ILIKE $3
                   OR u.email ILIKE $3
                   OR EXISTS (SELECT 1 FROM messages m
                              WHERE m.conversation_id = c.id
                                AND (m.body ILIKE $3 OR m.sender_name ILIKE $3)))
            "#
        )
        .bind(filter.status)
        .bind(filter.chat_mode)
        .bind(search.as_deref())
        .fetch_one(&self.pool)
        .await?;

        Ok((conversations, total))
    }

    async fn close_conversation(
        &self,
        conversation_id: i64,
    ) -> Result<Option<(Conversation, bool)>, Error> {
        let Some(existing) = self.get_conversation(conversation_id).await? else {
            return Ok(None);
        };

        let mut tx = self.pool.begin().await?;

        // Queues behind any in-flight visitor send, which may append or reopen.
        if let Some(visitor) = existing.visitor_key() {
            lock_visitor(&mut tx, &visitor).await?;
        }

        let current = sqlx::query_as::<_, Conversation>(
            "SELECT * FROM conversations WHERE id = $1 FOR UPDATE"
        )
        .bind(conversation_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            return Ok(None);
        };

        if !current.is_open() {
            return Ok(Some((current, false)));
        }

        let closed = sqlx::query_as::<_, Conversation>(
            r#"
            UPDATE conversations
            SET status = 'closed', closed_at = NOW(), last_activity_at = NOW()
            WHERE id = $1
            RETURNING *
            "#
        )
        .bind(conversation_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some((closed, true)))
    }

    async fn reopen_conversation(
        &self,
        conversation_id: i64,
        admin_id: Uuid,
    ) -> Result<ConversationWrite<Conversation>, Error> {
        let Some(existing) = self.get_conversation(conversation_id).await? else {
            return Ok(ConversationWrite::NotFound);
        };

        let mut tx = self.pool.begin().await?;

        if let Some(visitor) = existing.visitor_key() {
            lock_visitor(&mut tx, &visitor).await?;
            if let Some(other) = other_open_conversation(&mut tx, &visitor, conversation_id).await? {
                return Ok(ConversationWrite::VisitorHasOpen(other));
            }
        }

        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            UPDATE conversations
            SET status = 'open', closed_at = NULL, admin_id = $2, last_activity_at = NOW()
            WHERE id = $1
            RETURNING *
            "#
        )
        .bind(conversation_id)
        .bind(admin_id)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(match conversation {
            Some(conversation) => ConversationWrite::Done(conversation),
            None => ConversationWrite::NotFound,
        })
    }

    async fn update_chat_mode(
        &self,
        conversation_id: i64,
        chat_mode: ChatMode,
    ) -> Result<Option<Conversation>, Error> {
        sqlx::query_as::<_, Conversation>(
            r#"
            UPDATE conversations
            SET chat_mode = $2, last_activity_at = NOW()
            WHERE id = $1
            RETURNING *
            "#
        )
        .bind(conversation_id)
        .bind(chat_mode)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_messages(
        &self,
        conversation_id: i64,
    ) -> Result<Vec<Message>, Error> {
        sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC, id ASC
            "#
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn mark_seen(
        &self,
        conversation_id: i64,
        target: MarkSeenTarget,
    ) -> Result<Vec<i64>, Error> {
        let up_to = match target {
            MarkSeenTarget::UpTo(message_id) => Some(message_id),
            MarkSeenTarget::AllFromVisitor => None,
        };

        sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE messages
            SET status = 'seen', seen_at = NOW()
            WHERE conversation_id = $1
              AND sender_type = 'user'
              AND status <> 'seen'
              AND ($2::bigint IS NULL OR id <= $2)
            RETURNING id
            "#
        )
        .bind(conversation_id)
        .bind(up_to)
        .fetch_all(&self.pool)
        .await
    }

    async fn mark_delivered(
        &self,
        conversation_id: i64,
        sent_by: SenderType,
        up_to_message_id: i64,
    ) -> Result<Vec<i64>, Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE messages
            SET status = 'delivered'
            WHERE conversation_id = $1
              AND sender_type = $2
              AND status = 'sent'
              AND id <= $3
            RETURNING id
            "#
        )
        .bind(conversation_id)
        .bind(sent_by)
        .bind(up_to_message_id)
        .fetch_all(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, time::Duration};
    use sqlx::postgres::PgPoolOptions;

    #[test]
    fn search_terms_are_escaped_for_ilike() {
        assert_eq!(like_pattern("refund"), "%refund%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    async fn test_db() -> DBClient {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = PgPoolOptions::new().max_connections(10).connect(&url).await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        DBClient::new(pool)
    }

    fn fresh_session() -> VisitorKey {
        VisitorKey::Session(format!("s-{}", Uuid::new_v4().simple()))
    }

    fn visitor_text(body: &str) -> NewMessage {
        NewMessage {
            sender_type: SenderType::User,
            sender_id: None,
            sender_name: "Visitor".to_string(),
            body: body.to_string(),
            message_type: MessageType::Text,
        }
    }

    async fn open_count(db: &DBClient, visitor: &VisitorKey) -> i64 {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM conversations WHERE session_id = $1 AND status = 'open'"
        )
        .bind(visitor.session_id())
        .fetch_one(&db.pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
    async fn follow_up_messages_share_one_conversation() {
        let db = test_db().await;
        let visitor = fresh_session();

        let first = db.append_visitor_message(&visitor, visitor_text("hello")).await.unwrap();
        assert!(first.created);
        assert_eq!(first.conversation.status, ConversationStatus::Open);
        assert_eq!(first.conversation.session_id.as_deref(), visitor.session_id());

        let second = db
            .append_visitor_message(&visitor, visitor_text("anyone there?"))
            .await
            .unwrap();
        assert_eq!(second.conversation.id, first.conversation.id);
        assert!(!second.created);
        assert!(!second.reopened);

        let bodies: Vec<String> = db
            .get_messages(first.conversation.id)
            .await
            .unwrap()
            .into_iter()
            .map(|message| message.body)
            .collect();
        assert_eq!(bodies, vec!["hello", "anyone there?"]);
        assert_eq!(open_count(&db, &visitor).await, 1);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
    async fn message_after_close_reopens_the_same_conversation() {
        let db = test_db().await;
        let visitor = fresh_session();

        let first = db.append_visitor_message(&visitor, visitor_text("hello")).await.unwrap();
        let id = first.conversation.id;

        let (closed, changed) = db.close_conversation(id).await.unwrap().unwrap();
        assert!(changed);
        assert_eq!(closed.status, ConversationStatus::Closed);
        assert!(closed.closed_at.is_some());

        let (_, changed_again) = db.close_conversation(id).await.unwrap().unwrap();
        assert!(!changed_again);

        let back = db.append_visitor_message(&visitor, visitor_text("I'm back")).await.unwrap();
        assert_eq!(back.conversation.id, id);
        assert!(back.reopened);
        assert!(!back.created);
        assert_eq!(back.conversation.status, ConversationStatus::Open);
        assert!(back.conversation.closed_at.is_none());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
    async fn concurrent_first_messages_create_one_conversation() {
        let db = test_db().await;
        let visitor = fresh_session();

        let bodies: Vec<String> = (0..8).map(|i| format!("message {}", i)).collect();
        let sends = bodies
            .iter()
            .map(|body| db.append_visitor_message(&visitor, visitor_text(body)));
        let outcomes: Vec<VisitorSendOutcome> = futures::future::join_all(sends)
            .await
            .into_iter()
            .map(|outcome| outcome.unwrap())
            .collect();

        let id = outcomes[0].conversation.id;
        assert!(outcomes.iter().all(|outcome| outcome.conversation.id == id));
        assert_eq!(outcomes.iter().filter(|outcome| outcome.created).count(), 1);
        assert_eq!(open_count(&db, &visitor).await, 1);
        assert_eq!(db.get_messages(id).await.unwrap().len(), 8);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
    async fn close_waits_for_an_in_flight_visitor_send() {
        let db = Arc::new(test_db().await);
        let visitor = fresh_session();

        let first = db.append_visitor_message(&visitor, visitor_text("hello")).await.unwrap();
        let id = first.conversation.id;

        // Holds the next send at its message insert, after it has routed.
        let mut blocker = db.pool.begin().await.unwrap();
        sqlx::query("LOCK TABLE messages IN SHARE MODE")
            .execute(&mut *blocker)
            .await
            .unwrap();

        let send = tokio::spawn({
            let db = db.clone();
            let visitor = visitor.clone();
            async move {
                db.append_visitor_message(&visitor, visitor_text("anyone there?"))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(300)).await;

        let close = tokio::spawn({
            let db = db.clone();
            async move { db.close_conversation(id).await }
        });
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!close.is_finished(), "close must queue behind the visitor send");

        blocker.rollback().await.unwrap();

        let sent = send.await.unwrap().unwrap();
        assert_eq!(sent.conversation.id, id);
        assert!(!sent.reopened);
        assert_eq!(sent.conversation.status, ConversationStatus::Open);

        let (closed, changed) = close.await.unwrap().unwrap().unwrap();
        assert!(changed);
        assert_eq!(closed.status, ConversationStatus::Closed);

        // The close landed after the message, so the next send reopens.
        let next = db.append_visitor_message(&visitor, visitor_text("still here")).await.unwrap();
        assert_eq!(next.conversation.id, id);
        assert!(next.reopened);
        assert_eq!(db.get_messages(id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
    async fn seen_messages_never_regress_to_delivered() {
        let db = test_db().await;
        let visitor = fresh_session();

        let first = db.append_visitor_message(&visitor, visitor_text("one")).await.unwrap();
        let second = db.append_visitor_message(&visitor, visitor_text("two")).await.unwrap();
        let id = first.conversation.id;
        let (m1, m2) = (first.message.id, second.message.id);

        assert_eq!(db.mark_seen(id, MarkSeenTarget::UpTo(m1)).await.unwrap(), vec![m1]);
        assert_eq!(db.mark_delivered(id, SenderType::User, m2).await.unwrap(), vec![m2]);

        assert_eq!(db.mark_seen(id, MarkSeenTarget::AllFromVisitor).await.unwrap(), vec![m2]);
        assert!(db.mark_delivered(id, SenderType::User, m2).await.unwrap().is_empty());
        assert!(db.mark_seen(id, MarkSeenTarget::AllFromVisitor).await.unwrap().is_empty());

        let messages = db.get_messages(id).await.unwrap();
        assert!(messages.iter().all(|message| message.status == DeliveryStatus::Seen));
        assert!(messages.iter().all(|message| message.seen_at.is_some()));
    }
}
