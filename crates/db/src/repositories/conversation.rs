use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use aide_core::domain::conversation::{
    Conversation, ConversationId, Message, MessageContext, MessageId, MessageRole,
};
use aide_core::domain::owner::OwnerId;

use super::decode::{parse_timestamp, parse_u32};
use super::{ConversationRepository, MessageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find(&self, id: &ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, owner_id, name, last_activity_at, created_at
             FROM conversation
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn list_for_owner(
        &self,
        owner_id: &OwnerId,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, owner_id, name, last_activity_at, created_at
             FROM conversation
             WHERE owner_id = ?
             ORDER BY last_activity_at DESC, created_at DESC",
        )
        .bind(&owner_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(conversation_from_row).collect()
    }

    async fn find_by_name(
        &self,
        owner_id: &OwnerId,
        name: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, owner_id, name, last_activity_at, created_at
             FROM conversation
             WHERE owner_id = ? AND name = ?
             ORDER BY created_at ASC
             LIMIT 1",
        )
        .bind(&owner_id.0)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO conversation (id, owner_id, name, last_activity_at, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                last_activity_at = excluded.last_activity_at",
        )
        .bind(&conversation.id.0)
        .bind(&conversation.owner_id.0)
        .bind(&conversation.name)
        .bind(conversation.last_activity_at.to_rfc3339())
        .bind(conversation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn touch(&self, id: &ConversationId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE conversation SET last_activity_at = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &ConversationId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM conversation WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn append(&self, message: Message) -> Result<(), RepositoryError> {
        let context_json = message
            .context
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|error| RepositoryError::Decode(format!("could not encode context: {error}")))?;

        sqlx::query(
            "INSERT INTO message (id, conversation_id, owner_id, role, content, context_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id.0)
        .bind(&message.conversation_id.0)
        .bind(&message.owner_id.0)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(context_json)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, RepositoryError> {
        let limit = limit.map(|value| value as i64).unwrap_or(-1);
        let rows = sqlx::query(
            "SELECT id, conversation_id, owner_id, role, content, context_json, created_at
             FROM (
                SELECT id, conversation_id, owner_id, role, content, context_json, created_at, rowid
                FROM message
                WHERE conversation_id = ?
                ORDER BY created_at DESC, rowid DESC
                LIMIT ?
             )
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&conversation_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn count_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<u32, RepositoryError> {
        let count: i64 =
            sqlx::query("SELECT COUNT(*) AS count FROM message WHERE conversation_id = ?")
                .bind(&conversation_id.0)
                .fetch_one(&self.pool)
                .await?
                .try_get("count")?;
        parse_u32("count", count)
    }
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, RepositoryError> {
    Ok(Conversation {
        id: ConversationId(row.try_get("id")?),
        owner_id: OwnerId(row.try_get("owner_id")?),
        name: row.try_get("name")?,
        last_activity_at: parse_timestamp("last_activity_at", row.try_get("last_activity_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    let role_raw = row.try_get::<String, _>("role")?;
    let role = MessageRole::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message role `{role_raw}`")))?;
    let context = row
        .try_get::<Option<String>, _>("context_json")?
        .map(|raw| {
            serde_json::from_str::<MessageContext>(&raw).map_err(|error| {
                RepositoryError::Decode(format!("invalid message context: {error}"))
            })
        })
        .transpose()?;

    Ok(Message {
        id: MessageId(row.try_get("id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        owner_id: OwnerId(row.try_get("owner_id")?),
        role,
        content: row.try_get("content")?,
        context,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
