use sqlx::{sqlite::SqliteRow, Row};

use aide_core::domain::conversation::ConversationId;
use aide_core::domain::owner::OwnerId;
use aide_core::domain::task::{Task, TaskId, TaskStatistics, TaskStatus};

use super::decode::{parse_json_object, parse_optional_timestamp, parse_timestamp, parse_u32};
use super::{RepositoryError, TaskRepository};
use crate::DbPool;

const TASK_COLUMNS: &str = "id, conversation_id, owner_id, status, task_type, description,
    expected_counterparty, counterparty_name, linked_event_id, context_json,
    created_at, updated_at, completed_at";

pub struct SqlTaskRepository {
    pool: DbPool,
}

impl SqlTaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TaskRepository for SqlTaskRepository {
    async fn find(&self, id: &TaskId) -> Result<Option<Task>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM task WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(task_from_row).transpose()
    }

    async fn save(&self, task: Task) -> Result<(), RepositoryError> {
        let context_json = serde_json::to_string(&task.context)
            .map_err(|error| RepositoryError::Decode(format!("could not encode context: {error}")))?;

        sqlx::query(
            "INSERT INTO task (
                id,
                conversation_id,
                owner_id,
                status,
                task_type,
                description,
                expected_counterparty,
                counterparty_name,
                linked_event_id,
                context_json,
                created_at,
                updated_at,
                completed_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                description = excluded.description,
                counterparty_name = excluded.counterparty_name,
                linked_event_id = excluded.linked_event_id,
                context_json = excluded.context_json,
                updated_at = excluded.updated_at,
                completed_at = excluded.completed_at",
        )
        .bind(&task.id.0)
        .bind(&task.conversation_id.0)
        .bind(&task.owner_id.0)
        .bind(task.status.as_str())
        .bind(&task.task_type)
        .bind(&task.description)
        .bind(&task.expected_counterparty)
        .bind(task.counterparty_name.as_deref())
        .bind(task.linked_event_id.as_deref())
        .bind(context_json)
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .bind(task.completed_at.map(|value| value.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Task>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM task
             WHERE conversation_id = ?
             ORDER BY created_at DESC"
        ))
        .bind(&conversation_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(task_from_row).collect()
    }

    async fn list_for_owner(
        &self,
        owner_id: &OwnerId,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, RepositoryError> {
        let rows = if let Some(status) = status {
            sqlx::query(&format!(
                "SELECT {TASK_COLUMNS} FROM task
                 WHERE owner_id = ? AND status = ?
                 ORDER BY created_at DESC"
            ))
            .bind(&owner_id.0)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {TASK_COLUMNS} FROM task
                 WHERE owner_id = ?
                 ORDER BY created_at DESC"
            ))
            .bind(&owner_id.0)
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(task_from_row).collect()
    }

    async fn list_waiting_for_counterparty(
        &self,
        owner_id: &OwnerId,
        counterparty: &str,
    ) -> Result<Vec<Task>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM task
             WHERE owner_id = ? AND status = 'waiting' AND lower(expected_counterparty) = ?
             ORDER BY created_at ASC"
        ))
        .bind(&owner_id.0)
        .bind(counterparty.trim().to_lowercase())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(task_from_row).collect()
    }

    async fn statistics(&self, owner_id: &OwnerId) -> Result<TaskStatistics, RepositoryError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM task WHERE owner_id = ? GROUP BY status",
        )
        .bind(&owner_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut statistics = TaskStatistics::default();
        for row in rows {
            let status_raw = row.try_get::<String, _>("status")?;
            let status = TaskStatus::parse(&status_raw).ok_or_else(|| {
                RepositoryError::Decode(format!("unknown task status `{status_raw}`"))
            })?;
            statistics.record(status, parse_u32("count", row.try_get("count")?)?);
        }
        Ok(statistics)
    }
}

fn task_from_row(row: SqliteRow) -> Result<Task, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = TaskStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown task status `{status_raw}`")))?;

    Ok(Task {
        id: TaskId(row.try_get("id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        owner_id: OwnerId(row.try_get("owner_id")?),
        status,
        task_type: row.try_get("task_type")?,
        description: row.try_get("description")?,
        expected_counterparty: row.try_get("expected_counterparty")?,
        counterparty_name: row.try_get("counterparty_name")?,
        linked_event_id: row.try_get("linked_event_id")?,
        context: parse_json_object("context_json", row.try_get("context_json")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::{json, Map};

    use aide_core::domain::conversation::{Conversation, DEFAULT_CONVERSATION_NAME};
    use aide_core::domain::owner::{Owner, OwnerId};
    use aide_core::domain::task::{Task, TaskStatus};
    use aide_core::tasks::{CompletionOutcome, NewTask, TaskLifecycle};

    use super::SqlTaskRepository;
    use crate::repositories::{
        ConversationRepository, OwnerRepository, SqlConversationRepository, SqlOwnerRepository,
        TaskRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> (DbPool, Conversation) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        let owners = SqlOwnerRepository::new(pool.clone());
        owners.save(Owner::new("owner-1", "one@corp.com")).await.expect("seed owner 1");
        owners.save(Owner::new("owner-2", "two@corp.com")).await.expect("seed owner 2");
        let conversation = Conversation::new(owner(), DEFAULT_CONVERSATION_NAME);
        SqlConversationRepository::new(pool.clone())
            .save(conversation.clone())
            .await
            .expect("seed conversation");
        (pool, conversation)
    }

    fn owner() -> OwnerId {
        OwnerId("owner-1".to_string())
    }

    fn new_task(conversation: &Conversation, owner_id: OwnerId, counterparty: &str) -> Task {
        let mut context = Map::new();
        context.insert("origin".to_string(), json!("chat"));
        TaskLifecycle::new()
            .register(NewTask {
                conversation_id: conversation.id.clone(),
                owner_id,
                description: format!("Wait for {counterparty}"),
                expected_counterparty: counterparty.to_string(),
                counterparty_name: None,
                task_type: None,
                context,
            })
            .expect("register")
    }

    #[tokio::test]
    async fn sql_task_repo_round_trip_and_transition() {
        let (pool, conversation) = setup().await;
        let repo = SqlTaskRepository::new(pool.clone());
        let task = new_task(&conversation, owner(), "Jane@Acme.com");

        repo.save(task.clone()).await.expect("save task");
        assert_eq!(repo.find(&task.id).await.expect("find"), Some(task.clone()));

        let completed = match TaskLifecycle::new().complete(task, "evt-1", Utc::now()) {
            CompletionOutcome::Completed(task) => task,
            other => panic!("unexpected outcome: {other:?}"),
        };
        repo.save(completed.clone()).await.expect("update task");

        let found = repo.find(&completed.id).await.expect("find").expect("exists");
        assert_eq!(found.status, TaskStatus::Completed);
        assert_eq!(found.linked_event_id.as_deref(), Some("evt-1"));
        assert_eq!(found.completed_at, completed.completed_at);

        pool.close().await;
    }

    #[tokio::test]
    async fn waiting_lookup_is_case_insensitive_and_owner_scoped() {
        let (pool, conversation) = setup().await;
        let repo = SqlTaskRepository::new(pool.clone());
        let mine = new_task(&conversation, owner(), "a@x.com");
        let duplicate = new_task(&conversation, owner(), "a@x.com");
        let theirs = new_task(&conversation, OwnerId("owner-2".to_string()), "a@x.com");
        let other_sender = new_task(&conversation, owner(), "b@x.com");
        for task in [&mine, &duplicate, &theirs, &other_sender] {
            repo.save(task.clone()).await.expect("save");
        }

        let matched =
            repo.list_waiting_for_counterparty(&owner(), "A@X.COM").await.expect("lookup");
        let mut ids: Vec<_> = matched.iter().map(|task| task.id.clone()).collect();
        ids.sort_by(|left, right| left.0.cmp(&right.0));
        let mut expected = vec![mine.id.clone(), duplicate.id.clone()];
        expected.sort_by(|left, right| left.0.cmp(&right.0));
        assert_eq!(ids, expected);

        let cancelled = TaskLifecycle::new().cancel(mine, &owner()).expect("cancel");
        repo.save(cancelled).await.expect("save cancelled");
        let matched =
            repo.list_waiting_for_counterparty(&owner(), "a@x.com").await.expect("lookup");
        assert_eq!(matched.len(), 1);

        let stats = repo.statistics(&owner()).await.expect("stats");
        assert_eq!((stats.waiting, stats.cancelled, stats.total), (2, 1, 3));

        let waiting = repo.list_for_owner(&owner(), Some(TaskStatus::Waiting)).await.expect("list");
        assert_eq!(waiting.len(), 2);
        assert_eq!(repo.list_for_conversation(&conversation.id).await.expect("list").len(), 4);

        pool.close().await;
    }
}
