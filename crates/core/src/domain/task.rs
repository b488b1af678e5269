use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::conversation::ConversationId;
use crate::domain::owner::OwnerId;

pub const DEFAULT_TASK_TYPE: &str = "email_response";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Waiting,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "waiting" => Some(Self::Waiting),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Waiting)
    }
}

/// A unit of work waiting on a reply from an external counterparty.
///
/// `expected_counterparty` is stored lower-cased so matching can compare
/// addresses without re-normalizing on every event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub conversation_id: ConversationId,
    pub owner_id: OwnerId,
    pub status: TaskStatus,
    pub task_type: String,
    pub description: String,
    pub expected_counterparty: String,
    pub counterparty_name: Option<String>,
    pub linked_event_id: Option<String>,
    pub context: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub waiting: u32,
    pub completed: u32,
    pub cancelled: u32,
    pub total: u32,
}

impl TaskStatistics {
    pub fn record(&mut self, status: TaskStatus, count: u32) {
        match status {
            TaskStatus::Waiting => self.waiting += count,
            TaskStatus::Completed => self.completed += count,
            TaskStatus::Cancelled => self.cancelled += count,
        }
        self.total += count;
    }
}

#[cfg(test)]
mod tests {
    use super::{TaskStatistics, TaskStatus};

    #[test]
    fn task_status_round_trips_from_storage_encoding() {
        for status in [TaskStatus::Waiting, TaskStatus::Completed, TaskStatus::Cancelled] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("pending"), None);
    }

    #[test]
    fn only_waiting_is_non_terminal() {
        assert!(!TaskStatus::Waiting.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn statistics_accumulate_total() {
        let mut stats = TaskStatistics::default();
        stats.record(TaskStatus::Waiting, 2);
        stats.record(TaskStatus::Cancelled, 1);

        assert_eq!(stats.waiting, 2);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.total, 3);
    }
}
