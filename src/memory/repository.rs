//! The persistence contract the core consumes.
//!
//! The core never fails a task over a transient repository error — callers
//! log and continue. A SQL-backed implementation lives behind the same
//! trait; the in-memory one here backs development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::HivemindError;

/// A persisted conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// A persisted shadow copy of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub session_id: Option<String>,
    pub prompt: String,
    pub agent_id: Option<String>,
    pub status: String,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A recovery checkpoint for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub id: Uuid,
    pub task_id: Uuid,
    pub state_data: Value,
    pub created_at: DateTime<Utc>,
}

/// One agent execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutionRecord {
    pub id: Uuid,
    pub agent_id: String,
    pub task_id: Uuid,
    pub status: String,
    pub output: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Persistence operations the core depends on.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn create_session(
        &self,
        user_id: Option<&str>,
        metadata: Value,
    ) -> Result<SessionRecord, HivemindError>;
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, HivemindError>;
    async fn end_session(&self, session_id: &str) -> Result<bool, HivemindError>;
    async fn list_active_sessions(&self, limit: usize)
        -> Result<Vec<SessionRecord>, HivemindError>;

    async fn create_task(
        &self,
        session_id: Option<&str>,
        prompt: &str,
        agent_id: Option<&str>,
        status: &str,
        task_id: Option<Uuid>,
    ) -> Result<TaskRecord, HivemindError>;
    async fn get_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>, HivemindError>;
    async fn update_task_status(
        &self,
        task_id: Uuid,
        status: &str,
        result: Option<&str>,
    ) -> Result<bool, HivemindError>;
    async fn list_tasks_by_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<TaskRecord>, HivemindError>;
    async fn list_tasks_by_agent(&self, agent_id: &str) -> Result<Vec<TaskRecord>, HivemindError>;

    async fn create_checkpoint(
        &self,
        task_id: Uuid,
        state_data: Value,
    ) -> Result<CheckpointRecord, HivemindError>;
    async fn get_latest_checkpoint(
        &self,
        task_id: Uuid,
    ) -> Result<Option<CheckpointRecord>, HivemindError>;

    async fn create_agent_execution(
        &self,
        agent_id: &str,
        task_id: Uuid,
        status: &str,
    ) -> Result<AgentExecutionRecord, HivemindError>;
    async fn complete_agent_execution(
        &self,
        execution_id: Uuid,
        status: &str,
        output: Option<&str>,
    ) -> Result<bool, HivemindError>;
}

/// In-memory repository for development and tests.
#[derive(Default)]
pub struct InMemoryRepository {
    sessions: DashMap<String, SessionRecord>,
    tasks: DashMap<Uuid, TaskRecord>,
    checkpoints: DashMap<Uuid, Vec<CheckpointRecord>>,
    executions: DashMap<Uuid, AgentExecutionRecord>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create_session(
        &self,
        user_id: Option<&str>,
        metadata: Value,
    ) -> Result<SessionRecord, HivemindError> {
        let record = SessionRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.map(str::to_string),
            metadata,
            created_at: Utc::now(),
            ended_at: None,
        };
        self.sessions.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, HivemindError> {
        Ok(self.sessions.get(session_id).map(|r| r.value().clone()))
    }

    async fn end_session(&self, session_id: &str) -> Result<bool, HivemindError> {
        match self.sessions.get_mut(session_id) {
            Some(mut record) => {
                record.ended_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_active_sessions(
        &self,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, HivemindError> {
        let mut sessions: Vec<SessionRecord> = self
            .sessions
            .iter()
            .filter(|r| r.is_active())
            .map(|r| r.value().clone())
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn create_task(
        &self,
        session_id: Option<&str>,
        prompt: &str,
        agent_id: Option<&str>,
        status: &str,
        task_id: Option<Uuid>,
    ) -> Result<TaskRecord, HivemindError> {
        let now = Utc::now();
        let record = TaskRecord {
            id: task_id.unwrap_or_else(Uuid::new_v4),
            session_id: session_id.map(str::to_string),
            prompt: prompt.to_string(),
            agent_id: agent_id.map(str::to_string),
            status: status.to_string(),
            result: None,
            created_at: now,
            updated_at: now,
        };
        self.tasks.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>, HivemindError> {
        Ok(self.tasks.get(&task_id).map(|r| r.value().clone()))
    }

    async fn update_task_status(
        &self,
        task_id: Uuid,
        status: &str,
        result: Option<&str>,
    ) -> Result<bool, HivemindError> {
        match self.tasks.get_mut(&task_id) {
            Some(mut record) => {
                record.status = status.to_string();
                if let Some(result) = result {
                    record.result = Some(result.to_string());
                }
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_tasks_by_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<TaskRecord>, HivemindError> {
        let mut tasks: Vec<TaskRecord> = self
            .tasks
            .iter()
            .filter(|r| r.session_id.as_deref() == Some(session_id))
            .map(|r| r.value().clone())
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    async fn list_tasks_by_agent(&self, agent_id: &str) -> Result<Vec<TaskRecord>, HivemindError> {
        let mut tasks: Vec<TaskRecord> = self
            .tasks
            .iter()
            .filter(|r| r.agent_id.as_deref() == Some(agent_id))
            .map(|r| r.value().clone())
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    async fn create_checkpoint(
        &self,
        task_id: Uuid,
        state_data: Value,
    ) -> Result<CheckpointRecord, HivemindError> {
        let record = CheckpointRecord {
            id: Uuid::new_v4(),
            task_id,
            state_data,
            created_at: Utc::now(),
        };
        self.checkpoints
            .entry(task_id)
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn get_latest_checkpoint(
        &self,
        task_id: Uuid,
    ) -> Result<Option<CheckpointRecord>, HivemindError> {
        Ok(self
            .checkpoints
            .get(&task_id)
            .and_then(|list| list.last().cloned()))
    }

    async fn create_agent_execution(
        &self,
        agent_id: &str,
        task_id: Uuid,
        status: &str,
    ) -> Result<AgentExecutionRecord, HivemindError> {
        let record = AgentExecutionRecord {
            id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            task_id,
            status: status.to_string(),
            output: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.executions.insert(record.id, record.clone());
        Ok(record)
    }

    async fn complete_agent_execution(
        &self,
        execution_id: Uuid,
        status: &str,
        output: Option<&str>,
    ) -> Result<bool, HivemindError> {
        match self.executions.get_mut(&execution_id) {
            Some(mut record) => {
                record.status = status.to_string();
                record.output = output.map(str::to_string);
                record.completed_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_session_lifecycle() {
        let repo = InMemoryRepository::new();
        let session = repo
            .create_session(Some("user-1"), json!({"channel": "api"}))
            .await
            .unwrap();
        assert!(session.is_active());

        let fetched = repo.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(fetched.user_id.as_deref(), Some("user-1"));

        assert!(repo.end_session(&session.id).await.unwrap());
        let ended = repo.get_session(&session.id).await.unwrap().unwrap();
        assert!(!ended.is_active());

        let active = repo.list_active_sessions(10).await.unwrap();
        assert!(active.iter().all(|s| s.id != session.id));
    }

    #[tokio::test]
    async fn test_task_status_updates() {
        let repo = InMemoryRepository::new();
        let task = repo
            .create_task(Some("s1"), "prompt", None, "pending", None)
            .await
            .unwrap();

        assert!(repo
            .update_task_status(task.id, "completed", Some("answer"))
            .await
            .unwrap());
        let updated = repo.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(updated.status, "completed");
        assert_eq!(updated.result.as_deref(), Some("answer"));

        let by_session = repo.list_tasks_by_session("s1").await.unwrap();
        assert_eq!(by_session.len(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_task_is_false() {
        let repo = InMemoryRepository::new();
        assert!(!repo
            .update_task_status(Uuid::new_v4(), "completed", None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_checkpoints_return_latest() {
        let repo = InMemoryRepository::new();
        let task_id = Uuid::new_v4();
        repo.create_checkpoint(task_id, json!({"step": 1}))
            .await
            .unwrap();
        repo.create_checkpoint(task_id, json!({"step": 2}))
            .await
            .unwrap();

        let latest = repo.get_latest_checkpoint(task_id).await.unwrap().unwrap();
        assert_eq!(latest.state_data, json!({"step": 2}));
    }

    #[tokio::test]
    async fn test_agent_execution_round_trip() {
        let repo = InMemoryRepository::new();
        let execution = repo
            .create_agent_execution("DEV-002", Uuid::new_v4(), "running")
            .await
            .unwrap();
        assert!(repo
            .complete_agent_execution(execution.id, "completed", Some("done"))
            .await
            .unwrap());
    }
}
