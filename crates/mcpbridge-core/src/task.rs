//! Long-running task tracking.
//!
//! A [`TaskManager`] keeps task records in memory, routes progress to an MCP
//! notification sink through caller-supplied progress tokens, and prunes old
//! terminal tasks once their number passes the history cap.
//!
//! Lookups of unknown ids or tokens are silent no-ops. Notification failures
//! are logged and swallowed so a flaky transport never fails the tracked work.

use crate::config::TaskConfig;
use crate::error::TaskError;
use chrono::{DateTime, Utc};
use mcpbridge_mcp::{NotificationSink, ProgressNotification, ProgressToken};
use mcpbridge_util::Identifier;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Progress value every notification is measured against.
pub const PROGRESS_TOTAL: u8 = 100;

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Working,
    InputRequired,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Working => "working",
            TaskStatus::InputRequired => "input_required",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Whether no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked long-running operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    /// Always within `0..=100`.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Set only once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Set only once failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    fn new(title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Identifier::task(),
            title,
            status: TaskStatus::Working,
            progress: 0,
            message: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Serializable projection of a task, handed across process boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    /// Check the status invariants.
    pub fn validate(&self) -> Result<(), TaskError> {
        let problem = if self.progress > PROGRESS_TOTAL {
            Some("progress exceeds 100")
        } else {
            match self.status {
                TaskStatus::Completed if self.progress != PROGRESS_TOTAL => {
                    Some("completed task must report progress 100")
                }
                TaskStatus::Completed if self.error.is_some() => {
                    Some("completed task must not carry an error")
                }
                TaskStatus::Failed if self.error.is_none() => Some("failed task must carry an error"),
                TaskStatus::Failed if self.result.is_some() => {
                    Some("failed task must not carry a result")
                }
                TaskStatus::Working | TaskStatus::InputRequired | TaskStatus::Cancelled
                    if self.result.is_some() || self.error.is_some() =>
                {
                    Some("unfinished task must not carry a result or error")
                }
                _ => None,
            }
        };

        match problem {
            Some(message) => Err(TaskError::Validation {
                task_id: self.task_id.clone(),
                message: message.to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl From<&Task> for TaskResult {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            status: task.status,
            progress: task.progress,
            message: task.message.clone(),
            result: task.result.clone(),
            error: task.error.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct TaskState {
    tasks: HashMap<String, Task>,
    tokens: HashMap<ProgressToken, String>,
}

impl TaskState {
    fn release_tokens(&mut self, task_id: &str) {
        self.tokens.retain(|token, id| {
            let keep = id != task_id;
            if !keep {
                debug!(task_id = %task_id, token = %token, "Released progress token");
            }
            keep
        });
    }

    /// Drop the oldest terminal tasks beyond `max_history`.
    fn prune(&mut self, max_history: usize) {
        let mut terminal: Vec<(DateTime<Utc>, String)> = self
            .tasks
            .values()
            .filter(|task| task.status.is_terminal())
            .map(|task| (task.updated_at, task.id.clone()))
            .collect();

        if terminal.len() <= max_history {
            return;
        }

        terminal.sort();
        let excess = terminal.len() - max_history;
        for (_, id) in terminal.into_iter().take(excess) {
            self.tasks.remove(&id);
            self.release_tokens(&id);
            debug!(task_id = %id, "Pruned task from history");
        }
    }
}

/// In-memory task registry with progress notifications.
pub struct TaskManager {
    state: RwLock<TaskState>,
    sink: Option<Arc<dyn NotificationSink>>,
    max_history_size: usize,
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("max_history_size", &self.max_history_size)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::from_config(&TaskConfig::default())
    }
}

impl TaskManager {
    /// Create a manager keeping at most `max_history_size` terminal tasks.
    pub fn new(max_history_size: usize) -> Self {
        Self {
            state: RwLock::new(TaskState::default()),
            sink: None,
            max_history_size,
        }
    }

    pub fn from_config(config: &TaskConfig) -> Self {
        Self::new(config.max_history_size())
    }

    /// Send progress notifications through `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn max_history_size(&self) -> usize {
        self.max_history_size
    }

    fn read(&self) -> RwLockReadGuard<'_, TaskState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TaskState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a task, optionally addressable by a progress token.
    pub fn create_task(
        &self,
        title: impl Into<String>,
        progress_token: Option<ProgressToken>,
    ) -> Task {
        let task = Task::new(title.into());
        let mut state = self.write();
        if let Some(token) = progress_token {
            debug!(task_id = %task.id, token = %token, "Registered progress token");
            state.tokens.insert(token, task.id.clone());
        }
        state.tasks.insert(task.id.clone(), task.clone());
        info!(task_id = %task.id, title = %task.title, "Task created");
        task
    }

    pub fn get_task(&self, task_id: &str) -> Option<Task> {
        self.read().tasks.get(task_id).cloned()
    }

    /// Tasks that are `working` or `input_required`, oldest first.
    pub fn get_active_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .read()
            .tasks
            .values()
            .filter(|task| task.status.is_active())
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    /// All retained tasks, newest first.
    pub fn list_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.read().tasks.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        tasks
    }

    pub fn get_task_id_by_token(&self, token: &ProgressToken) -> Option<String> {
        self.read().tokens.get(token).cloned()
    }

    /// Whether progress for `token` is still being delivered.
    pub fn is_token_active(&self, token: &ProgressToken) -> bool {
        self.read().tokens.contains_key(token)
    }

    /// Record progress and notify the token's listener.
    ///
    /// `progress` is clamped into `0..=100`. Terminal tasks keep their final
    /// state. A notification goes out only when `token` is given and still
    /// registered to this task.
    pub async fn update_progress(
        &self,
        task_id: &str,
        token: Option<&ProgressToken>,
        progress: i64,
        message: Option<&str>,
    ) {
        let progress = progress.clamp(0, i64::from(PROGRESS_TOTAL)) as u8;

        let notification = {
            let mut state = self.write();
            let Some(task) = state.tasks.get_mut(task_id) else {
                debug!(task_id = %task_id, "Progress for unknown task ignored");
                return;
            };
            if task.status.is_terminal() {
                debug!(task_id = %task_id, status = %task.status, "Progress for finished task ignored");
                return;
            }

            task.progress = progress;
            if let Some(message) = message {
                task.message = Some(message.to_string());
            }
            task.touch();
            debug!(task_id = %task_id, progress, "Task progress updated");

            let text = message.map(str::to_string).unwrap_or_else(|| task.title.clone());
            token
                .filter(|token| state.tokens.get(*token).map(String::as_str) == Some(task_id))
                .map(|token| ProgressNotification {
                    progress_token: token.clone(),
                    progress,
                    total: PROGRESS_TOTAL,
                    message: Some(text),
                })
        };

        if let Some(notification) = notification {
            self.notify(task_id, notification).await;
        }
    }

    async fn notify(&self, task_id: &str, notification: ProgressNotification) {
        let Some(sink) = &self.sink else {
            debug!(task_id = %task_id, "No notification sink configured");
            return;
        };

        let notification = match notification.into_notification() {
            Ok(n) => n,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Failed to encode progress notification");
                return;
            }
        };

        if let Err(e) = sink.send_notification(notification).await {
            warn!(task_id = %task_id, error = %e, "Failed to send progress notification");
        }
    }

    /// Mark a task completed with progress 100.
    pub fn complete_task(&self, task_id: &str, result: Option<Value>) {
        self.finish(task_id, TaskStatus::Completed, |task| {
            task.progress = PROGRESS_TOTAL;
            task.result = result;
        });
    }

    /// Mark a task failed.
    pub fn fail_task(&self, task_id: &str, error: impl Into<String>) {
        let error = error.into();
        self.finish(task_id, TaskStatus::Failed, |task| {
            task.error = Some(error);
        });
    }

    /// Mark a task cancelled.
    pub fn cancel_task(&self, task_id: &str) {
        self.finish(task_id, TaskStatus::Cancelled, |_| {});
    }

    fn finish(&self, task_id: &str, status: TaskStatus, apply: impl FnOnce(&mut Task)) {
        let mut state = self.write();
        let Some(task) = state.tasks.get_mut(task_id) else {
            debug!(task_id = %task_id, status = %status, "Transition for unknown task ignored");
            return;
        };
        if task.status.is_terminal() {
            debug!(task_id = %task_id, from = %task.status, to = %status, "Task already finished");
            return;
        }

        task.status = status;
        apply(task);
        task.touch();
        info!(task_id = %task_id, status = %status, "Task finished");

        state.release_tokens(task_id);
        state.prune(self.max_history_size);
    }

    /// Pause a working task until the caller supplies input.
    pub fn set_input_required(&self, task_id: &str, message: Option<&str>) {
        let mut state = self.write();
        let Some(task) = state.tasks.get_mut(task_id) else {
            return;
        };
        if task.status != TaskStatus::Working {
            debug!(task_id = %task_id, status = %task.status, "Cannot request input");
            return;
        }
        task.status = TaskStatus::InputRequired;
        if let Some(message) = message {
            task.message = Some(message.to_string());
        }
        task.touch();
        info!(task_id = %task_id, "Task needs input");
    }

    /// Resume a task waiting for input. No-op in any other state.
    pub fn resume_task(&self, task_id: &str) {
        let mut state = self.write();
        let Some(task) = state.tasks.get_mut(task_id) else {
            return;
        };
        if task.status != TaskStatus::InputRequired {
            return;
        }
        task.status = TaskStatus::Working;
        task.touch();
        info!(task_id = %task_id, "Task resumed");
    }

    /// Project a task for serialization.
    ///
    /// Returns `Ok(None)` for unknown ids.
    pub fn to_task_result(&self, task_id: &str) -> Result<Option<TaskResult>, TaskError> {
        let Some(result) = self.read().tasks.get(task_id).map(TaskResult::from) else {
            return Ok(None);
        };
        result.validate()?;
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpbridge_mcp::{JsonRpcNotification, McpError, McpResult};
    use serde_json::json;

    mockall::mock! {
        Sink {}

        #[async_trait::async_trait]
        impl NotificationSink for Sink {
            async fn send_notification(&self, notification: JsonRpcNotification) -> McpResult<()>;
        }
    }

    #[test]
    fn test_create_task() {
        let manager = TaskManager::default();
        let task = manager.create_task("Export", Some("tok-1".into()));

        assert_eq!(task.status, TaskStatus::Working);
        assert_eq!(task.progress, 0);
        assert!(Identifier::has_prefix(
            &task.id,
            mcpbridge_util::id::IdPrefix::Task
        ));
        assert_eq!(
            manager.get_task_id_by_token(&"tok-1".into()),
            Some(task.id.clone())
        );
        assert_eq!(manager.get_task(&task.id), Some(task));
    }

    #[tokio::test]
    async fn test_progress_is_clamped() {
        let manager = TaskManager::default();
        let task = manager.create_task("Index", None);

        for (input, expected) in [(-5, 0), (42, 42), (150, 100), (i64::MAX, 100)] {
            manager.update_progress(&task.id, None, input, None).await;
            assert_eq!(manager.get_task(&task.id).unwrap().progress, expected);
        }
    }

    #[tokio::test]
    async fn test_unknown_task_is_noop() {
        let manager = TaskManager::default();
        manager.update_progress("tsk_missing", None, 10, None).await;
        manager.complete_task("tsk_missing", None);
        manager.fail_task("tsk_missing", "x");
        manager.cancel_task("tsk_missing");
        manager.resume_task("tsk_missing");

        assert!(manager.list_tasks().is_empty());
        assert!(manager.to_task_result("tsk_missing").unwrap().is_none());
    }

    #[test]
    fn test_complete_sets_progress_and_result() {
        let manager = TaskManager::default();
        let task = manager.create_task("Build", Some(ProgressToken::Number(7)));
        manager.complete_task(&task.id, Some(json!({"files": 3})));

        let done = manager.get_task(&task.id).unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.result, Some(json!({"files": 3})));
        assert!(!manager.is_token_active(&ProgressToken::Number(7)));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let manager = TaskManager::default();
        let task = manager.create_task("Build", None);
        manager.cancel_task(&task.id);
        manager.complete_task(&task.id, None);
        manager.fail_task(&task.id, "late");
        manager.set_input_required(&task.id, Some("?"));

        let task = manager.get_task(&task.id).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.error.is_none());
    }

    #[test]
    fn test_input_required_round_trip() {
        let manager = TaskManager::default();
        let task = manager.create_task("Deploy", None);

        manager.resume_task(&task.id);
        assert_eq!(manager.get_task(&task.id).unwrap().status, TaskStatus::Working);

        manager.set_input_required(&task.id, Some("Confirm target"));
        let waiting = manager.get_task(&task.id).unwrap();
        assert_eq!(waiting.status, TaskStatus::InputRequired);
        assert_eq!(waiting.message.as_deref(), Some("Confirm target"));
        assert_eq!(manager.get_active_tasks().len(), 1);

        manager.resume_task(&task.id);
        assert_eq!(manager.get_task(&task.id).unwrap().status, TaskStatus::Working);

        manager.complete_task(&task.id, None);
        manager.resume_task(&task.id);
        assert_eq!(
            manager.get_task(&task.id).unwrap().status,
            TaskStatus::Completed
        );
        assert!(manager.get_active_tasks().is_empty());
    }

    #[test]
    fn test_prune_keeps_newest_terminal_and_all_active() {
        let manager = TaskManager::new(2);
        let active: Vec<Task> = (0..3)
            .map(|i| manager.create_task(format!("active {i}"), None))
            .collect();

        let mut finished = Vec::new();
        for i in 0..5 {
            let task = manager.create_task(format!("done {i}"), None);
            manager.complete_task(&task.id, None);
            finished.push(task.id);
        }

        let terminal = manager
            .list_tasks()
            .into_iter()
            .filter(|t| t.status.is_terminal())
            .count();
        assert_eq!(terminal, 2);
        assert!(manager.get_task(&finished[4]).is_some());
        for task in &active {
            assert!(manager.get_task(&task.id).is_some());
        }
    }

    #[test]
    fn test_task_result_projection() {
        let manager = TaskManager::default();
        let task = manager.create_task("Export", None);
        manager.fail_task(&task.id, "disk full");

        let result = manager.to_task_result(&task.id).unwrap().unwrap();
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("disk full"));

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["taskId"], task.id);
        assert_eq!(value["status"], "failed");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_validate_rejects_broken_projection() {
        let broken = TaskResult {
            task_id: "tsk_1".to_string(),
            status: TaskStatus::Completed,
            progress: 40,
            message: None,
            result: None,
            error: None,
        };
        assert!(matches!(
            broken.validate(),
            Err(TaskError::Validation { .. })
        ));

        let broken = TaskResult {
            status: TaskStatus::Failed,
            progress: 10,
            ..broken
        };
        assert!(broken.validate().is_err());
    }

    #[test]
    fn test_status_serde() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::InputRequired).unwrap(),
            "\"input_required\""
        );
        assert_eq!(TaskStatus::Cancelled.to_string(), "cancelled");
    }

    #[tokio::test]
    async fn test_notification_payload() {
        let mut sink = MockSink::new();
        sink.expect_send_notification()
            .times(1)
            .withf(|n| {
                n.method == "notifications/progress"
                    && n.params
                        == Some(json!({
                            "progressToken": "tok",
                            "progress": 25,
                            "total": 100,
                            "message": "Export"
                        }))
            })
            .returning(|_| Ok(()));

        let manager = TaskManager::default().with_sink(Arc::new(sink));
        let token = ProgressToken::from("tok");
        let task = manager.create_task("Export", Some(token.clone()));
        manager.update_progress(&task.id, Some(&token), 25, None).await;
        // Not registered, so no second send.
        manager
            .update_progress(&task.id, Some(&ProgressToken::from("other")), 30, None)
            .await;
    }

    #[tokio::test]
    async fn test_sink_error_is_swallowed() {
        let mut sink = MockSink::new();
        sink.expect_send_notification()
            .times(1)
            .returning(|_| Err(McpError::connection_failed("closed")));

        let manager = TaskManager::default().with_sink(Arc::new(sink));
        let token = ProgressToken::from(1_i64);
        let task = manager.create_task("Sync", Some(token.clone()));
        manager.update_progress(&task.id, Some(&token), 60, Some("copying")).await;

        let task = manager.get_task(&task.id).unwrap();
        assert_eq!(task.status, TaskStatus::Working);
        assert_eq!(task.progress, 60);
    }
}
