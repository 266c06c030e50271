//! Task manager integration tests.
//!
//! Tests for the task lifecycle, progress notifications and history pruning.

use mcpbridge_core::{TaskManager, TaskStatus};
use mcpbridge_mcp::ProgressToken;
use mcpbridge_test_utils::{FailingSink, RecordingSink};
use serde_json::json;
use std::sync::Arc;

fn token(value: &str) -> ProgressToken {
    ProgressToken::from(value)
}

/// Progress is clamped and the token is released on failure.
#[tokio::test]
async fn test_export_task_lifecycle() {
    let sink = RecordingSink::new();
    let manager = TaskManager::default().with_sink(Arc::new(sink.clone()));
    let tok = token("tok-A");

    let task = manager.create_task("Export", Some(tok.clone()));
    assert_eq!(manager.get_task_id_by_token(&tok), Some(task.id.clone()));

    manager
        .update_progress(&task.id, Some(&tok), -5, Some("start"))
        .await;
    assert_eq!(manager.get_task(&task.id).unwrap().progress, 0);

    manager
        .update_progress(&task.id, Some(&tok), 150, Some("overrun"))
        .await;
    assert_eq!(manager.get_task(&task.id).unwrap().progress, 100);

    manager.fail_task(&task.id, "disk full");
    let failed = manager.get_task(&task.id).unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("disk full"));
    assert!(failed.result.is_none());
    assert!(!manager.is_token_active(&tok));

    let params = sink.params();
    assert_eq!(params.len(), 2);
    assert_eq!(
        params[0],
        json!({"progressToken": "tok-A", "progress": 0, "total": 100, "message": "start"})
    );
    assert_eq!(params[1]["progress"], 100);
    assert_eq!(sink.notifications()[0].method, "notifications/progress");
}

/// No notification goes out once the token has been released.
#[tokio::test]
async fn test_released_token_suppresses_notifications() {
    let sink = RecordingSink::new();
    let manager = TaskManager::default().with_sink(Arc::new(sink.clone()));
    let tok = token("tok1");

    let done = manager.create_task("Done", Some(tok.clone()));
    manager.complete_task(&done.id, None);
    assert!(!manager.is_token_active(&tok));

    let other = manager.create_task("Other", None);
    manager.update_progress(&other.id, Some(&tok), 40, None).await;

    assert_eq!(manager.get_task(&other.id).unwrap().progress, 40);
    assert_eq!(sink.count(), 0);
}

/// A token bound to another task never carries this task's progress.
#[tokio::test]
async fn test_token_of_another_task_is_not_used() {
    let sink = RecordingSink::new();
    let manager = TaskManager::default().with_sink(Arc::new(sink.clone()));
    let tok_b = token("tok-B");

    let a = manager.create_task("A", Some(token("tok-A")));
    let b = manager.create_task("B", Some(tok_b.clone()));
    manager
        .update_progress(&a.id, Some(&tok_b), 40, Some("A work"))
        .await;

    assert_eq!(manager.get_task(&a.id).unwrap().progress, 40);
    assert_eq!(manager.get_task(&b.id).unwrap().progress, 0);
    assert_eq!(sink.count(), 0);

    manager.update_progress(&b.id, Some(&tok_b), 10, None).await;
    assert_eq!(sink.params()[0]["progressToken"], "tok-B");
    assert_eq!(sink.params()[0]["message"], "B");
}

/// Without a message, the notification falls back to the task title.
#[tokio::test]
async fn test_notification_message_falls_back_to_title() {
    let sink = RecordingSink::new();
    let manager = TaskManager::default().with_sink(Arc::new(sink.clone()));
    let tok = ProgressToken::from(7_i64);

    let task = manager.create_task("Indexing", Some(tok.clone()));
    manager.update_progress(&task.id, Some(&tok), 30, None).await;

    let params = sink.params();
    assert_eq!(params[0]["progressToken"], 7);
    assert_eq!(params[0]["message"], "Indexing");
}

/// A broken sink never fails the task.
#[tokio::test]
async fn test_sink_failure_is_swallowed() {
    let sink = FailingSink::new();
    let manager = TaskManager::default().with_sink(Arc::new(sink.clone()));
    let tok = token("flaky");

    let task = manager.create_task("Upload", Some(tok.clone()));
    manager
        .update_progress(&task.id, Some(&tok), 50, Some("halfway"))
        .await;

    assert_eq!(sink.attempts(), 1);
    let task = manager.get_task(&task.id).unwrap();
    assert_eq!(task.status, TaskStatus::Working);
    assert_eq!(task.progress, 50);
    assert_eq!(task.message.as_deref(), Some("halfway"));
}

#[tokio::test]
async fn test_progress_on_unknown_or_finished_task_is_ignored() {
    let sink = RecordingSink::new();
    let manager = TaskManager::default().with_sink(Arc::new(sink.clone()));

    manager
        .update_progress("tsk_missing", Some(&token("x")), 10, None)
        .await;

    let task = manager.create_task("Build", None);
    manager.complete_task(&task.id, Some(json!({"ok": true})));
    manager.update_progress(&task.id, None, 5, Some("late")).await;

    let task = manager.get_task(&task.id).unwrap();
    assert_eq!(task.progress, 100);
    assert_eq!(task.message, None);
    assert_eq!(sink.count(), 0);
}

#[tokio::test]
async fn test_complete_sets_result_and_full_progress() {
    let manager = TaskManager::default();
    let task = manager.create_task("X", None);
    manager.update_progress(&task.id, None, 20, None).await;
    manager.complete_task(&task.id, Some(json!({"rows": 42})));

    let task = manager.get_task(&task.id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100);
    assert_eq!(task.result, Some(json!({"rows": 42})));

    let result = manager.to_task_result(&task.id).unwrap().unwrap();
    assert_eq!(
        serde_json::to_value(&result).unwrap(),
        json!({"taskId": task.id, "status": "completed", "progress": 100, "result": {"rows": 42}})
    );
}

#[test]
fn test_history_is_pruned_but_active_tasks_stay() {
    let manager = TaskManager::new(3);

    let active: Vec<String> = (0..5)
        .map(|i| manager.create_task(format!("active {i}"), None).id)
        .collect();
    let finished: Vec<String> = (0..10)
        .map(|i| {
            let id = manager.create_task(format!("job {i}"), None).id;
            manager.complete_task(&id, None);
            id
        })
        .collect();

    let retained_terminal = finished
        .iter()
        .filter(|id| manager.get_task(id).is_some())
        .count();
    assert_eq!(retained_terminal, 3);
    assert!(manager.get_task(&finished[9]).is_some());
    assert!(manager.get_task(&finished[0]).is_none());

    assert!(active.iter().all(|id| manager.get_task(id).is_some()));
    assert_eq!(manager.get_active_tasks().len(), 5);
    assert_eq!(manager.list_tasks().len(), 8);
}
