use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use aafs_core::task::{
    PollOutcome, Task, TaskDisposition, TaskHandler, TaskPoller, TaskQueue, TaskSubmission,
    OPCODE_GEN_FORECAST, OPCODE_NO_OP, OPCODE_SHUTDOWN,
};
use aafs_core::CoreError;
use aafs_store::{MemoryStore, StoreError};
use async_trait::async_trait;

fn queue() -> TaskQueue<MemoryStore> {
    TaskQueue::new(Arc::new(MemoryStore::new()), "tasks")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_pollers_claim_a_task_exactly_once() {
    let q = queue();
    q.ensure_indexes().await.unwrap();
    q.submit(TaskSubmission::new(OPCODE_NO_OP, 100, 1, "server1"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let q = q.clone();
        handles.push(tokio::spawn(async move {
            q.activate_first_ready(1_000).await.unwrap()
        }));
    }
    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_partition_the_queue() {
    let q = queue();
    for t in 1..=40 {
        q.submit(TaskSubmission::new(OPCODE_NO_OP, t, 1, "server1"))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let q = q.clone();
        handles.push(tokio::spawn(async move {
            let mut mine = Vec::new();
            while let Some(task) = q.activate_first_ready(1_000).await.unwrap() {
                mine.push(task.id);
            }
            mine
        }));
    }
    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(seen.insert(id), "task {id} claimed twice");
        }
    }
    assert_eq!(seen.len(), 40);
    assert_eq!(q.get_restarted().await.unwrap().len(), 40);
}

#[tokio::test]
async fn abandoned_claim_is_seen_as_restarted() {
    let q = queue();
    let submitted = q
        .submit(TaskSubmission::new(OPCODE_GEN_FORECAST, 100, 1, "server1").event_id("us1"))
        .await
        .unwrap();
    // A worker claims and then disappears.
    q.activate_first_ready(100).await.unwrap().unwrap();

    // Found again only through the non-claiming paths.
    let by_event = q.get_range(None, None, Some("us1")).await.unwrap();
    assert_eq!(by_event.len(), 1);
    assert!(by_event[0].is_restarted());
    assert!(q.fetch_by_id(submitted.id).await.unwrap().unwrap().is_restarted());
    assert!(q.activate_first_ready(i64::MAX).await.unwrap().is_none());

    q.requeue_restarted(500).await.unwrap();
    let reclaimed = q.activate_first_ready(500).await.unwrap().unwrap();
    assert_eq!(reclaimed.id, submitted.id);
    assert_eq!(reclaimed.exec_time, 500);
}

#[tokio::test]
async fn stage_after_delete_reports_not_found() {
    let q = queue();
    let task = q
        .submit(TaskSubmission::new(OPCODE_NO_OP, 100, 1, "server1"))
        .await
        .unwrap();
    assert!(q.delete(&task).await.unwrap());
    assert!(!q.delete(&task).await.unwrap());
    let err = q.stage(&task, 200, 1, None).await.unwrap_err();
    assert!(matches!(err, CoreError::Store(StoreError::NotFound { .. })));
}

struct RecordingHandler {
    seen: Mutex<Vec<(i32, i32)>>,
}

#[async_trait]
impl TaskHandler for RecordingHandler {
    async fn handle(&self, task: &Task) -> Result<TaskDisposition, CoreError> {
        self.seen
            .lock()
            .unwrap()
            .push((task.opcode, task.stage));
        match (task.opcode, task.stage) {
            (OPCODE_GEN_FORECAST, 0) => Ok(TaskDisposition::Stage {
                exec_time: 150,
                stage: 1,
                event_id: Some("us2".to_string()),
            }),
            (OPCODE_SHUTDOWN, _) => Err(CoreError::Store(StoreError::Backend(
                "handler refused".to_string(),
            ))),
            _ => Ok(TaskDisposition::Complete),
        }
    }
}

#[tokio::test]
async fn poller_applies_dispositions() {
    let q = queue();
    q.submit(TaskSubmission::new(OPCODE_GEN_FORECAST, 100, 1, "server1").event_id("us1"))
        .await
        .unwrap();
    let handler = RecordingHandler {
        seen: Mutex::new(Vec::new()),
    };
    let poller = TaskPoller::new(q.clone(), handler);

    assert_eq!(poller.poll_once(50).await.unwrap(), PollOutcome::Idle);

    let outcome = poller.poll_once(100).await.unwrap();
    assert!(matches!(
        outcome,
        PollOutcome::Ran {
            disposition: TaskDisposition::Stage { stage: 1, .. },
            ..
        }
    ));
    let staged = q.get_range(None, None, Some("us2")).await.unwrap();
    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0].exec_time, 150);

    // Stage 1 completes and the task is deleted.
    assert_eq!(poller.drain(200, 10).await.unwrap(), 1);
    assert!(q.all().await.unwrap().is_empty());
}

/// Always schedules the next stage at the same time.
struct RestagingHandler;

#[async_trait]
impl TaskHandler for RestagingHandler {
    async fn handle(&self, task: &Task) -> Result<TaskDisposition, CoreError> {
        Ok(TaskDisposition::Stage {
            exec_time: 100,
            stage: task.stage + 1,
            event_id: None,
        })
    }
}

#[tokio::test]
async fn drain_stops_at_task_limit() {
    let q = queue();
    q.submit(TaskSubmission::new(OPCODE_GEN_FORECAST, 100, 1, "server1"))
        .await
        .unwrap();
    let poller = TaskPoller::new(q.clone(), RestagingHandler);

    assert_eq!(poller.drain(100, 5).await.unwrap(), 5);
    let tasks = q.all().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].stage, 5);
    assert_eq!(tasks[0].exec_time, 100);

    assert_eq!(poller.drain(100, 0).await.unwrap(), 0);
    assert_eq!(q.all().await.unwrap()[0].stage, 5);
}

#[tokio::test]
async fn handler_error_leaves_task_restarted() {
    let q = queue();
    q.submit(TaskSubmission::new(OPCODE_SHUTDOWN, 100, 1, "server1"))
        .await
        .unwrap();
    let poller = TaskPoller::new(
        q.clone(),
        RecordingHandler {
            seen: Mutex::new(Vec::new()),
        },
    );
    assert!(poller.poll_once(100).await.is_err());
    let restarted = q.get_restarted().await.unwrap();
    assert_eq!(restarted.len(), 1);
    assert_eq!(restarted[0].opcode, OPCODE_SHUTDOWN);
}
