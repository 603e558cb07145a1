//! Caller-driven poll step over a [`TaskQueue`].
//!
//! The poller owns no thread or task. The caller decides how often to call
//! [`TaskPoller::poll_once`] and wraps it in whatever timeout it needs.

use aafs_store::DocumentStore;
use async_trait::async_trait;

use super::{Task, TaskQueue};
use crate::error::CoreError;

/// What to do with a task after its handler ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskDisposition {
    /// The task is finished; delete it.
    Complete,
    /// Schedule the next phase of the task.
    Stage {
        exec_time: i64,
        stage: i32,
        event_id: Option<String>,
    },
    /// Leave the task claimed. It remains detectable as restarted.
    Retain,
}

/// Executes claimed tasks.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run one claimed task. An error leaves the task claimed.
    async fn handle(&self, task: &Task) -> Result<TaskDisposition, CoreError>;
}

/// Result of one poll step.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// No task was due.
    Idle,
    /// A task was claimed and handled.
    Ran {
        task: Task,
        disposition: TaskDisposition,
    },
}

pub struct TaskPoller<S, H> {
    queue: TaskQueue<S>,
    handler: H,
}

impl<S: DocumentStore, H: TaskHandler> TaskPoller<S, H> {
    pub fn new(queue: TaskQueue<S>, handler: H) -> Self {
        TaskPoller { queue, handler }
    }

    pub fn queue(&self) -> &TaskQueue<S> {
        &self.queue
    }

    /// Claim the first task due at `now`, run it, and apply its disposition.
    pub async fn poll_once(&self, now: i64) -> Result<PollOutcome, CoreError> {
        let Some(task) = self.queue.activate_first_ready(now).await? else {
            return Ok(PollOutcome::Idle);
        };

        let disposition = match self.handler.handle(&task).await {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(task_id = %task.id, opcode = task.opcode, error = %e, "task handler failed");
                return Err(e);
            }
        };

        match &disposition {
            TaskDisposition::Complete => {
                self.queue.delete(&task).await?;
            }
            TaskDisposition::Stage {
                exec_time,
                stage,
                event_id,
            } => {
                self.queue
                    .stage(&task, *exec_time, *stage, event_id.as_deref())
                    .await?;
            }
            TaskDisposition::Retain => {
                tracing::warn!(task_id = %task.id, "task retained in active state");
            }
        }
        Ok(PollOutcome::Ran { task, disposition })
    }

    /// Poll until no task is due at `now` or `max_tasks` tasks have run.
    /// Returns how many tasks ran.
    ///
    /// A task staged at or before `now` runs again within the same drain and
    /// counts once per run.
    pub async fn drain(&self, now: i64, max_tasks: usize) -> Result<usize, CoreError> {
        let mut ran = 0;
        while ran < max_tasks {
            match self.poll_once(now).await? {
                PollOutcome::Ran { .. } => ran += 1,
                PollOutcome::Idle => break,
            }
        }
        if ran == max_tasks {
            tracing::debug!(max_tasks, "drain stopped at task limit");
        }
        Ok(ran)
    }
}
