//! Durable, time-ordered task queue.
//!
//! Tasks wait in a collection ordered by `exec_time`. A worker claims the
//! earliest due task with [`TaskQueue::activate_first_ready`], which sets its
//! `exec_time` to [`EXEC_TIME_ACTIVE`] in one atomic store call. The task then
//! stays in the collection, marked active, until the worker either re-stages
//! it for a later phase or deletes it.
//!
//! A task found with `exec_time == EXEC_TIME_ACTIVE` by any path other than
//! the claim itself was claimed by a worker that never finished: see
//! [`Task::is_restarted`] and [`TaskQueue::requeue_restarted`].

mod poller;

use std::sync::Arc;

use aafs_store::{DocId, DocumentStore, Filter, IndexSpec, Sort, Update};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{require_non_empty, require_non_negative, require_positive, CoreError};
use crate::record::{fields, from_document, to_document};

pub use poller::{PollOutcome, TaskDisposition, TaskHandler, TaskPoller};

/// `exec_time` of a claimed task that is not currently scheduled.
pub const EXEC_TIME_ACTIVE: i64 = 0;

pub const OPCODE_NO_OP: i32 = 0;
pub const OPCODE_SHUTDOWN: i32 = 1;
pub const OPCODE_GEN_FORECAST: i32 = 2;
pub const OPCODE_ALIAS_SPLIT: i32 = 3;
pub const OPCODE_RELAY_PUBLISH: i32 = 4;

/// Human-readable name of a known opcode.
pub fn opcode_name(opcode: i32) -> &'static str {
    match opcode {
        OPCODE_NO_OP => "no_op",
        OPCODE_SHUTDOWN => "shutdown",
        OPCODE_GEN_FORECAST => "gen_forecast",
        OPCODE_ALIAS_SPLIT => "alias_split",
        OPCODE_RELAY_PUBLISH => "relay_publish",
        _ => "unknown",
    }
}

const KIND: &str = "task";
const EXEC_TIME: &str = "exec_time";
const EVENT_ID: &str = "event_id";
const STAGE: &str = "stage";

/// One unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: DocId,
    /// Next due time in epoch millis, or [`EXEC_TIME_ACTIVE`] once claimed.
    pub exec_time: i64,
    /// Correlation key; empty when the task concerns no event.
    #[serde(default)]
    pub event_id: String,
    pub sched_time: i64,
    pub submit_time: i64,
    pub submit_id: String,
    pub opcode: i32,
    pub stage: i32,
    #[serde(default)]
    pub details: Value,
}

impl Task {
    /// A previous claim on this task never completed.
    pub fn is_restarted(&self) -> bool {
        self.exec_time == EXEC_TIME_ACTIVE
    }

    pub fn has_event(&self) -> bool {
        !self.event_id.is_empty()
    }
}

/// Arguments to [`TaskQueue::submit`].
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSubmission {
    /// Correlation key, or empty.
    pub event_id: String,
    /// Requested execution time, epoch millis.
    pub sched_time: i64,
    /// When the request was made, epoch millis.
    pub submit_time: i64,
    /// Who made the request.
    pub submit_id: String,
    pub opcode: i32,
    pub stage: i32,
    pub details: Value,
}

impl TaskSubmission {
    pub fn new(opcode: i32, sched_time: i64, submit_time: i64, submit_id: impl Into<String>) -> Self {
        TaskSubmission {
            event_id: String::new(),
            sched_time,
            submit_time,
            submit_id: submit_id.into(),
            opcode,
            stage: 0,
            details: Value::Null,
        }
    }

    pub fn event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }

    pub fn stage(mut self, stage: i32) -> Self {
        self.stage = stage;
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// The task queue over one store collection.
pub struct TaskQueue<S> {
    store: Arc<S>,
    collection: String,
}

impl<S> Clone for TaskQueue<S> {
    fn clone(&self) -> Self {
        TaskQueue {
            store: Arc::clone(&self.store),
            collection: self.collection.clone(),
        }
    }
}

fn ready_filter(cutoff_time: i64) -> Filter {
    Filter::gt(EXEC_TIME, EXEC_TIME_ACTIVE).and(Filter::lte(EXEC_TIME, cutoff_time))
}

impl<S: DocumentStore> TaskQueue<S> {
    pub fn new(store: Arc<S>, collection: impl Into<String>) -> Self {
        TaskQueue {
            store,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the indexes the queue's queries rely on.
    pub async fn ensure_indexes(&self) -> Result<(), CoreError> {
        self.store
            .create_index(&self.collection, IndexSpec::new(EXEC_TIME))
            .await?;
        self.store
            .create_index(&self.collection, IndexSpec::new(EVENT_ID))
            .await?;
        Ok(())
    }

    /// Validate and insert a new task, due at its `sched_time`.
    pub async fn submit(&self, submission: TaskSubmission) -> Result<Task, CoreError> {
        require_positive("sched_time", submission.sched_time)?;
        require_positive("submit_time", submission.submit_time)?;
        require_non_empty("submit_id", &submission.submit_id)?;
        require_non_negative("opcode", i64::from(submission.opcode))?;
        require_non_negative("stage", i64::from(submission.stage))?;

        let task = Task {
            id: DocId::new(),
            exec_time: submission.sched_time,
            event_id: submission.event_id,
            sched_time: submission.sched_time,
            submit_time: submission.submit_time,
            submit_id: submission.submit_id,
            opcode: submission.opcode,
            stage: submission.stage,
            details: submission.details,
        };
        self.store
            .insert(&self.collection, to_document(&task)?)
            .await?;
        tracing::debug!(
            task_id = %task.id,
            opcode = task.opcode,
            event_id = %task.event_id,
            exec_time = task.exec_time,
            "submitted task"
        );
        Ok(task)
    }

    /// The earliest task due at or before `cutoff_time`, without claiming it.
    pub async fn get_first_ready(&self, cutoff_time: i64) -> Result<Option<Task>, CoreError> {
        self.store
            .find_one(&self.collection, &ready_filter(cutoff_time), &Sort::asc(EXEC_TIME))
            .await?
            .map(|doc| from_document(KIND, doc))
            .transpose()
    }

    /// Claim the earliest task due at or before `cutoff_time`.
    ///
    /// The selection and the write of `exec_time = EXEC_TIME_ACTIVE` are one
    /// atomic store call, so concurrent pollers never claim the same task.
    /// Returns the task as it was before the claim, with its original
    /// `exec_time`.
    pub async fn activate_first_ready(&self, cutoff_time: i64) -> Result<Option<Task>, CoreError> {
        let claimed = self
            .store
            .find_and_update_atomic(
                &self.collection,
                &ready_filter(cutoff_time),
                &Update::set(EXEC_TIME, EXEC_TIME_ACTIVE),
                &Sort::asc(EXEC_TIME),
            )
            .await?
            .map(|doc| from_document::<Task>(KIND, doc))
            .transpose()?;
        if let Some(task) = &claimed {
            tracing::info!(
                task_id = %task.id,
                opcode = task.opcode,
                stage = task.stage,
                event_id = %task.event_id,
                "claimed task"
            );
        }
        Ok(claimed)
    }

    /// Schedule the task's next phase: new `exec_time` and `stage`, and a new
    /// `event_id` when given.
    pub async fn stage(
        &self,
        task: &Task,
        exec_time: i64,
        stage: i32,
        event_id: Option<&str>,
    ) -> Result<(), CoreError> {
        require_positive("exec_time", exec_time)?;
        require_non_negative("stage", i64::from(stage))?;

        let mut update = fields([(EXEC_TIME, Value::from(exec_time)), (STAGE, Value::from(stage))]);
        if let Some(event_id) = event_id {
            update.insert(EVENT_ID.to_string(), Value::from(event_id));
        }
        self.store
            .replace_by_id(&self.collection, task.id, update)
            .await?;
        tracing::debug!(task_id = %task.id, exec_time, stage, "staged task");
        Ok(())
    }

    /// Remove the task. Returns whether it was still present.
    pub async fn delete(&self, task: &Task) -> Result<bool, CoreError> {
        let removed = self.store.delete_by_id(&self.collection, task.id).await?;
        tracing::debug!(task_id = %task.id, removed, "deleted task");
        Ok(removed)
    }

    pub async fn fetch_by_id(&self, id: DocId) -> Result<Option<Task>, CoreError> {
        self.store
            .find_one(&self.collection, &Filter::id(id), &Sort::Natural)
            .await?
            .map(|doc| from_document(KIND, doc))
            .transpose()
    }

    /// Tasks with `exec_time` inside the inclusive bounds (either optional)
    /// and, when given, the matching `event_id`, earliest first. Active tasks
    /// are included when the lower bound admits `EXEC_TIME_ACTIVE`.
    pub async fn get_range(
        &self,
        exec_time_lo: Option<i64>,
        exec_time_hi: Option<i64>,
        event_id: Option<&str>,
    ) -> Result<Vec<Task>, CoreError> {
        let mut filter = Filter::All;
        if let Some(lo) = exec_time_lo {
            filter = filter.and(Filter::gte(EXEC_TIME, lo));
        }
        if let Some(hi) = exec_time_hi {
            filter = filter.and(Filter::lte(EXEC_TIME, hi));
        }
        if let Some(event_id) = event_id {
            filter = filter.and(Filter::eq(EVENT_ID, event_id));
        }
        self.find_many(&filter).await
    }

    /// Every task left active by a claim that never completed.
    pub async fn get_restarted(&self) -> Result<Vec<Task>, CoreError> {
        self.find_many(&Filter::eq(EXEC_TIME, EXEC_TIME_ACTIVE)).await
    }

    /// Put every restarted task back in the queue at `exec_time`.
    ///
    /// Each task is reset through the atomic find-and-update, so concurrent
    /// sweeps never both requeue one task. Callers must only sweep when no
    /// live worker can still be processing a claimed task. Returns the
    /// requeued tasks as they now stand.
    pub async fn requeue_restarted(&self, exec_time: i64) -> Result<Vec<Task>, CoreError> {
        require_positive("exec_time", exec_time)?;

        let mut requeued = Vec::new();
        while let Some(doc) = self
            .store
            .find_and_update_atomic(
                &self.collection,
                &Filter::eq(EXEC_TIME, EXEC_TIME_ACTIVE),
                &Update::set(EXEC_TIME, exec_time),
                &Sort::Natural,
            )
            .await?
        {
            let mut task: Task = from_document(KIND, doc)?;
            task.exec_time = exec_time;
            tracing::warn!(task_id = %task.id, opcode = task.opcode, exec_time, "requeued restarted task");
            requeued.push(task);
        }
        Ok(requeued)
    }

    /// Insert a task exactly as given, preserving its id and every field.
    pub async fn store_as_is(&self, task: &Task) -> Result<(), CoreError> {
        self.store
            .insert(&self.collection, to_document(task)?)
            .await?;
        Ok(())
    }

    /// Every task in the collection, in id order.
    pub async fn all(&self) -> Result<Vec<Task>, CoreError> {
        let docs = self
            .store
            .find_many(&self.collection, &Filter::All, &Sort::Natural)
            .await?;
        docs.into_iter().map(|doc| from_document(KIND, doc)).collect()
    }

    async fn find_many(&self, filter: &Filter) -> Result<Vec<Task>, CoreError> {
        let docs = self
            .store
            .find_many(&self.collection, filter, &Sort::asc(EXEC_TIME))
            .await?;
        docs.into_iter().map(|doc| from_document(KIND, doc)).collect()
    }
}
