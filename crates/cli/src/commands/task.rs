use aafs_core::clock::{format_millis, now_millis};
use aafs_core::task::{opcode_name, Task, TaskSubmission};
use aafs_core::AafsConfig;
use clap::Subcommand;

use super::{parse_details, parse_doc_id};
use crate::db::Database;
use crate::{print_json, OutputFormat};

#[derive(Subcommand)]
pub(crate) enum TaskCommands {
    /// Queue a new task
    Submit {
        /// Opcode (0 no_op, 1 shutdown, 2 gen_forecast, 3 alias_split, 4 relay_publish)
        #[arg(long)]
        opcode: i32,
        /// Execution time in epoch millis (default: now)
        #[arg(long)]
        sched_time: Option<i64>,
        /// Event the task concerns
        #[arg(long)]
        event_id: Option<String>,
        #[arg(long, default_value = "0")]
        stage: i32,
        /// Payload as JSON
        #[arg(long)]
        details: Option<String>,
        /// Submitter id (default: server<N> from the configuration)
        #[arg(long)]
        submit_id: Option<String>,
    },

    /// List queued and active tasks
    List {
        #[arg(long)]
        event_id: Option<String>,
        /// Lowest exec_time, inclusive
        #[arg(long)]
        from: Option<i64>,
        /// Highest exec_time, inclusive
        #[arg(long)]
        to: Option<i64>,
    },

    /// Claim the first task due at the cutoff, leaving it active
    Claim {
        /// Cutoff in epoch millis (default: now)
        #[arg(long)]
        cutoff: Option<i64>,
    },

    /// Reschedule a task
    Stage {
        /// Task id (24 hex digits)
        id: String,
        #[arg(long)]
        exec_time: i64,
        #[arg(long)]
        stage: i32,
        #[arg(long)]
        event_id: Option<String>,
    },

    /// Remove a task
    Delete {
        /// Task id (24 hex digits)
        id: String,
    },

    /// List tasks whose claim never completed
    Restarted,

    /// Put every restarted task back in the queue
    Requeue {
        /// New exec_time in epoch millis (default: now)
        #[arg(long)]
        exec_time: Option<i64>,
    },
}

/// Run a task subcommand. Returns whether the database changed.
pub(crate) async fn run(
    command: TaskCommands,
    db: &Database,
    config: &AafsConfig,
    output: OutputFormat,
) -> Result<bool, String> {
    let queue = &db.coordinator.tasks;
    match command {
        TaskCommands::Submit {
            opcode,
            sched_time,
            event_id,
            stage,
            details,
            submit_id,
        } => {
            let now = now_millis();
            let submit_id = submit_id.unwrap_or_else(|| config.server.submit_id());
            let mut submission =
                TaskSubmission::new(opcode, sched_time.unwrap_or(now), now, submit_id)
                    .stage(stage)
                    .details(parse_details(details.as_deref())?);
            if let Some(event_id) = event_id {
                submission = submission.event_id(event_id);
            }
            let task = queue.submit(submission).await.map_err(|e| e.to_string())?;
            print_tasks(&[task], output)?;
            Ok(true)
        }
        TaskCommands::List {
            event_id,
            from,
            to,
        } => {
            let tasks = queue
                .get_range(from, to, event_id.as_deref())
                .await
                .map_err(|e| e.to_string())?;
            print_tasks(&tasks, output)?;
            Ok(false)
        }
        TaskCommands::Claim { cutoff } => {
            let claimed = queue
                .activate_first_ready(cutoff.unwrap_or_else(now_millis))
                .await
                .map_err(|e| e.to_string())?;
            match claimed {
                Some(task) => {
                    print_tasks(&[task], output)?;
                    Ok(true)
                }
                None => {
                    match output {
                        OutputFormat::Text => println!("no task ready"),
                        OutputFormat::Json => println!("null"),
                    }
                    Ok(false)
                }
            }
        }
        TaskCommands::Stage {
            id,
            exec_time,
            stage,
            event_id,
        } => {
            let task = find(db, &id).await?;
            queue
                .stage(&task, exec_time, stage, event_id.as_deref())
                .await
                .map_err(|e| e.to_string())?;
            let staged = find(db, &id).await?;
            print_tasks(&[staged], output)?;
            Ok(true)
        }
        TaskCommands::Delete { id } => {
            let task = find(db, &id).await?;
            queue.delete(&task).await.map_err(|e| e.to_string())?;
            if output == OutputFormat::Json {
                print_json(&serde_json::json!({ "deleted": id }))?;
            } else {
                println!("deleted {}", id);
            }
            Ok(true)
        }
        TaskCommands::Restarted => {
            let tasks = queue.get_restarted().await.map_err(|e| e.to_string())?;
            print_tasks(&tasks, output)?;
            Ok(false)
        }
        TaskCommands::Requeue { exec_time } => {
            let requeued = queue
                .requeue_restarted(exec_time.unwrap_or_else(now_millis))
                .await
                .map_err(|e| e.to_string())?;
            print_tasks(&requeued, output)?;
            Ok(!requeued.is_empty())
        }
    }
}

async fn find(db: &Database, id: &str) -> Result<Task, String> {
    db.coordinator
        .tasks
        .fetch_by_id(parse_doc_id(id)?)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("no task with id {}", id))
}

fn print_tasks(tasks: &[Task], output: OutputFormat) -> Result<(), String> {
    match output {
        OutputFormat::Json => print_json(tasks),
        OutputFormat::Text => {
            for task in tasks {
                let when = if task.is_restarted() {
                    "ACTIVE".to_string()
                } else {
                    format_millis(task.exec_time)
                };
                println!(
                    "{}  {}  {}({}) stage={} event={}",
                    task.id,
                    when,
                    opcode_name(task.opcode),
                    task.opcode,
                    task.stage,
                    if task.has_event() { task.event_id.as_str() } else { "-" },
                );
            }
            Ok(())
        }
    }
}
