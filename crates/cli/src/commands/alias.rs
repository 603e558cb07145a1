use aafs_core::alias::{
    AliasAssignment, AliasAssignmentList, AliasFamily, ComcatObservation, ReconcileOutcome,
};
use aafs_core::clock::{format_millis, now_millis};
use clap::Subcommand;

use super::split_ids;
use crate::db::Database;
use crate::{print_json, OutputFormat};

#[derive(Subcommand)]
pub(crate) enum AliasCommands {
    /// Show the timeline currently holding a Comcat id
    Resolve {
        comcat_id: String,
        /// Only consider snapshots at or before this family_time
        #[arg(long)]
        before: Option<i64>,
    },

    /// Show the active family snapshot for a Comcat id or timeline id
    Family {
        #[arg(long, conflicts_with = "timeline_id", required_unless_present = "timeline_id")]
        comcat_id: Option<String>,
        #[arg(long)]
        timeline_id: Option<String>,
        #[arg(long)]
        before: Option<i64>,
    },

    /// List snapshots, newest first
    History {
        /// Comcat ids (comma separated); any match selects a snapshot
        #[arg(long)]
        comcat_ids: Option<String>,
        #[arg(long)]
        timeline_id: Option<String>,
        #[arg(long)]
        from: Option<i64>,
        #[arg(long)]
        to: Option<i64>,
    },

    /// Fold current catalog groupings into their families
    Observe {
        /// One event's ids, primary first (comma separated); repeatable
        #[arg(long = "group", required = true)]
        groups: Vec<String>,
        /// Requested family_time in epoch millis (default: now)
        #[arg(long)]
        time: Option<i64>,
    },

    /// Write a snapshot from explicit bindings
    Submit {
        /// Binding as TIMELINE=ID,ID,...; repeatable
        #[arg(long = "timeline", required = true)]
        timelines: Vec<String>,
        #[arg(long)]
        time: Option<i64>,
    },
}

pub(crate) async fn run(
    command: AliasCommands,
    db: &Database,
    output: OutputFormat,
) -> Result<bool, String> {
    let aliases = &db.coordinator.aliases;
    match command {
        AliasCommands::Resolve { comcat_id, before } => {
            let lookup = aliases
                .resolve_comcat_id(&comcat_id, before)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("unknown comcat id {}", comcat_id))?;
            match output {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "comcat_id": lookup.comcat_id,
                    "family_id": lookup.family_id,
                    "family_time": lookup.family_time,
                    "timeline_id": lookup.timeline_id,
                    "primary_id": lookup.primary_id,
                    "timeline_comcat_ids": lookup.timeline_comcat_ids,
                }))?,
                OutputFormat::Text => match &lookup.timeline_id {
                    Some(timeline_id) => println!(
                        "{} -> {} (primary {}, ids {})",
                        lookup.comcat_id,
                        timeline_id,
                        lookup.primary_id.as_deref().unwrap_or("-"),
                        lookup.timeline_comcat_ids.join(", ")
                    ),
                    None => println!("{} -> unbound", lookup.comcat_id),
                },
            }
            Ok(false)
        }
        AliasCommands::Family {
            comcat_id,
            timeline_id,
            before,
        } => {
            let family = match (comcat_id, timeline_id) {
                (Some(id), _) => aliases.get_active_for_comcat_id(&id, before).await,
                (None, Some(id)) => aliases.get_active_for_timeline_id(&id, before).await,
                (None, None) => return Err("give --comcat-id or --timeline-id".to_string()),
            }
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "no matching family".to_string())?;
            print_families(&[family], output)?;
            Ok(false)
        }
        AliasCommands::History {
            comcat_ids,
            timeline_id,
            from,
            to,
        } => {
            let comcat_ids = comcat_ids.as_deref().map(split_ids).unwrap_or_default();
            let refs: Vec<&str> = comcat_ids.iter().map(String::as_str).collect();
            let families = aliases
                .get_range(from, to, timeline_id.as_deref(), &refs)
                .await
                .map_err(|e| e.to_string())?;
            print_families(&families, output)?;
            Ok(false)
        }
        AliasCommands::Observe { groups, time } => {
            let observations: Vec<ComcatObservation> = groups
                .iter()
                .map(|g| ComcatObservation::from_ids(split_ids(g)))
                .collect();
            let outcomes = aliases
                .reconcile(time.unwrap_or_else(now_millis), &observations)
                .await
                .map_err(|e| e.to_string())?;
            if output == OutputFormat::Json {
                let families: Vec<&AliasFamily> = outcomes.iter().map(|o| o.family()).collect();
                print_json(&families)?;
            } else {
                for outcome in &outcomes {
                    match outcome {
                        ReconcileOutcome::Unchanged(_) => println!("unchanged"),
                        ReconcileOutcome::Written { superseded, .. } => {
                            println!("written, superseding {} snapshot(s)", superseded)
                        }
                    }
                    print_families(std::slice::from_ref(outcome.family()), output)?;
                }
            }
            Ok(outcomes.iter().any(ReconcileOutcome::was_written))
        }
        AliasCommands::Submit { timelines, time } => {
            let list = timelines
                .iter()
                .map(|t| parse_binding(t))
                .collect::<Result<Vec<_>, _>>()
                .map(AliasAssignmentList::new)?;
            let family = aliases
                .submit_family(time.unwrap_or_else(now_millis), &list)
                .await
                .map_err(|e| e.to_string())?;
            print_families(&[family], output)?;
            Ok(true)
        }
    }
}

fn parse_binding(text: &str) -> Result<AliasAssignment, String> {
    let (timeline_id, ids) = text
        .split_once('=')
        .ok_or_else(|| format!("invalid binding '{}': expected TIMELINE=ID,ID,...", text))?;
    Ok(AliasAssignment::new(timeline_id.trim(), split_ids(ids)))
}

fn print_families(families: &[AliasFamily], output: OutputFormat) -> Result<(), String> {
    match output {
        OutputFormat::Json => print_json(families),
        OutputFormat::Text => {
            for family in families {
                println!(
                    "{}  family_time={} ({})",
                    family.id,
                    family.family_time,
                    format_millis(family.family_time)
                );
                let list = family.assignments().map_err(|e| e.to_string())?;
                for assignment in &list {
                    let mut line =
                        format!("  {}: {}", assignment.timeline_id, assignment.comcat_ids.join(", "));
                    if !assignment.removed_ids.is_empty() {
                        let removed: Vec<&str> =
                            assignment.removed_ids.iter().map(String::as_str).collect();
                        line.push_str(&format!(" (removed: {})", removed.join(", ")));
                    }
                    println!("{}", line);
                }
                let unbound = family.unbound_comcat_ids();
                if !unbound.is_empty() {
                    println!("  unbound: {}", unbound.join(", "));
                }
            }
            Ok(())
        }
    }
}
