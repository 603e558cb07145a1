use aafs_core::clock::{format_millis, now_millis};
use aafs_core::relay::{RelayId, RelayItem};
use aafs_core::AafsConfig;
use clap::Subcommand;

use super::parse_details;
use crate::db::Database;
use crate::{print_json, OutputFormat};

#[derive(Subcommand)]
pub(crate) enum RelayCommands {
    /// Write an item, stamped with this server's relay stamp
    Put {
        /// Namespace, e.g. pdl or prm
        namespace: String,
        key: String,
        /// relay_time in epoch millis (default: now)
        #[arg(long)]
        time: Option<i64>,
        /// Payload as JSON
        #[arg(long)]
        details: Option<String>,
        /// Overwrite even if the stored item is newer
        #[arg(long)]
        force: bool,
    },

    /// Show one item by relay id
    Get { relay_id: String },

    /// List items, earliest relay_time first
    List {
        /// Relay id prefix, e.g. pdl_
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long)]
        from: Option<i64>,
        #[arg(long)]
        to: Option<i64>,
    },

    /// Remove an item
    Delete { relay_id: String },
}

pub(crate) async fn run(
    command: RelayCommands,
    db: &Database,
    config: &AafsConfig,
    output: OutputFormat,
) -> Result<bool, String> {
    let relays = &db.coordinator.relays;
    match command {
        RelayCommands::Put {
            namespace,
            key,
            time,
            details,
            force,
        } => {
            let relay_id = RelayId::new(&namespace, &key).map_err(|e| e.to_string())?;
            let candidate = RelayItem::new(
                &relay_id,
                time.unwrap_or_else(now_millis),
                parse_details(details.as_deref())?,
            );
            let outcome = relays
                .submit(candidate, force, config.server.relay_stamp)
                .await
                .map_err(|e| e.to_string())?;
            match output {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "relay_id": relay_id.to_string(),
                    "outcome": outcome.as_str(),
                }))?,
                OutputFormat::Text => println!("{} {}", relay_id, outcome.as_str()),
            }
            Ok(outcome.is_accepted())
        }
        RelayCommands::Get { relay_id } => {
            let item = relays
                .fetch(&relay_id)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("no relay item {}", relay_id))?;
            print_items(&[item], output)?;
            Ok(false)
        }
        RelayCommands::List { prefix, from, to } => {
            let items = relays
                .get_range(from, to, prefix.as_deref())
                .await
                .map_err(|e| e.to_string())?;
            print_items(&items, output)?;
            Ok(false)
        }
        RelayCommands::Delete { relay_id } => {
            let item = relays
                .fetch(&relay_id)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("no relay item {}", relay_id))?;
            relays.delete(&item).await.map_err(|e| e.to_string())?;
            match output {
                OutputFormat::Json => print_json(&serde_json::json!({ "deleted": relay_id }))?,
                OutputFormat::Text => println!("deleted {}", relay_id),
            }
            Ok(true)
        }
    }
}

fn print_items(items: &[RelayItem], output: OutputFormat) -> Result<(), String> {
    match output {
        OutputFormat::Json => print_json(items),
        OutputFormat::Text => {
            for item in items {
                println!(
                    "{}  {}  stamp={}  {}",
                    item.relay_id,
                    format_millis(item.relay_time),
                    item.relay_stamp,
                    item.details
                );
            }
            Ok(())
        }
    }
}
