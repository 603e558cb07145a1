mod commands;
mod db;

use std::path::PathBuf;
use std::process;

use aafs_core::observability::{init_logging, server_span};
use aafs_core::{read_config, AafsConfig};
use clap::{Parser, Subcommand, ValueEnum};

use commands::{AliasCommands, RelayCommands, TaskCommands};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Administer an AAFS coordination database.
#[derive(Parser)]
#[command(name = "aafs", version, about = "AAFS coordination core administration")]
struct Cli {
    /// Database file (JSON lines); created on first write
    #[arg(long, global = true, default_value = "aafs.jsonl")]
    db: PathBuf,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and manipulate the task queue
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },

    /// Query and reconcile alias families
    Alias {
        #[command(subcommand)]
        command: AliasCommands,
    },

    /// Read and write relay items
    Relay {
        #[command(subcommand)]
        command: RelayCommands,
    },

    /// Write every record of the database to a backup file
    Backup {
        /// Destination file (JSON lines)
        file: PathBuf,
    },

    /// Load records from a backup file into the database
    Restore {
        /// Source file (JSON lines)
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match read_config(path) {
            Ok(c) => c,
            Err(e) => {
                report_error(&format!("error: {}", e), cli.output);
                process::exit(1);
            }
        },
        None => AafsConfig::default(),
    };
    init_logging(config.logging.format, &config.logging.filter);

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("error: could not start runtime: {}", e), cli.output);
            process::exit(1);
        }
    };

    let span = server_span(config.server.server_number);
    let _guard = span.enter();
    if let Err(msg) = rt.block_on(run(cli.command, &cli.db, &config, cli.output)) {
        report_error(&format!("error: {}", msg), cli.output);
        process::exit(1);
    }
}

async fn run(
    command: Commands,
    db_path: &std::path::Path,
    config: &AafsConfig,
    output: OutputFormat,
) -> Result<(), String> {
    let db = db::Database::open(db_path, config).await?;
    let dirty = match command {
        Commands::Task { command } => commands::task::run(command, &db, config, output).await?,
        Commands::Alias { command } => commands::alias::run(command, &db, output).await?,
        Commands::Relay { command } => commands::relay::run(command, &db, config, output).await?,
        Commands::Backup { file } => {
            commands::backup::cmd_backup(&file, &db, output).await?;
            false
        }
        Commands::Restore { file } => {
            commands::backup::cmd_restore(&file, &db, output).await?;
            true
        }
    };
    if dirty {
        db.save().await?;
    }
    Ok(())
}

pub(crate) fn report_error(msg: &str, output: OutputFormat) {
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}

/// Print a serializable value as pretty JSON.
pub(crate) fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", text);
    Ok(())
}
