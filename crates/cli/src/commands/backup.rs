use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use aafs_core::{read_backup, write_backup};

use crate::db::Database;
use crate::{print_json, OutputFormat};

pub(crate) async fn cmd_backup(
    file: &Path,
    db: &Database,
    output: OutputFormat,
) -> Result<(), String> {
    let records = db
        .coordinator
        .export_all()
        .await
        .map_err(|e| e.to_string())?;
    let out = File::create(file)
        .map_err(|e| format!("could not create '{}': {}", file.display(), e))?;
    let count = write_backup(BufWriter::new(out), &records)
        .map_err(|e| format!("could not write '{}': {}", file.display(), e))?;
    report_count("backed up", "to", count, file, output)
}

/// Import into the current database. Records whose ids are already present
/// fail the restore and nothing is saved.
pub(crate) async fn cmd_restore(
    file: &Path,
    db: &Database,
    output: OutputFormat,
) -> Result<(), String> {
    let input =
        File::open(file).map_err(|e| format!("could not open '{}': {}", file.display(), e))?;
    let records = read_backup(BufReader::new(input))
        .map_err(|e| format!("could not read '{}': {}", file.display(), e))?;
    let count = db
        .coordinator
        .import_all(&records)
        .await
        .map_err(|e| e.to_string())?;
    report_count("restored", "from", count, file, output)
}

fn report_count(
    verb: &str,
    preposition: &str,
    count: usize,
    file: &Path,
    output: OutputFormat,
) -> Result<(), String> {
    match output {
        OutputFormat::Json => print_json(&serde_json::json!({
            "records": count,
            "file": file.display().to_string(),
        })),
        OutputFormat::Text => {
            println!("{} {} record(s) {} {}", verb, count, preposition, file.display());
            Ok(())
        }
    }
}
