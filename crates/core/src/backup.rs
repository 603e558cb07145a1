//! Tagged backup records and their JSON-lines file format.
//!
//! Each line is one record tagged by `"kind"`:
//!
//! ```text
//! {"kind":"task","_id":"...","exec_time":...}
//! {"kind":"alias_family","_id":"...","family_time":...}
//! {"kind":"relay_item","_id":"...","relay_id":"pdl_..."}
//! ```

use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};

use crate::alias::AliasFamily;
use crate::error::CoreError;
use crate::relay::RelayItem;
use crate::task::Task;

/// One stored entity of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackupRecord {
    Task(Task),
    AliasFamily(AliasFamily),
    RelayItem(RelayItem),
}

impl BackupRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            BackupRecord::Task(_) => "task",
            BackupRecord::AliasFamily(_) => "alias_family",
            BackupRecord::RelayItem(_) => "relay_item",
        }
    }
}

/// Write records one per line. Returns how many were written.
pub fn write_backup<'a, W, I>(mut writer: W, records: I) -> Result<usize, CoreError>
where
    W: Write,
    I: IntoIterator<Item = &'a BackupRecord>,
{
    let mut count = 0;
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

/// Read every record. Blank lines are skipped; a line that does not decode
/// fails the whole read and is reported by line number.
pub fn read_backup<R: BufRead>(reader: R) -> Result<Vec<BackupRecord>, CoreError> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| CoreError::CorruptRecord {
            kind: "backup",
            id: format!("line {}", index + 1),
            reason: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reports_bad_line_number() {
        let input = "\n{\"kind\":\"task\"}\n";
        let err = read_backup(input.as_bytes()).unwrap_err();
        match err {
            CoreError::CorruptRecord { id, .. } => assert_eq!(id, "line 2"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let input = json!({"kind": "catalog_snapshot", "_id": "x"}).to_string();
        assert!(read_backup(input.as_bytes()).is_err());
    }

    #[test]
    fn relay_item_line_carries_kind_tag() {
        let record: BackupRecord = serde_json::from_value(json!({
            "kind": "relay_item",
            "_id": "0000000000000000000000aa",
            "relay_id": "prm_us1",
            "relay_time": 5,
            "relay_stamp": -1,
            "details": {"a": 1}
        }))
        .unwrap();
        assert_eq!(record.kind(), "relay_item");

        let mut out = Vec::new();
        write_backup(&mut out, [&record]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("{\"kind\":\"relay_item\""));
        assert!(text.ends_with('\n'));
    }
}
