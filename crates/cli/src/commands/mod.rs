pub(crate) mod alias;
pub(crate) mod backup;
pub(crate) mod relay;
pub(crate) mod task;

pub(crate) use alias::AliasCommands;
pub(crate) use relay::RelayCommands;
pub(crate) use task::TaskCommands;

use aafs_store::DocId;
use serde_json::Value;

/// Parse a `--details` argument. Absent means `null`.
pub(crate) fn parse_details(details: Option<&str>) -> Result<Value, String> {
    match details {
        Some(text) => {
            serde_json::from_str(text).map_err(|e| format!("invalid --details JSON: {}", e))
        }
        None => Ok(Value::Null),
    }
}

pub(crate) fn parse_doc_id(text: &str) -> Result<DocId, String> {
    text.parse().map_err(|e: aafs_store::ParseDocIdError| e.to_string())
}

/// A comma-separated id list, e.g. `us7000abcd,ci40123`.
pub(crate) fn split_ids(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
