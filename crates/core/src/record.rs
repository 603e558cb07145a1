//! Conversion between typed records and store documents.

use aafs_store::{Document, ID_FIELD};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::CoreError;

pub(crate) fn to_document<T: Serialize>(record: &T) -> Result<Document, CoreError> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(CoreError::Codec(serde::ser::Error::custom(format!(
            "record serialized to {other}, expected an object"
        )))),
    }
}

pub(crate) fn from_document<T: DeserializeOwned>(
    kind: &'static str,
    doc: Document,
) -> Result<T, CoreError> {
    let id = doc
        .get(ID_FIELD)
        .and_then(Value::as_str)
        .unwrap_or("<no id>")
        .to_string();
    serde_json::from_value(Value::Object(doc)).map_err(|e| CoreError::CorruptRecord {
        kind,
        id,
        reason: e.to_string(),
    })
}

/// Build a document holding just the given field assignments.
pub(crate) fn fields<const N: usize>(pairs: [(&str, Value); N]) -> Document {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
