//! Relay synchronizer: current-state items replicated between two servers.
//!
//! Each item is keyed by a namespace-qualified `relay_id` and versioned by
//! `relay_time`. Both servers write into their own store and watch it; a
//! change seen on one side is re-applied on the other with the
//! [`RELAY_STAMP_FROM_PEER`] stamp, which the local watcher's filter drops so
//! the item does not bounce back.

mod sync;
mod watch;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use aafs_store::DocId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{require_non_empty, ValidationError};

pub use sync::{RelayCheck, RelayOutcome, RelaySync};
pub use watch::{RelayChange, RelayWatcher};

pub(crate) const KIND: &str = "relay_item";

/// Stamp given to items re-applied from the peer. Any local watcher opened
/// with a non-negative minimum stamp ignores them.
pub const RELAY_STAMP_FROM_PEER: i64 = -1;

/// Namespace of product-completion markers.
pub const NAMESPACE_PDL: &str = "pdl";
/// Namespace of analyst-supplied parameters.
pub const NAMESPACE_PRM: &str = "prm";

/// A parsed `<namespace>_<key>` relay id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelayId {
    namespace: String,
    key: String,
}

impl RelayId {
    /// The namespace must be non-empty and free of `_`; the key must be
    /// non-empty and may contain anything.
    pub fn new(namespace: &str, key: &str) -> Result<Self, ValidationError> {
        require_non_empty("namespace", namespace)?;
        require_non_empty("key", key)?;
        if namespace.contains('_') {
            return Err(ValidationError::InvalidRelayId(format!("{namespace}_{key}")));
        }
        Ok(RelayId {
            namespace: namespace.to_string(),
            key: key.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.namespace, self.key)
    }
}

impl FromStr for RelayId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('_') {
            Some((namespace, key)) if !namespace.is_empty() && !key.is_empty() => {
                Ok(RelayId {
                    namespace: namespace.to_string(),
                    key: key.to_string(),
                })
            }
            _ => Err(ValidationError::InvalidRelayId(s.to_string())),
        }
    }
}

/// One replicated current-state record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayItem {
    #[serde(rename = "_id")]
    pub id: DocId,
    pub relay_id: String,
    pub relay_time: i64,
    /// Who wrote the item locally. Missing on documents written before
    /// stamps existed.
    #[serde(default)]
    pub relay_stamp: i64,
    #[serde(default)]
    pub details: Value,
}

impl RelayItem {
    /// A fresh candidate item. Its stamp is set when it is committed.
    pub fn new(relay_id: &RelayId, relay_time: i64, details: Value) -> Self {
        RelayItem {
            id: DocId::new(),
            relay_id: relay_id.to_string(),
            relay_time,
            relay_stamp: 0,
            details,
        }
    }

    pub fn parsed_id(&self) -> Result<RelayId, ValidationError> {
        self.relay_id.parse()
    }

    /// Total order over item versions: `relay_time`, then `relay_id`, then
    /// `details` by canonical JSON text. Ignores the store id and stamp.
    pub fn compare(&self, other: &RelayItem) -> Ordering {
        self.relay_time
            .cmp(&other.relay_time)
            .then_with(|| self.relay_id.cmp(&other.relay_id))
            .then_with(|| canonical(&self.details).cmp(&canonical(&other.details)))
    }
}

/// Object keys render sorted, so equal values give equal text.
fn canonical(value: &Value) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn relay_id_round_trips_and_splits_at_first_underscore() {
        let id = RelayId::new(NAMESPACE_PDL, "us7000abcd_v2").unwrap();
        assert_eq!(id.to_string(), "pdl_us7000abcd_v2");
        let back: RelayId = "pdl_us7000abcd_v2".parse().unwrap();
        assert_eq!(back, id);
        assert_eq!(back.key(), "us7000abcd_v2");
    }

    #[test]
    fn relay_id_rejects_malformed_input() {
        assert!("nounderscore".parse::<RelayId>().is_err());
        assert!("_key".parse::<RelayId>().is_err());
        assert!("ns_".parse::<RelayId>().is_err());
        assert!(RelayId::new("a_b", "k").is_err());
        assert!(RelayId::new("", "k").is_err());
    }

    #[test]
    fn compare_orders_by_time_then_id_then_details() {
        let a = RelayId::new(NAMESPACE_PRM, "a").unwrap();
        let b = RelayId::new(NAMESPACE_PRM, "b").unwrap();
        let base = RelayItem::new(&a, 10, json!({"x": 1}));

        assert_eq!(
            base.compare(&RelayItem::new(&a, 11, json!({"x": 0}))),
            Ordering::Less
        );
        assert_eq!(
            base.compare(&RelayItem::new(&b, 10, json!({"x": 0}))),
            Ordering::Less
        );
        assert_eq!(
            base.compare(&RelayItem::new(&a, 10, json!({"x": 2}))),
            Ordering::Less
        );
        // Different store id and stamp, same version.
        let mut twin = RelayItem::new(&a, 10, json!({"x": 1}));
        twin.relay_stamp = 7;
        assert_eq!(base.compare(&twin), Ordering::Equal);
    }

    #[test]
    fn canonical_details_ignore_key_order() {
        let a = RelayId::new(NAMESPACE_PRM, "a").unwrap();
        let left = RelayItem::new(&a, 1, json!({"b": 1, "a": 2}));
        let right = RelayItem::new(&a, 1, serde_json::from_str(r#"{"a":2,"b":1}"#).unwrap());
        assert_eq!(left.compare(&right), Ordering::Equal);
    }
}
