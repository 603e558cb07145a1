use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Name of the field that carries a document's [`DocId`].
pub const ID_FIELD: &str = "_id";

/// A stored document: a JSON object whose `_id` field holds its [`DocId`].
pub type Document = serde_json::Map<String, Value>;

// ── DocId ─────────────────────────────────────────────────────────────────────

/// Opaque 12-byte document identifier, rendered as 24 lowercase hex digits.
///
/// Layout: 4-byte big-endian unix seconds, 5 bytes fixed per process, and a
/// 3-byte big-endian counter. Ids minted by one process sort in creation
/// order; stores use that order to break ties between equal sort keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocId([u8; 12]);

impl DocId {
    /// Mint a fresh id.
    pub fn new() -> Self {
        static PROCESS: OnceLock<[u8; 5]> = OnceLock::new();
        static COUNTER: OnceLock<AtomicU32> = OnceLock::new();

        let process = PROCESS.get_or_init(rand::random::<[u8; 5]>);
        let counter = COUNTER
            .get_or_init(|| AtomicU32::new(rand::random::<u32>() & 0x000f_ffff))
            .fetch_add(1, AtomicOrdering::Relaxed);
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(process);
        bytes[9..].copy_from_slice(&counter.to_be_bytes()[1..]);
        DocId(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        DocId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl Default for DocId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Error returned when parsing a [`DocId`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid document id '{0}': expected 24 hex digits")]
pub struct ParseDocIdError(String);

impl FromStr for DocId {
    type Err = ParseDocIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 24 || !s.is_ascii() {
            return Err(ParseDocIdError(s.to_string()));
        }
        let mut bytes = [0u8; 12];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[2 * i..2 * i + 2], 16)
                .map_err(|_| ParseDocIdError(s.to_string()))?;
        }
        Ok(DocId(bytes))
    }
}

impl Serialize for DocId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for DocId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Read the [`DocId`] of a document, if present and well formed.
pub(crate) fn doc_id(doc: &Document) -> Option<DocId> {
    doc.get(ID_FIELD)?.as_str()?.parse().ok()
}

// ── Value ordering ────────────────────────────────────────────────────────────

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over JSON values used for sorting and range filters.
///
/// Values of different kinds order by kind (null, numbers, strings, objects,
/// arrays, booleans). Integers compare exactly; other numbers as `f64`.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            Value::Object(x.clone()).to_string().cmp(&Value::Object(y.clone()).to_string())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Compare only when both values are of the same kind; range filters never
/// match across kinds.
fn compare_same_kind(a: &Value, b: &Value) -> Option<Ordering> {
    if type_rank(a) == type_rank(b) {
        Some(compare_values(a, b))
    } else {
        None
    }
}

// ── Filter ────────────────────────────────────────────────────────────────────

/// Predicate over top-level document fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    All,
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    /// Field value equals one of the listed values.
    In(String, Vec<Value>),
    /// Field is an array containing the value.
    Contains(String, Value),
    /// Field is present (`true`) or absent (`false`).
    Exists(String, bool),
    /// Field is a string starting with the prefix.
    Prefix(String, String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt(field.into(), value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt(field.into(), value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte(field.into(), value.into())
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Contains(field.into(), value.into())
    }

    pub fn exists(field: impl Into<String>, present: bool) -> Self {
        Filter::Exists(field.into(), present)
    }

    pub fn prefix(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Filter::Prefix(field.into(), prefix.into())
    }

    /// Match the document with the given id.
    pub fn id(id: DocId) -> Self {
        Filter::Eq(ID_FIELD.to_string(), Value::String(id.to_hex()))
    }

    /// Conjunction of `self` and `other`, flattening nested `And`s and
    /// dropping `All`.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, Filter::And(mut b)) => {
                b.insert(0, f);
                Filter::And(b)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    /// Evaluate the filter against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(f, v) => doc.get(f) == Some(v),
            Filter::Ne(f, v) => doc.get(f) != Some(v),
            Filter::Gt(f, v) => cmp_field(doc, f, v) == Some(Ordering::Greater),
            Filter::Gte(f, v) => matches!(
                cmp_field(doc, f, v),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Filter::Lt(f, v) => cmp_field(doc, f, v) == Some(Ordering::Less),
            Filter::Lte(f, v) => matches!(
                cmp_field(doc, f, v),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Filter::In(f, vs) => doc.get(f).is_some_and(|x| vs.contains(x)),
            Filter::Contains(f, v) => doc
                .get(f)
                .and_then(Value::as_array)
                .is_some_and(|arr| arr.contains(v)),
            Filter::Exists(f, present) => doc.contains_key(f) == *present,
            Filter::Prefix(f, p) => doc
                .get(f)
                .and_then(Value::as_str)
                .is_some_and(|s| s.starts_with(p.as_str())),
            Filter::And(fs) => fs.iter().all(|f| f.matches(doc)),
            Filter::Or(fs) => fs.iter().any(|f| f.matches(doc)),
        }
    }
}

fn cmp_field(doc: &Document, field: &str, value: &Value) -> Option<Ordering> {
    compare_same_kind(doc.get(field)?, value)
}

// ── Sort ──────────────────────────────────────────────────────────────────────

/// Result ordering. Equal keys (and `Natural`) fall back to ascending id order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Sort {
    #[default]
    Natural,
    Asc(String),
    Desc(String),
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Sort::Asc(field.into())
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Sort::Desc(field.into())
    }

    /// Compare two documents under this ordering. Missing fields sort first.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let by_key = match self {
            Sort::Natural => Ordering::Equal,
            Sort::Asc(f) => cmp_optional(a.get(f), b.get(f)),
            Sort::Desc(f) => cmp_optional(b.get(f), a.get(f)),
        };
        by_key.then_with(|| doc_id(a).cmp(&doc_id(b)))
    }
}

fn cmp_optional(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => compare_values(a, b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

// ── Update ────────────────────────────────────────────────────────────────────

/// Field assignments applied by `find_and_update_atomic`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Update {
    set: Vec<(String, Value)>,
}

impl Update {
    /// Start an update assigning `value` to `field`.
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Update::default().and_set(field, value)
    }

    pub fn and_set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.push((field.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Fields touched by this update.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.set.iter().map(|(f, _)| f.as_str())
    }

    /// Apply the assignments to `doc` in order.
    pub fn apply(&self, doc: &mut Document) {
        for (field, value) in &self.set {
            doc.insert(field.clone(), value.clone());
        }
    }
}

// ── IndexSpec ─────────────────────────────────────────────────────────────────

/// A single-field index. Unique indexes reject a second document holding the
/// same value; documents missing the field are not indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub field: String,
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(field: impl Into<String>) -> Self {
        let field = field.into();
        IndexSpec {
            name: format!("{field}_idx"),
            field,
            unique: false,
        }
    }

    pub fn unique(field: impl Into<String>) -> Self {
        IndexSpec {
            unique: true,
            ..IndexSpec::new(field)
        }
    }
}
