use aafs_store::StoreError;

/// A request was malformed. Raised before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: i64 },

    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: i64 },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    /// The same timeline id appears twice in one assignment list.
    #[error("duplicate timeline id: {0}")]
    DuplicateTimelineId(String),

    /// The same Comcat id is bound to two timelines, or listed twice.
    #[error("duplicate comcat id: {0}")]
    DuplicateComcatId(String),

    #[error("comcat id {comcat_id} is both current and removed for timeline {timeline_id}")]
    CurrentAndRemoved {
        timeline_id: String,
        comcat_id: String,
    },

    #[error("invalid relay id '{0}': expected <namespace>_<key>")]
    InvalidRelayId(String),

    /// Advancing a stored time by one would overflow `i64`.
    #[error("{field} cannot be advanced past {value}")]
    TimeOverflow { field: &'static str, value: i64 },
}

/// All errors returned by the coordination core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Store failures propagate unchanged; the core never retries.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored document could not be decoded into its record type.
    #[error("corrupt {kind} record {id}: {reason}")]
    CorruptRecord {
        kind: &'static str,
        id: String,
        reason: String,
    },

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn is_validation(&self) -> bool {
        matches!(self, CoreError::Validation(_))
    }
}

/// `value + 1`, or `TimeOverflow` at `i64::MAX`.
pub(crate) fn next_time(field: &'static str, value: i64) -> Result<i64, ValidationError> {
    value
        .checked_add(1)
        .ok_or(ValidationError::TimeOverflow { field, value })
}

pub(crate) fn require_positive(field: &'static str, value: i64) -> Result<(), ValidationError> {
    if value > 0 {
        Ok(())
    } else {
        Err(ValidationError::NotPositive { field, value })
    }
}

pub(crate) fn require_non_negative(field: &'static str, value: i64) -> Result<(), ValidationError> {
    if value >= 0 {
        Ok(())
    } else {
        Err(ValidationError::Negative { field, value })
    }
}

pub(crate) fn require_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        Err(ValidationError::Empty { field })
    } else {
        Ok(())
    }
}
