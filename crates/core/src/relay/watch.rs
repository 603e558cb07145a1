use aafs_store::{ChangeKind, ChangeStream, DocId};

use super::{RelayItem, KIND};
use crate::error::CoreError;
use crate::record::from_document;

/// A decoded relay change.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayChange {
    /// An item was inserted or replaced; carries its new state.
    Upserted(RelayItem),
    Deleted(DocId),
    /// The whole collection was dropped.
    Dropped,
}

/// Local relay changes that should be forwarded to the peer.
#[derive(Debug)]
pub struct RelayWatcher {
    stream: ChangeStream,
}

impl RelayWatcher {
    pub(crate) fn new(stream: ChangeStream) -> Self {
        RelayWatcher { stream }
    }

    /// Wait for the next change. `None` once the feed has ended.
    ///
    /// A lagged feed yields one error and continues; the caller should then
    /// resend everything with [`super::RelaySync::get_range`].
    pub async fn next(&mut self) -> Option<Result<RelayChange, CoreError>> {
        loop {
            let event = match self.stream.next().await? {
                Ok(event) => event,
                Err(e) => return Some(Err(e.into())),
            };
            let change = match (event.kind, event.document, event.id) {
                (ChangeKind::Insert | ChangeKind::Replace, Some(doc), _) => {
                    from_document(KIND, doc).map(RelayChange::Upserted)
                }
                (ChangeKind::Delete, _, Some(id)) => Ok(RelayChange::Deleted(id)),
                (ChangeKind::Drop, _, _) => Ok(RelayChange::Dropped),
                (kind, _, id) => {
                    tracing::warn!(?kind, ?id, "skipping incomplete relay change event");
                    continue;
                }
            };
            return Some(change);
        }
    }

    pub fn close(&mut self) {
        self.stream.close();
    }
}
