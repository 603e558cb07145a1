use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::document::{DocId, Document, Filter};
use crate::error::StoreError;

/// The kind of mutation a [`ChangeEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Replace,
    Delete,
    /// The whole collection was dropped. Carries neither id nor document.
    Drop,
}

/// One entry of a collection's change feed.
///
/// Inserts and replaces carry the full resulting document; deletes carry
/// only the id.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub id: Option<DocId>,
    pub document: Option<Document>,
}

/// A filtered subscription to a collection's change feed.
///
/// The filter is evaluated against the event's document. Events without a
/// document are evaluated against an empty document, so a clause such as
/// `Exists(field, false)` lets deletes and drops through.
///
/// The stream is long-lived. Dropping it, or calling [`ChangeStream::close`],
/// releases the subscription.
#[derive(Debug)]
pub struct ChangeStream {
    collection: String,
    filter: Filter,
    receiver: Option<broadcast::Receiver<ChangeEvent>>,
}

impl ChangeStream {
    /// Wrap a broadcast receiver fed by a backend.
    pub fn new(
        collection: impl Into<String>,
        filter: Filter,
        receiver: broadcast::Receiver<ChangeEvent>,
    ) -> Self {
        ChangeStream {
            collection: collection.into(),
            filter,
            receiver: Some(receiver),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }

    /// Wait for the next event passing the filter.
    ///
    /// Returns `None` once the stream is closed or the backend stops
    /// publishing. A consumer that falls behind gets one
    /// `StoreError::FeedLagged` and then continues from the oldest retained
    /// event.
    pub async fn next(&mut self) -> Option<Result<ChangeEvent, StoreError>> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(event) => {
                    if self.passes(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(collection = %self.collection, skipped, "change feed lagged");
                    return Some(Err(StoreError::FeedLagged {
                        collection: self.collection.clone(),
                        skipped,
                    }));
                }
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Non-blocking variant of [`ChangeStream::next`]: `None` when no
    /// matching event is buffered right now.
    pub fn try_next(&mut self) -> Option<Result<ChangeEvent, StoreError>> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.try_recv() {
                Ok(event) => {
                    if self.passes(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    return Some(Err(StoreError::FeedLagged {
                        collection: self.collection.clone(),
                        skipped,
                    }));
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Release the subscription. Further calls to `next` return `None`.
    pub fn close(&mut self) {
        self.receiver = None;
    }

    fn passes(&self, event: &ChangeEvent) -> bool {
        match &event.document {
            Some(doc) => self.filter.matches(doc),
            None => self.filter.matches(&Document::new()),
        }
    }
}
