//! Event store boundary.
//!
//! The engine only ever reads the log: it streams messages from a position
//! forward during catch-up, and peeks at the newest message to start
//! `FromNow` subscriptions. Appending belongs to the aggregate side and is
//! exposed by concrete stores only.

mod memory;

pub use memory::InMemoryStore;

use crate::error::Result;
use crate::types::Message;
use std::sync::Arc;
use std::time::Duration;

/// Filter applied to a load or count.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Criteria {
    /// Only messages of this aggregate type.
    pub aggregate_name: Option<String>,

    /// Only messages of this aggregate instance.
    pub aggregate_id: Option<String>,

    /// Only messages with a playhead strictly greater than this.
    pub from_playhead: Option<u64>,

    /// Only archived (`Some(true)`) or live (`Some(false)`) messages.
    pub archived: Option<bool>,

    /// Only messages with an index strictly greater than this.
    pub from_index: Option<u64>,
}

impl Criteria {
    /// Everything after `index`.
    pub fn from_index(index: u64) -> Self {
        Self {
            from_index: Some(index),
            ..Default::default()
        }
    }

    /// All messages of one aggregate instance.
    pub fn aggregate(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            aggregate_name: Some(name.into()),
            aggregate_id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Check whether a stored message passes this filter.
    pub fn matches(&self, index: u64, message: &Message) -> bool {
        let headers = message.headers();

        if let Some(ref name) = self.aggregate_name {
            if headers.aggregate_name.as_ref() != Some(name) {
                return false;
            }
        }

        if let Some(ref id) = self.aggregate_id {
            if headers.aggregate_id.as_ref() != Some(id) {
                return false;
            }
        }

        if let Some(from) = self.from_playhead {
            match headers.playhead {
                Some(playhead) if playhead > from => {}
                _ => return false,
            }
        }

        if let Some(archived) = self.archived {
            if headers.archived != archived {
                return false;
            }
        }

        if let Some(from) = self.from_index {
            if index <= from {
                return false;
            }
        }

        true
    }
}

/// Paging and direction for a load.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Max messages to return (None = all).
    pub limit: Option<usize>,

    /// Messages to skip after ordering.
    pub offset: Option<usize>,

    /// Newest first.
    pub backwards: bool,
}

impl LoadOptions {
    /// Only the newest message.
    pub fn latest() -> Self {
        Self {
            limit: Some(1),
            offset: None,
            backwards: true,
        }
    }
}

/// Ordered `(index, message)` pairs. Indices increase (or decrease when
/// loading backwards) but need not be contiguous.
pub type MessageStream<'a> = Box<dyn Iterator<Item = Result<(u64, Message)>> + 'a>;

/// Read side of the event log.
pub trait Store: Send + Sync {
    /// Stream messages matching `criteria`.
    fn load(&self, criteria: &Criteria, options: LoadOptions) -> Result<MessageStream<'_>>;

    /// Count messages matching `criteria`.
    fn count(&self, criteria: &Criteria) -> Result<u64>;

    /// Block until new messages may be available or the timeout passes.
    ///
    /// Stores without change notification just sleep.
    fn wait(&self, timeout: Duration) -> Result<()> {
        std::thread::sleep(timeout);
        Ok(())
    }
}

impl<S: Store + ?Sized> Store for Arc<S> {
    fn load(&self, criteria: &Criteria, options: LoadOptions) -> Result<MessageStream<'_>> {
        (**self).load(criteria, options)
    }

    fn count(&self, criteria: &Criteria) -> Result<u64> {
        (**self).count(criteria)
    }

    fn wait(&self, timeout: Duration) -> Result<()> {
        (**self).wait(timeout)
    }
}
