//! In-memory event log.

use crate::error::Result;
use crate::types::{Clock, Message, SystemClock};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::RwLock;
use std::time::Duration;

use super::{Criteria, LoadOptions, MessageStream, Store};

/// Append-only log state.
struct Log {
    /// Messages in index order.
    messages: Vec<(u64, Message)>,
    /// Next index to assign.
    next_index: u64,
}

/// An event log held in memory.
///
/// Indices start at 1. Appends wake one pending [`Store::wait`] call.
pub struct InMemoryStore {
    log: RwLock<Log>,
    clock: Box<dyn Clock>,
    /// Capacity 1: a pending wake-up is enough, extra ones are dropped.
    notify_tx: Sender<()>,
    notify_rx: Receiver<()>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Create a store that stamps `recorded_on` from `clock`.
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        let (notify_tx, notify_rx) = bounded(1);
        Self {
            log: RwLock::new(Log {
                messages: Vec::new(),
                next_index: 1,
            }),
            clock: Box::new(clock),
            notify_tx,
            notify_rx,
        }
    }

    /// Append messages, returning their indices.
    ///
    /// Messages without a `recorded_on` header get the current time.
    pub fn append(&self, messages: impl IntoIterator<Item = Message>) -> Result<Vec<u64>> {
        let now = self.clock.now();
        let mut indices = Vec::new();

        {
            let mut log = self.log.write();
            for mut message in messages {
                if message.recorded_on().is_none() {
                    message.headers_mut().recorded_on = Some(now);
                }
                let index = log.next_index;
                log.next_index += 1;
                log.messages.push((index, message));
                indices.push(index);
            }
        }

        if !indices.is_empty() {
            let _ = self.notify_tx.try_send(());
        }

        Ok(indices)
    }

    /// Flag messages of an aggregate below `until_playhead` as archived.
    ///
    /// Returns how many messages changed.
    pub fn archive(&self, aggregate_name: &str, aggregate_id: &str, until_playhead: u64) -> usize {
        let mut log = self.log.write();
        let mut archived = 0;

        for (_, message) in log.messages.iter_mut() {
            let headers = message.headers_mut();
            if headers.archived
                || headers.aggregate_name.as_deref() != Some(aggregate_name)
                || headers.aggregate_id.as_deref() != Some(aggregate_id)
            {
                continue;
            }
            if matches!(headers.playhead, Some(playhead) if playhead < until_playhead) {
                headers.archived = true;
                archived += 1;
            }
        }

        archived
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        self.log.read().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for InMemoryStore {
    fn load(&self, criteria: &Criteria, options: LoadOptions) -> Result<MessageStream<'_>> {
        let log = self.log.read();

        let mut selected: Vec<(u64, Message)> = log
            .messages
            .iter()
            .filter(|(index, message)| criteria.matches(*index, message))
            .cloned()
            .collect();

        if options.backwards {
            selected.reverse();
        }

        let offset = options.offset.unwrap_or(0);
        let limit = options.limit.unwrap_or(usize::MAX);

        let page: Vec<_> = selected.into_iter().skip(offset).take(limit).collect();

        Ok(Box::new(page.into_iter().map(Ok)))
    }

    fn count(&self, criteria: &Criteria) -> Result<u64> {
        let log = self.log.read();
        Ok(log
            .messages
            .iter()
            .filter(|(index, message)| criteria.matches(*index, message))
            .count() as u64)
    }

    fn wait(&self, timeout: Duration) -> Result<()> {
        // Timing out just means nothing new arrived.
        let _ = self.notify_rx.recv_timeout(timeout);
        Ok(())
    }
}
