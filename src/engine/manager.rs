//! Unit of work over the subscription store.

use crate::error::Result;
use crate::subscription::{Subscription, SubscriptionCriteria, SubscriptionStore};

/// A tracked subscription and the copy last written to the store.
struct Entry {
    current: Subscription,
    /// `None` until the subscription has been added.
    persisted: Option<Subscription>,
}

impl Entry {
    fn is_dirty(&self) -> bool {
        self.persisted.as_ref() != Some(&self.current)
    }
}

/// Buffers subscription changes for one engine operation.
///
/// Writes happen on [`flush`](Self::flush), and only for subscriptions whose
/// state differs from what was last read or written.
pub(crate) struct SubscriptionManager<'a> {
    store: &'a dyn SubscriptionStore,
    entries: Vec<Entry>,
}

impl<'a> SubscriptionManager<'a> {
    pub fn new(store: &'a dyn SubscriptionStore) -> Self {
        Self {
            store,
            entries: Vec::new(),
        }
    }

    /// Load matching subscriptions. Pending changes win over stored state.
    pub fn find(&mut self, criteria: &SubscriptionCriteria) -> Result<Vec<Subscription>> {
        let found = self.store.find(criteria)?;
        let mut subscriptions = Vec::with_capacity(found.len());

        for subscription in found {
            match self.position(subscription.id()) {
                Some(i) => subscriptions.push(self.entries[i].current.clone()),
                None => {
                    subscriptions.push(subscription.clone());
                    self.entries.push(Entry {
                        current: subscription.clone(),
                        persisted: Some(subscription),
                    });
                }
            }
        }

        Ok(subscriptions)
    }

    /// Track a subscription that is not in the store yet.
    pub fn add(&mut self, subscription: Subscription) {
        match self.position(subscription.id()) {
            Some(i) => self.entries[i].current = subscription,
            None => self.entries.push(Entry {
                current: subscription,
                persisted: None,
            }),
        }
    }

    /// Record the latest state of a subscription. The save stamp stays the
    /// one the store last wrote.
    pub fn update(&mut self, subscription: &Subscription) {
        match self.position(subscription.id()) {
            Some(i) => {
                let current = &mut self.entries[i].current;
                let saved_at = current.last_saved_at();
                *current = subscription.clone();
                if let Some(at) = saved_at {
                    current.mark_saved(at);
                }
            }
            None => self.entries.push(Entry {
                current: subscription.clone(),
                persisted: Some(subscription.clone()),
            }),
        }
    }

    /// Delete from the store right away and stop tracking.
    pub fn remove(&mut self, subscription: &Subscription) -> Result<()> {
        self.store.remove(subscription)?;
        if let Some(i) = self.position(subscription.id()) {
            self.entries.remove(i);
        }
        Ok(())
    }

    /// Write pending changes. Returns how many subscriptions were written.
    pub fn flush(&mut self) -> Result<usize> {
        let mut written = 0;

        for entry in self.entries.iter_mut().filter(|e| e.is_dirty()) {
            match entry.persisted {
                None => self.store.add(&mut entry.current)?,
                Some(_) => self.store.update(&mut entry.current)?,
            }
            entry.persisted = Some(entry.current.clone());
            written += 1;
        }

        Ok(written)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.current.id() == id)
    }
}
