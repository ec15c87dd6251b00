//! In-memory subscription store.

use crate::error::{EngineError, Result};
use crate::types::{Clock, SystemClock};
use parking_lot::{Mutex, RwLock};

use super::{LockableSubscriptionStore, SubscriptionCriteria, SubscriptionStore};
use crate::subscription::types::Subscription;

/// Subscriptions held in memory, in insertion order.
///
/// The lock only serializes callers inside this process.
pub struct InMemorySubscriptionStore {
    subscriptions: RwLock<Vec<Subscription>>,
    cycle_lock: Mutex<()>,
    clock: Box<dyn Clock>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            cycle_lock: Mutex::new(()),
            clock: Box::new(clock),
        }
    }

    /// Seed the store without stamping `last_saved_at`.
    pub fn with_subscriptions(self, subscriptions: impl IntoIterator<Item = Subscription>) -> Self {
        self.subscriptions.write().extend(subscriptions);
        self
    }

    /// Look up one subscription by id.
    pub fn get(&self, id: &str) -> Option<Subscription> {
        self.subscriptions
            .read()
            .iter()
            .find(|s| s.id() == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemorySubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionStore for InMemorySubscriptionStore {
    fn find(&self, criteria: &SubscriptionCriteria) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .read()
            .iter()
            .filter(|s| criteria.matches(s))
            .cloned()
            .collect())
    }

    fn add(&self, subscription: &mut Subscription) -> Result<()> {
        let mut subscriptions = self.subscriptions.write();
        if subscriptions.iter().any(|s| s.id() == subscription.id()) {
            return Err(EngineError::SubscriptionExists(subscription.id().to_string()));
        }

        subscription.mark_saved(self.clock.now());
        subscriptions.push(subscription.clone());
        Ok(())
    }

    fn update(&self, subscription: &mut Subscription) -> Result<()> {
        let mut subscriptions = self.subscriptions.write();
        let slot = subscriptions
            .iter_mut()
            .find(|s| s.id() == subscription.id())
            .ok_or_else(|| EngineError::SubscriptionNotFound(subscription.id().to_string()))?;

        subscription.mark_saved(self.clock.now());
        *slot = subscription.clone();
        Ok(())
    }

    fn remove(&self, subscription: &Subscription) -> Result<()> {
        self.subscriptions
            .write()
            .retain(|s| s.id() != subscription.id());
        Ok(())
    }

    fn as_lockable(&self) -> Option<&dyn LockableSubscriptionStore> {
        Some(self)
    }
}

impl LockableSubscriptionStore for InMemorySubscriptionStore {
    fn in_lock(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        let _guard = self.cycle_lock.lock();
        f()
    }
}
