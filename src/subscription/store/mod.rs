//! Persistence boundary for subscriptions.

mod file;
mod memory;

pub use file::{FileSubscriptionStore, LockMode};
pub use memory::InMemorySubscriptionStore;

use crate::error::Result;
use std::sync::Arc;

use super::types::{Status, Subscription};

/// Filter for [`SubscriptionStore::find`]. `None` fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionCriteria {
    pub ids: Option<Vec<String>>,
    pub groups: Option<Vec<String>>,
    pub statuses: Option<Vec<Status>>,
}

impl SubscriptionCriteria {
    pub fn with_statuses(mut self, statuses: impl Into<Vec<Status>>) -> Self {
        self.statuses = Some(statuses.into());
        self
    }

    pub fn matches(&self, subscription: &Subscription) -> bool {
        if let Some(ref ids) = self.ids {
            if !ids.iter().any(|id| id == subscription.id()) {
                return false;
            }
        }

        if let Some(ref groups) = self.groups {
            if !groups.iter().any(|group| group == subscription.group()) {
                return false;
            }
        }

        if let Some(ref statuses) = self.statuses {
            if !statuses.contains(&subscription.status()) {
                return false;
            }
        }

        true
    }
}

/// Where subscriptions live between engine invocations.
///
/// `add` and `update` take the subscription mutably so the store can stamp
/// `last_saved_at`.
pub trait SubscriptionStore: Send + Sync {
    fn find(&self, criteria: &SubscriptionCriteria) -> Result<Vec<Subscription>>;

    fn add(&self, subscription: &mut Subscription) -> Result<()>;

    fn update(&self, subscription: &mut Subscription) -> Result<()>;

    fn remove(&self, subscription: &Subscription) -> Result<()>;

    /// The locking capability, if this store has one.
    fn as_lockable(&self) -> Option<&dyn LockableSubscriptionStore> {
        None
    }
}

/// A store that can serialize engine cycles across processes.
pub trait LockableSubscriptionStore: SubscriptionStore {
    /// Run `f` while holding the store's exclusive lock.
    fn in_lock(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()>;
}

impl<S: SubscriptionStore + ?Sized> SubscriptionStore for Arc<S> {
    fn find(&self, criteria: &SubscriptionCriteria) -> Result<Vec<Subscription>> {
        (**self).find(criteria)
    }

    fn add(&self, subscription: &mut Subscription) -> Result<()> {
        (**self).add(subscription)
    }

    fn update(&self, subscription: &mut Subscription) -> Result<()> {
        (**self).update(subscription)
    }

    fn remove(&self, subscription: &Subscription) -> Result<()> {
        (**self).remove(subscription)
    }

    fn as_lockable(&self) -> Option<&dyn LockableSubscriptionStore> {
        (**self).as_lockable()
    }
}
