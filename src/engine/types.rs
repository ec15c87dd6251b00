//! Engine configuration, criteria and results.

use crate::subscriber::SubscriberAccessor;
use crate::subscription::{CapturedError, Status, SubscriptionCriteria};

/// Tuning knobs for [`SubscriptionEngine`](super::SubscriptionEngine).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Persist positions every this many messages while streaming.
    /// Default: None (only at the end of a window or when the limit is hit)
    pub flush_interval: Option<usize>,

    /// Turn panics in subscriber code into subscription errors.
    /// Default: true
    pub catch_panics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_interval: None,
            catch_panics: true,
        }
    }
}

/// Restricts an engine operation to some subscribers. `None` fields match
/// everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionEngineCriteria {
    pub ids: Option<Vec<String>>,
    pub groups: Option<Vec<String>>,
}

impl SubscriptionEngineCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = Some(groups.into_iter().map(Into::into).collect());
        self
    }

    pub fn matches_accessor(&self, accessor: &dyn SubscriberAccessor) -> bool {
        if let Some(ref ids) = self.ids {
            if !ids.iter().any(|id| id == accessor.id()) {
                return false;
            }
        }

        if let Some(ref groups) = self.groups {
            if !groups.iter().any(|group| group == accessor.group()) {
                return false;
            }
        }

        true
    }

    /// The equivalent subscription store filter, limited to `statuses`.
    pub(crate) fn with_statuses(&self, statuses: &[Status]) -> SubscriptionCriteria {
        SubscriptionCriteria {
            statuses: Some(statuses.to_vec()),
            ..SubscriptionCriteria::from(self)
        }
    }
}

impl From<&SubscriptionEngineCriteria> for SubscriptionCriteria {
    fn from(criteria: &SubscriptionEngineCriteria) -> Self {
        SubscriptionCriteria {
            ids: criteria.ids.clone(),
            groups: criteria.groups.clone(),
            statuses: None,
        }
    }
}

/// A subscriber failure the engine caught and recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionFailure {
    pub subscription_id: String,
    pub error: CapturedError,
}

impl SubscriptionFailure {
    pub fn new(subscription_id: impl Into<String>, error: CapturedError) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            error,
        }
    }
}

/// Outcome of `boot` or `run`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessedResult {
    /// Messages read from the store.
    pub processed_messages: usize,

    /// False when the limit stopped the window early.
    pub finished: bool,

    /// Failures recorded during the call, in order.
    pub errors: Vec<SubscriptionFailure>,
}

impl ProcessedResult {
    pub fn new(processed_messages: usize, finished: bool, errors: Vec<SubscriptionFailure>) -> Self {
        Self {
            processed_messages,
            finished,
            errors,
        }
    }

    /// Nothing to do.
    pub fn idle(errors: Vec<SubscriptionFailure>) -> Self {
        Self::new(0, true, errors)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
