//! The persisted subscription record and its state machine.

use crate::error::{EngineError, Result};
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::{CapturedError, SubscriptionError};

/// Group assigned when a subscriber does not declare one.
pub const DEFAULT_GROUP: &str = "default";

/// Lifecycle state of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Discovered, not yet set up.
    New,
    /// Replaying history.
    Booting,
    /// Caught up, following new messages.
    Active,
    /// Stopped by an operator.
    Paused,
    /// A `Once` subscription that consumed everything.
    Finished,
    /// Its subscriber no longer exists.
    Outdated,
    /// A handler failed.
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::New => "new",
            Status::Booting => "booting",
            Status::Active => "active",
            Status::Paused => "paused",
            Status::Finished => "finished",
            Status::Outdated => "outdated",
            Status::Error => "error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a subscription starts consuming.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Replay the whole log, then follow it.
    #[default]
    FromBeginning,
    /// Skip history, follow only messages appended after booting.
    FromNow,
    /// Replay the log once, then finish.
    Once,
}

/// Persisted progress of one subscriber.
///
/// Owned by the engine for the duration of an operation; stores only copy
/// it in and out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    id: String,
    group: String,
    run_mode: RunMode,
    status: Status,
    /// Index of the last processed message.
    position: u64,
    error: Option<SubscriptionError>,
    retry_attempt: u32,
    /// Set by the subscription store on every write.
    last_saved_at: Option<Timestamp>,
}

impl Subscription {
    /// A `New` subscription in the default group.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            group: DEFAULT_GROUP.to_string(),
            run_mode: RunMode::FromBeginning,
            status: Status::New,
            position: 0,
            error: None,
            retry_attempt: 0,
            last_saved_at: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_run_mode(mut self, run_mode: RunMode) -> Self {
        self.run_mode = run_mode;
        self
    }

    /// Restore a persisted status.
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_position(mut self, position: u64) -> Self {
        self.position = position;
        self
    }

    pub fn with_error(mut self, error: SubscriptionError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_retry_attempt(mut self, retry_attempt: u32) -> Self {
        self.retry_attempt = retry_attempt;
        self
    }

    pub fn with_last_saved_at(mut self, at: Timestamp) -> Self {
        self.last_saved_at = Some(at);
        self
    }

    // --- Accessors ---

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn subscription_error(&self) -> Option<&SubscriptionError> {
        self.error.as_ref()
    }

    pub fn retry_attempt(&self) -> u32 {
        self.retry_attempt
    }

    pub fn last_saved_at(&self) -> Option<Timestamp> {
        self.last_saved_at
    }

    pub fn is_new(&self) -> bool {
        self.status == Status::New
    }

    pub fn is_booting(&self) -> bool {
        self.status == Status::Booting
    }

    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }

    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }

    // --- Transitions ---

    /// Advance to `index`. Never moves backwards.
    pub fn change_position(&mut self, index: u64) {
        if index > self.position {
            self.position = index;
        }
    }

    pub fn booting(&mut self) {
        self.settle(Status::Booting);
    }

    pub fn active(&mut self) {
        self.settle(Status::Active);
    }

    pub fn finished(&mut self) {
        self.settle(Status::Finished);
    }

    pub fn outdated(&mut self) {
        self.settle(Status::Outdated);
    }

    /// Stop processing. Keeps position, error and retry count.
    pub fn pause(&mut self) {
        self.status = Status::Paused;
    }

    /// Record a failure, remembering the status it happened in.
    pub fn fail(&mut self, error: CapturedError) {
        let previous = match (&self.error, self.status) {
            (Some(existing), Status::Error) => existing.previous_status,
            (_, status) => status,
        };
        self.error = Some(SubscriptionError::from_captured(previous, error));
        self.status = Status::Error;
    }

    /// Leave `Error` for another attempt: back to the status it failed in,
    /// counting the attempt.
    pub fn do_retry(&mut self) -> Result<()> {
        let error = self
            .error
            .take()
            .ok_or_else(|| EngineError::NoErrorToRetry(self.id.clone()))?;

        self.retry_attempt += 1;
        self.status = error.previous_status;
        Ok(())
    }

    /// Operator reset: an errored subscription returns to the status it
    /// failed in, anything else becomes `Active`.
    pub fn reactivate(&mut self) {
        let status = match (&self.error, self.status) {
            (Some(error), Status::Error) => error.previous_status,
            _ => Status::Active,
        };
        self.settle(status);
    }

    /// Enter a non-error status, dropping error and retry state.
    fn settle(&mut self, status: Status) {
        self.status = status;
        self.error = None;
        self.retry_attempt = 0;
    }

    /// Stamp the last write. Called by subscription stores.
    pub fn mark_saved(&mut self, at: Timestamp) {
        self.last_saved_at = Some(at);
    }

    /// Forget the retry count after a clean cycle.
    pub(crate) fn reset_retry_attempt(&mut self) {
        self.retry_attempt = 0;
    }
}
