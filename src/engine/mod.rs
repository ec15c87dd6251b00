//! The subscription engine.
//!
//! The engine keeps every subscriber's [`Subscription`] in step with the
//! event log:
//! - `boot` sets up new subscriptions and replays history to them
//! - `run` feeds newly appended messages to active subscriptions
//! - `teardown`, `remove`, `reactivate` and `pause` are operator actions
//!
//! Every operation first reconciles the registered subscribers with the
//! stored subscriptions, adding a `New` subscription for each subscriber
//! seen for the first time. When the subscription store can lock, each
//! operation runs inside its lock.
//!
//! Failures raised by subscriber code never escape an operation: the
//! subscription moves to `Error`, other subscriptions keep going, and the
//! failure is reported in the result. Store failures are returned as errors.
//!
//! # Example
//!
//! ```ignore
//! let engine = SubscriptionEngine::new(store, InMemorySubscriptionStore::new(), repository)
//!     .with_retry_strategy(ClockBasedRetryStrategy::default());
//!
//! let criteria = SubscriptionEngineCriteria::default();
//! engine.boot(&criteria, None)?;
//!
//! loop {
//!     let result = engine.run(&criteria, Some(100))?;
//!     for failure in &result.errors {
//!         eprintln!("{} failed: {}", failure.subscription_id, failure.error);
//!     }
//! }
//! ```

mod manager;
mod types;

pub use types::{EngineConfig, ProcessedResult, SubscriptionEngineCriteria, SubscriptionFailure};

use crate::error::{EngineError, Result};
use crate::retry::{ClockBasedRetryStrategy, RetryStrategy};
use crate::store::{Criteria, LoadOptions, Store};
use crate::subscriber::{SubscriberAccessor, SubscriberAccessorRepository};
use crate::subscription::{
    CapturedError, HandlerError, HandlerResult, RunMode, Status, Subscription,
    SubscriptionCriteria, SubscriptionStore,
};
use crate::types::Message;
use manager::SubscriptionManager;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Statuses `pause` applies to.
const PAUSABLE: [Status; 4] = [Status::New, Status::Booting, Status::Active, Status::Error];

/// Statuses `reactivate` applies to.
const REACTIVATABLE: [Status; 4] = [
    Status::Error,
    Status::Outdated,
    Status::Paused,
    Status::Finished,
];

/// A subscription being fed messages, with its subscriber.
struct Target {
    subscription: Subscription,
    accessor: Arc<dyn SubscriberAccessor>,
}

/// Drives subscriptions through catch-up, steady state and failure.
pub struct SubscriptionEngine {
    store: Box<dyn Store>,
    subscription_store: Box<dyn SubscriptionStore>,
    repository: Box<dyn SubscriberAccessorRepository>,
    retry_strategy: Box<dyn RetryStrategy>,
    config: EngineConfig,
}

impl SubscriptionEngine {
    /// Create an engine with the default clock based retry strategy.
    pub fn new(
        store: impl Store + 'static,
        subscription_store: impl SubscriptionStore + 'static,
        repository: impl SubscriberAccessorRepository + 'static,
    ) -> Self {
        Self {
            store: Box::new(store),
            subscription_store: Box::new(subscription_store),
            repository: Box::new(repository),
            retry_strategy: Box::new(ClockBasedRetryStrategy::default()),
            config: EngineConfig::default(),
        }
    }

    pub fn with_retry_strategy(mut self, retry_strategy: impl RetryStrategy + 'static) -> Self {
        self.retry_strategy = Box::new(retry_strategy);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The event store this engine reads.
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    // --- Operations ---

    /// Set up new subscriptions and replay history to booting ones.
    ///
    /// Booting subscriptions become `Active` (or `Finished` for `Once`)
    /// when the log is exhausted. With a `limit`, at most that many messages
    /// are read and the subscriptions stay `Booting` if more remain.
    pub fn boot(
        &self,
        criteria: &SubscriptionEngineCriteria,
        limit: Option<usize>,
    ) -> Result<ProcessedResult> {
        self.with_lock(|| {
            let mut manager = SubscriptionManager::new(self.subscription_store.as_ref());
            let mut errors = Vec::new();

            self.discover(&mut manager, criteria)?;
            self.retry(&mut manager, criteria, &[Status::New, Status::Booting])?;
            self.mark_detached(&mut manager, criteria, &[Status::New, Status::Booting])?;
            self.setup_new(&mut manager, criteria, &mut errors)?;

            let mut targets = self.targets(&mut manager, criteria, Status::Booting)?;
            if targets.is_empty() {
                debug!("no subscriptions to boot");
                return Ok(ProcessedResult::idle(errors));
            }

            let (processed, finished) =
                self.process(&mut manager, &mut targets, Status::Booting, limit, &mut errors)?;
            if !finished {
                return Ok(ProcessedResult::new(processed, false, errors));
            }

            for target in targets.iter_mut().filter(|t| t.subscription.is_booting()) {
                let subscription = &mut target.subscription;
                if subscription.run_mode() == RunMode::Once {
                    subscription.finished();
                    info!(
                        subscription_id = subscription.id(),
                        position = subscription.position(),
                        "subscription finished"
                    );
                } else {
                    subscription.active();
                    info!(
                        subscription_id = subscription.id(),
                        position = subscription.position(),
                        "subscription active"
                    );
                }
            }
            Self::persist(&mut manager, &targets)?;

            Ok(ProcessedResult::new(processed, true, errors))
        })
    }

    /// Feed new messages to active subscriptions.
    ///
    /// Errored subscriptions the retry strategy approves are put back into
    /// the status they failed in first.
    pub fn run(
        &self,
        criteria: &SubscriptionEngineCriteria,
        limit: Option<usize>,
    ) -> Result<ProcessedResult> {
        self.with_lock(|| {
            let mut manager = SubscriptionManager::new(self.subscription_store.as_ref());
            let mut errors = Vec::new();

            self.discover(&mut manager, criteria)?;
            self.retry(
                &mut manager,
                criteria,
                &[Status::New, Status::Booting, Status::Active],
            )?;
            self.mark_detached(
                &mut manager,
                criteria,
                &[Status::Active, Status::Paused, Status::Error],
            )?;

            let mut targets = self.targets(&mut manager, criteria, Status::Active)?;
            if targets.is_empty() {
                debug!("no active subscriptions");
                return Ok(ProcessedResult::idle(errors));
            }

            let (processed, finished) =
                self.process(&mut manager, &mut targets, Status::Active, limit, &mut errors)?;
            if !finished {
                return Ok(ProcessedResult::new(processed, false, errors));
            }

            for target in targets.iter_mut().filter(|t| t.subscription.is_active()) {
                let subscription = &mut target.subscription;
                if subscription.run_mode() == RunMode::Once {
                    subscription.finished();
                    info!(
                        subscription_id = subscription.id(),
                        position = subscription.position(),
                        "subscription finished"
                    );
                } else if subscription.retry_attempt() > 0 {
                    subscription.reset_retry_attempt();
                }
            }
            Self::persist(&mut manager, &targets)?;

            Ok(ProcessedResult::new(processed, true, errors))
        })
    }

    /// Run teardown hooks of outdated subscriptions. Subscriptions stay in
    /// the store; failed hooks are reported, not raised.
    pub fn teardown(&self, criteria: &SubscriptionEngineCriteria) -> Result<Vec<SubscriptionFailure>> {
        self.with_lock(|| {
            let mut manager = SubscriptionManager::new(self.subscription_store.as_ref());
            let mut failures = Vec::new();

            self.discover(&mut manager, criteria)?;

            for subscription in manager.find(&criteria.with_statuses(&[Status::Outdated]))? {
                let Some(accessor) = self.repository.get(subscription.id()) else {
                    warn!(
                        subscription_id = subscription.id(),
                        "subscriber not found, skipping teardown"
                    );
                    continue;
                };

                let Some(teardown) = accessor.teardown_method() else {
                    debug!(subscription_id = subscription.id(), "no teardown hook");
                    continue;
                };

                match self.call(|| teardown()) {
                    Ok(()) => info!(subscription_id = subscription.id(), "teardown done"),
                    Err(error) => {
                        failures.push(Self::teardown_failure(&subscription, &error));
                    }
                }
            }

            Ok(failures)
        })
    }

    /// Delete subscriptions, running their teardown hooks first when the
    /// subscriber still exists. Deletion happens even if the hook fails.
    pub fn remove(&self, criteria: &SubscriptionEngineCriteria) -> Result<Vec<SubscriptionFailure>> {
        self.with_lock(|| {
            let mut manager = SubscriptionManager::new(self.subscription_store.as_ref());
            let mut failures = Vec::new();

            self.discover(&mut manager, criteria)?;

            for subscription in manager.find(&SubscriptionCriteria::from(criteria))? {
                let accessor = self.repository.get(subscription.id());
                if let Some(teardown) = accessor.as_ref().and_then(|a| a.teardown_method()) {
                    if let Err(error) = self.call(|| teardown()) {
                        failures.push(Self::teardown_failure(&subscription, &error));
                    }
                }

                manager.remove(&subscription)?;
                info!(
                    subscription_id = subscription.id(),
                    status = %subscription.status(),
                    "subscription removed"
                );
            }

            Ok(failures)
        })
    }

    /// Put errored, outdated, paused and finished subscriptions back to work.
    ///
    /// Errored subscriptions return to the status they failed in; the others
    /// become `Active`. Subscriptions without a subscriber are left alone.
    pub fn reactivate(&self, criteria: &SubscriptionEngineCriteria) -> Result<()> {
        self.with_lock(|| {
            let mut manager = SubscriptionManager::new(self.subscription_store.as_ref());

            self.discover(&mut manager, criteria)?;

            for mut subscription in manager.find(&criteria.with_statuses(&REACTIVATABLE))? {
                if self.repository.get(subscription.id()).is_none() {
                    debug!(
                        subscription_id = subscription.id(),
                        "subscriber not found, not reactivating"
                    );
                    continue;
                }

                let from = subscription.status();
                subscription.reactivate();
                info!(
                    subscription_id = subscription.id(),
                    from = %from,
                    status = %subscription.status(),
                    "subscription reactivated"
                );
                manager.update(&subscription);
            }

            manager.flush()?;
            Ok(())
        })
    }

    /// Stop subscriptions. Position and error are kept.
    pub fn pause(&self, criteria: &SubscriptionEngineCriteria) -> Result<()> {
        self.with_lock(|| {
            let mut manager = SubscriptionManager::new(self.subscription_store.as_ref());

            self.discover(&mut manager, criteria)?;

            for mut subscription in manager.find(&criteria.with_statuses(&PAUSABLE))? {
                subscription.pause();
                info!(subscription_id = subscription.id(), "subscription paused");
                manager.update(&subscription);
            }

            manager.flush()?;
            Ok(())
        })
    }

    /// Current subscriptions, including ones for newly registered subscribers.
    pub fn subscriptions(&self, criteria: &SubscriptionEngineCriteria) -> Result<Vec<Subscription>> {
        self.with_lock(|| {
            let mut manager = SubscriptionManager::new(self.subscription_store.as_ref());
            self.discover(&mut manager, criteria)?;
            manager.find(&SubscriptionCriteria::from(criteria))
        })
    }

    // --- Phases ---

    /// Add a `New` subscription for every subscriber without one.
    fn discover(
        &self,
        manager: &mut SubscriptionManager<'_>,
        criteria: &SubscriptionEngineCriteria,
    ) -> Result<()> {
        let known: HashSet<String> = manager
            .find(&SubscriptionCriteria::default())?
            .into_iter()
            .map(|s| s.id().to_string())
            .collect();

        for accessor in self.repository.all() {
            if !criteria.matches_accessor(accessor.as_ref()) || known.contains(accessor.id()) {
                continue;
            }

            info!(
                subscription_id = accessor.id(),
                group = accessor.group(),
                "new subscription discovered"
            );
            manager.add(
                Subscription::new(accessor.id())
                    .with_group(accessor.group())
                    .with_run_mode(accessor.run_mode()),
            );
        }

        manager.flush()?;
        Ok(())
    }

    /// Move approved errored subscriptions that failed in one of `failed_in`
    /// back to that status.
    fn retry(
        &self,
        manager: &mut SubscriptionManager<'_>,
        criteria: &SubscriptionEngineCriteria,
        failed_in: &[Status],
    ) -> Result<()> {
        for mut subscription in manager.find(&criteria.with_statuses(&[Status::Error]))? {
            let previous = subscription.subscription_error().map(|e| e.previous_status);
            if previous.is_some_and(|status| !failed_in.contains(&status)) {
                continue;
            }

            if !self.retry_strategy.should_retry(&subscription) {
                debug!(
                    subscription_id = subscription.id(),
                    retry_attempt = subscription.retry_attempt(),
                    "retry deferred"
                );
                continue;
            }

            if let Err(e) = subscription.do_retry() {
                warn!(subscription_id = subscription.id(), error = %e, "cannot retry subscription");
                continue;
            }

            info!(
                subscription_id = subscription.id(),
                status = %subscription.status(),
                retry_attempt = subscription.retry_attempt(),
                "retrying subscription"
            );
            manager.update(&subscription);
        }

        manager.flush()?;
        Ok(())
    }

    /// Mark subscriptions in `statuses` whose subscriber is gone as outdated.
    fn mark_detached(
        &self,
        manager: &mut SubscriptionManager<'_>,
        criteria: &SubscriptionEngineCriteria,
        statuses: &[Status],
    ) -> Result<()> {
        for mut subscription in manager.find(&criteria.with_statuses(statuses))? {
            if self.repository.get(subscription.id()).is_some() {
                continue;
            }

            warn!(
                subscription_id = subscription.id(),
                status = %subscription.status(),
                "subscriber not found, subscription outdated"
            );
            subscription.outdated();
            manager.update(&subscription);
        }

        manager.flush()?;
        Ok(())
    }

    /// Run setup hooks of new subscriptions and move them to `Booting`, or
    /// straight to `Active` at the end of the log for `FromNow`.
    fn setup_new(
        &self,
        manager: &mut SubscriptionManager<'_>,
        criteria: &SubscriptionEngineCriteria,
        errors: &mut Vec<SubscriptionFailure>,
    ) -> Result<()> {
        let mut latest_index = None;

        for mut subscription in manager.find(&criteria.with_statuses(&[Status::New]))? {
            let Some(accessor) = self.repository.get(subscription.id()) else {
                continue;
            };

            if let Some(setup) = accessor.setup_method() {
                if let Err(error) = self.call(|| setup()) {
                    errors.push(Self::fail(&mut subscription, &error));
                    manager.update(&subscription);
                    continue;
                }
                debug!(subscription_id = subscription.id(), "setup done");
            }

            if subscription.run_mode() == RunMode::FromNow {
                let index = match latest_index {
                    Some(index) => index,
                    None => {
                        let index = self.latest_index()?;
                        latest_index = Some(index);
                        index
                    }
                };

                subscription.change_position(index);
                subscription.active();
                info!(
                    subscription_id = subscription.id(),
                    position = index,
                    "subscription active from now"
                );
            } else {
                subscription.booting();
                info!(subscription_id = subscription.id(), "subscription booting");
            }

            manager.update(&subscription);
        }

        manager.flush()?;
        Ok(())
    }

    /// Subscriptions in `status` that still have a subscriber.
    fn targets(
        &self,
        manager: &mut SubscriptionManager<'_>,
        criteria: &SubscriptionEngineCriteria,
        status: Status,
    ) -> Result<Vec<Target>> {
        Ok(manager
            .find(&criteria.with_statuses(&[status]))?
            .into_iter()
            .filter_map(|subscription| {
                let accessor = self.repository.get(subscription.id())?;
                Some(Target {
                    subscription,
                    accessor,
                })
            })
            .collect())
    }

    /// Stream the log from the lowest target position and dispatch each
    /// message to every target still in `status` that has not seen it.
    ///
    /// Returns the number of messages read and whether the log was
    /// exhausted. Reading `limit` messages counts as not exhausted, even
    /// when nothing follows. When the limit ends the window, positions are
    /// persisted here; otherwise the caller persists after finalizing.
    fn process(
        &self,
        manager: &mut SubscriptionManager<'_>,
        targets: &mut [Target],
        status: Status,
        limit: Option<usize>,
        errors: &mut Vec<SubscriptionFailure>,
    ) -> Result<(usize, bool)> {
        let start = targets
            .iter()
            .map(|t| t.subscription.position())
            .min()
            .unwrap_or(0);

        debug!(from_index = start, targets = targets.len(), "loading messages");
        let stream = self.store.load(&Criteria::from_index(start), LoadOptions::default())?;

        let mut processed = 0;
        let mut since_flush = 0;

        for item in stream {
            let (index, message) = item?;
            processed += 1;

            for target in targets.iter_mut() {
                let subscription = &mut target.subscription;
                if subscription.status() != status {
                    continue;
                }

                if index <= subscription.position() {
                    debug!(
                        subscription_id = subscription.id(),
                        index,
                        position = subscription.position(),
                        "message already processed"
                    );
                    continue;
                }

                debug!(
                    subscription_id = subscription.id(),
                    index,
                    event_type = message.event_type(),
                    "dispatching message"
                );

                match self.handle(target.accessor.as_ref(), &message) {
                    Ok(()) => subscription.change_position(index),
                    Err(error) => errors.push(Self::fail(subscription, &error)),
                }
            }

            since_flush += 1;
            if self.config.flush_interval.is_some_and(|n| since_flush >= n) {
                Self::persist(manager, targets)?;
                since_flush = 0;
            }

            // A full window may have more behind it.
            if limit.is_some_and(|limit| processed >= limit) {
                Self::persist(manager, targets)?;
                return Ok((processed, false));
            }
        }

        Ok((processed, true))
    }

    // --- Helpers ---

    /// Call every handler the subscriber has for this message, in order.
    fn handle(&self, accessor: &dyn SubscriberAccessor, message: &Message) -> HandlerResult {
        for handler in accessor.subscribe_methods(message.event_type()) {
            self.call(|| handler(message))?;
        }
        Ok(())
    }

    /// Invoke subscriber code, turning panics into errors when configured.
    fn call(&self, f: impl FnOnce() -> HandlerResult) -> HandlerResult {
        if !self.config.catch_panics {
            return f();
        }

        panic::catch_unwind(AssertUnwindSafe(f))
            .unwrap_or_else(|payload| Err(HandlerError::from_panic(payload)))
    }

    fn latest_index(&self) -> Result<u64> {
        let latest = self
            .store
            .load(&Criteria::default(), LoadOptions::latest())?
            .next()
            .transpose()?;
        Ok(latest.map_or(0, |(index, _)| index))
    }

    fn fail(subscription: &mut Subscription, error: &HandlerError) -> SubscriptionFailure {
        let captured = CapturedError::from(error);
        error!(
            subscription_id = subscription.id(),
            status = %subscription.status(),
            position = subscription.position(),
            error = %captured,
            "subscription failed"
        );

        subscription.fail(captured.clone());
        SubscriptionFailure::new(subscription.id(), captured)
    }

    fn teardown_failure(subscription: &Subscription, error: &HandlerError) -> SubscriptionFailure {
        let captured = CapturedError::from(error);
        warn!(
            subscription_id = subscription.id(),
            error = %captured,
            "teardown failed"
        );
        SubscriptionFailure::new(subscription.id(), captured)
    }

    fn persist(manager: &mut SubscriptionManager<'_>, targets: &[Target]) -> Result<()> {
        for target in targets {
            manager.update(&target.subscription);
        }
        manager.flush()?;
        Ok(())
    }

    /// Run `f` inside the subscription store's lock, if it has one.
    fn with_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let Some(lockable) = self.subscription_store.as_lockable() else {
            return f();
        };

        let mut f = Some(f);
        let mut output = None;
        lockable.in_lock(&mut || {
            let f = f
                .take()
                .ok_or_else(|| EngineError::Lock("lock callback invoked twice".into()))?;
            output = Some(f()?);
            Ok(())
        })?;

        output.ok_or_else(|| EngineError::Lock("lock callback was not invoked".into()))
    }
}
