//! Dispatching freshly saved messages.
//!
//! An [`EventBus`] is told about messages right after they were appended.
//! [`RunSubscriptionEngineEventBus`] reacts by running the engine, which
//! keeps projections synchronous with writes. [`MiddlewareEventBus`] wraps
//! another bus with hooks that run before and after it.

use crate::engine::{SubscriptionEngine, SubscriptionEngineCriteria};
use crate::error::Result;
use crate::types::Message;
use std::sync::Arc;
use tracing::{debug, warn};

/// Receives messages after they were stored.
pub trait EventBus: Send + Sync {
    fn dispatch(&self, messages: &[Message]) -> Result<()>;
}

impl<F> EventBus for F
where
    F: Fn(&[Message]) -> Result<()> + Send + Sync,
{
    fn dispatch(&self, messages: &[Message]) -> Result<()> {
        self(messages)
    }
}

/// Runs before the wrapped bus.
pub trait BeforeDispatch: Send + Sync {
    fn before_dispatch(&self, messages: &[Message]) -> Result<()>;
}

/// Runs after the wrapped bus succeeded.
pub trait AfterDispatch: Send + Sync {
    fn after_dispatch(&self, messages: &[Message]) -> Result<()>;
}

/// A hook with both halves.
pub trait DispatchMiddleware: BeforeDispatch + AfterDispatch {}

impl<T: BeforeDispatch + AfterDispatch> DispatchMiddleware for T {}

/// One entry in a [`MiddlewareEventBus`].
#[derive(Clone)]
pub enum DispatchHook {
    Before(Arc<dyn BeforeDispatch>),
    After(Arc<dyn AfterDispatch>),
    Both(Arc<dyn DispatchMiddleware>),
}

/// Wraps a bus with ordered hooks.
///
/// Before hooks run in registration order, then the inner bus, then after
/// hooks in registration order. The first error stops the chain.
pub struct MiddlewareEventBus {
    inner: Box<dyn EventBus>,
    hooks: Vec<DispatchHook>,
}

impl MiddlewareEventBus {
    pub fn new(inner: impl EventBus + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            hooks: Vec::new(),
        }
    }

    pub fn with_hook(mut self, hook: DispatchHook) -> Self {
        self.hooks.push(hook);
        self
    }
}

impl EventBus for MiddlewareEventBus {
    fn dispatch(&self, messages: &[Message]) -> Result<()> {
        for hook in &self.hooks {
            match hook {
                DispatchHook::Before(h) => h.before_dispatch(messages)?,
                DispatchHook::Both(h) => h.before_dispatch(messages)?,
                DispatchHook::After(_) => {}
            }
        }

        self.inner.dispatch(messages)?;

        for hook in &self.hooks {
            match hook {
                DispatchHook::After(h) => h.after_dispatch(messages)?,
                DispatchHook::Both(h) => h.after_dispatch(messages)?,
                DispatchHook::Before(_) => {}
            }
        }

        Ok(())
    }
}

/// Runs the engine on every dispatch.
pub struct RunSubscriptionEngineEventBus {
    engine: Arc<SubscriptionEngine>,
    criteria: SubscriptionEngineCriteria,
    limit: Option<usize>,
}

impl RunSubscriptionEngineEventBus {
    pub fn new(engine: Arc<SubscriptionEngine>) -> Self {
        Self {
            engine,
            criteria: SubscriptionEngineCriteria::default(),
            limit: None,
        }
    }

    pub fn with_criteria(mut self, criteria: SubscriptionEngineCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl EventBus for RunSubscriptionEngineEventBus {
    fn dispatch(&self, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let result = self.engine.run(&self.criteria, self.limit)?;
        debug!(
            dispatched = messages.len(),
            processed = result.processed_messages,
            "engine run after dispatch"
        );

        for failure in &result.errors {
            warn!(
                subscription_id = %failure.subscription_id,
                error = %failure.error,
                "subscription failed during dispatch"
            );
        }

        Ok(())
    }
}
