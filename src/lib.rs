//! # catchup
//!
//! A subscription engine for event-sourced logs: projections and processors
//! catch up on history, then stay in step with new events, each at its own
//! position and with its own failure handling.
//!
//! ## Core Concepts
//!
//! - **Subscribers**: application code declaring handlers per event type
//! - **Subscriptions**: the persisted position and status of each subscriber
//! - **Engine**: boots, runs, pauses, reactivates and removes subscriptions
//! - **Retry**: pluggable backoff for failed subscriptions
//!
//! ## Example
//!
//! ```ignore
//! use catchup::{
//!     InMemoryStore, InMemorySubscriptionStore, MetadataSubscriberAccessorRepository,
//!     SubscriberMetadataFactory, SubscriptionEngine, SubscriptionEngineCriteria,
//! };
//!
//! let store = Arc::new(InMemoryStore::new());
//! let repository = MetadataSubscriberAccessorRepository::new(Arc::new(SubscriberMetadataFactory::new()))
//!     .register(ProfileProjection::default())?;
//!
//! let engine = SubscriptionEngine::new(Arc::clone(&store), InMemorySubscriptionStore::new(), repository);
//!
//! store.append([Message::new(ProfileCreated { name: "alice".into() })])?;
//! engine.boot(&SubscriptionEngineCriteria::default(), None)?;
//! ```

pub mod bus;
pub mod engine;
pub mod error;
pub mod retry;
pub mod store;
pub mod subscriber;
pub mod subscription;
pub mod types;
pub mod worker;

// Re-exports
pub use bus::{
    AfterDispatch, BeforeDispatch, DispatchHook, DispatchMiddleware, EventBus,
    MiddlewareEventBus, RunSubscriptionEngineEventBus,
};
pub use engine::{
    EngineConfig, ProcessedResult, SubscriptionEngine, SubscriptionEngineCriteria,
    SubscriptionFailure,
};
pub use error::{EngineError, Result};
pub use retry::{AlwaysRetryStrategy, ClockBasedRetryStrategy, NoRetryStrategy, RetryStrategy};
pub use store::{Criteria, InMemoryStore, LoadOptions, MessageStream, Store};
pub use subscriber::{
    Envelope, HandlerEntry, MetadataSubscriberAccessor, MetadataSubscriberAccessorRepository,
    Subscriber, SubscriberAccessor, SubscriberAccessorRepository, SubscriberMetadata,
    SubscriberMetadataBuilder, SubscriberMetadataFactory,
};
pub use subscription::{
    CapturedError, FileSubscriptionStore, HandlerError, HandlerResult, InMemorySubscriptionStore,
    LockMode, LockableSubscriptionStore, RunMode, Status, Subscription, SubscriptionCriteria,
    SubscriptionError, SubscriptionStore,
};
pub use types::*;
pub use worker::{StopHandle, Worker, WorkerConfig, WorkerStats};
