//! Subscriptions: the persisted progress of each subscriber.
//!
//! A [`Subscription`] records where one subscriber is in the log, which
//! lifecycle [`Status`] it is in, and the last failure if any. The engine
//! moves subscriptions through their state machine; a [`SubscriptionStore`]
//! keeps them between invocations.

pub mod error;
pub mod store;
mod types;

pub use error::{CapturedError, HandlerError, HandlerResult, SubscriptionError};
pub use store::{
    FileSubscriptionStore, InMemorySubscriptionStore, LockMode, LockableSubscriptionStore,
    SubscriptionCriteria, SubscriptionStore,
};
pub use types::{RunMode, Status, Subscription, DEFAULT_GROUP};
