//! Error types for the subscription engine.
//!
//! These are infrastructure and configuration failures. Failures raised by
//! subscriber code are captured per subscription instead, see
//! [`crate::subscription::HandlerError`].

use thiserror::Error;

/// Main error type for engine and store operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Subscription already exists: {0}")]
    SubscriptionExists(String),

    #[error("Subscription store is locked by another process")]
    Locked,

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Subscriber {subscriber} declares more than one setup hook")]
    DuplicateSetup { subscriber: String },

    #[error("Subscriber {subscriber} declares more than one teardown hook")]
    DuplicateTeardown { subscriber: String },

    #[error("Subscriber id registered twice: {0}")]
    DuplicateSubscriber(String),

    #[error("Subscriber type {0} does not declare an id")]
    MissingSubscriberId(&'static str),

    #[error("Subscription {0} has no error to retry")]
    NoErrorToRetry(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for EngineError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for EngineError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        EngineError::Deserialization(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
