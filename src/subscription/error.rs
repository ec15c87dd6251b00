//! Failures raised by subscriber code and how they are persisted.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::fmt;
use std::panic::Location;

use super::types::Status;

/// Result returned by setup, teardown and subscribe handlers.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// An error raised by a subscriber.
///
/// Any `std::error::Error` converts into it, so handlers can use `?`.
/// The conversion records where it happened and, when `RUST_BACKTRACE`
/// asks for one, a backtrace.
pub struct HandlerError {
    inner: Box<dyn StdError + Send + Sync>,
    code: Option<String>,
    location: Option<&'static Location<'static>>,
    backtrace: Backtrace,
}

/// Plain-text error used by [`HandlerError::msg`] and for panics.
#[derive(Debug)]
struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for MessageError {}

impl HandlerError {
    #[track_caller]
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::boxed(Box::new(error))
    }

    #[track_caller]
    pub fn boxed(error: Box<dyn StdError + Send + Sync>) -> Self {
        Self {
            inner: error,
            code: None,
            location: Some(Location::caller()),
            backtrace: Backtrace::capture(),
        }
    }

    /// An error carrying only a message.
    #[track_caller]
    pub fn msg(message: impl fmt::Display) -> Self {
        Self::new(MessageError(message.to_string()))
    }

    /// Attach an application error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Convert a panic payload caught around a handler call.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            format!("handler panicked: {s}")
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("handler panicked: {s}")
        } else {
            "handler panicked".to_string()
        };

        Self {
            inner: Box::new(MessageError(message)),
            code: Some("panic".to_string()),
            location: None,
            backtrace: Backtrace::disabled(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn location(&self) -> Option<&'static Location<'static>> {
        self.location
    }

    /// The wrapped error.
    pub fn error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.inner
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.backtrace.status() {
            BacktraceStatus::Captured => Some(&self.backtrace),
            _ => None,
        }
    }
}

impl<E> From<E> for HandlerError
where
    E: StdError + Send + Sync + 'static,
{
    #[track_caller]
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("error", &self.inner)
            .field("code", &self.code)
            .field("location", &self.location)
            .finish()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

/// A failure and its cause chain, flattened into plain data.
///
/// Only the outermost level carries code, location and trace; causes keep
/// their message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedError {
    pub message: String,
    pub code: Option<String>,
    pub location: Option<String>,
    pub trace: Option<String>,
    pub cause: Option<Box<CapturedError>>,
}

impl CapturedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            location: None,
            trace: None,
            cause: None,
        }
    }

    /// Walk `source()` links of any error.
    pub fn from_error(error: &(dyn StdError + 'static)) -> Self {
        let mut captured = Self::new(error.to_string());
        captured.cause = error.source().map(|source| Box::new(Self::from_error(source)));
        captured
    }

    /// Iterate this level and every cause below it.
    pub fn chain(&self) -> impl Iterator<Item = &CapturedError> {
        std::iter::successors(Some(self), |e| e.cause.as_deref())
    }
}

impl From<&HandlerError> for CapturedError {
    fn from(error: &HandlerError) -> Self {
        let mut captured = CapturedError::from_error(error.error());
        captured.code = error.code.clone();
        captured.location = error
            .location
            .map(|l| format!("{}:{}", l.file(), l.line()));
        captured.trace = error.backtrace().map(|b| b.to_string());
        captured
    }
}

impl fmt::Display for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref cause) = self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

/// Error state stored on a subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionError {
    pub error_message: String,

    /// Status the subscription was in when it failed.
    pub previous_status: Status,

    pub error_context: Option<CapturedError>,
}

impl SubscriptionError {
    pub fn new(error_message: impl Into<String>, previous_status: Status) -> Self {
        Self {
            error_message: error_message.into(),
            previous_status,
            error_context: None,
        }
    }

    pub fn from_captured(previous_status: Status, error: CapturedError) -> Self {
        Self {
            error_message: error.message.clone(),
            previous_status,
            error_context: Some(error),
        }
    }
}
