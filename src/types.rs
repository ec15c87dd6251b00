//! Core types shared by the engine and its stores.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }

    pub fn from_secs(secs: i64) -> Self {
        Timestamp(secs.saturating_mul(1_000_000))
    }

    /// Shift forward by a duration, saturating at the end of time.
    pub fn saturating_add(self, duration: Duration) -> Self {
        let micros = i64::try_from(duration.as_micros()).unwrap_or(i64::MAX);
        Timestamp(self.0.saturating_add(micros))
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future.
    pub fn duration_since(self, earlier: Timestamp) -> Duration {
        let diff = self.0.saturating_sub(earlier.0);
        if diff <= 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(diff as u64)
        }
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of the current time.
///
/// Stores stamp `last_saved_at` with it and the clock based retry strategy
/// compares against it, so tests can move time without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FrozenClock {
    now: Mutex<Timestamp>,
}

impl FrozenClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: Timestamp) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock();
        *now = now.saturating_add(duration);
    }
}

impl Clock for FrozenClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// A domain event that can travel through the log.
///
/// `EVENT_TYPE` is the stable name subscribers register handlers under.
pub trait Event: Any + Send + Sync + fmt::Debug {
    const EVENT_TYPE: &'static str;
}

/// Object-safe view of an event payload.
trait Payload: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

impl<E: Event> Payload for E {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Metadata recorded alongside an event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Headers {
    /// Aggregate type the event belongs to.
    pub aggregate_name: Option<String>,

    /// Identity of the aggregate instance.
    pub aggregate_id: Option<String>,

    /// Per-aggregate sequence number.
    pub playhead: Option<u64>,

    /// When the event was recorded.
    pub recorded_on: Option<Timestamp>,

    /// Superseded by a snapshot; hidden from default aggregate loads.
    pub archived: bool,

    /// Application-defined headers.
    pub custom: BTreeMap<String, serde_json::Value>,
}

/// An event plus its headers.
///
/// Cloning is cheap: the payload is shared.
#[derive(Clone)]
pub struct Message {
    event_type: &'static str,
    payload: Arc<dyn Payload>,
    headers: Headers,
}

impl Message {
    pub fn new<E: Event>(event: E) -> Self {
        Self {
            event_type: E::EVENT_TYPE,
            payload: Arc::new(event),
            headers: Headers::default(),
        }
    }

    /// Attach aggregate identity and playhead.
    pub fn with_aggregate(
        mut self,
        name: impl Into<String>,
        id: impl Into<String>,
        playhead: u64,
    ) -> Self {
        self.headers.aggregate_name = Some(name.into());
        self.headers.aggregate_id = Some(id.into());
        self.headers.playhead = Some(playhead);
        self
    }

    pub fn with_recorded_on(mut self, recorded_on: Timestamp) -> Self {
        self.headers.recorded_on = Some(recorded_on);
        self
    }

    pub fn with_archived(mut self, archived: bool) -> Self {
        self.headers.archived = archived;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.headers.custom.insert(key.into(), value);
        self
    }

    pub fn event_type(&self) -> &'static str {
        self.event_type
    }

    /// Downcast the payload. `None` if it is not an `E`.
    pub fn event<E: Event>(&self) -> Option<&E> {
        self.payload.as_any().downcast_ref::<E>()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub(crate) fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn aggregate_id(&self) -> Option<&str> {
        self.headers.aggregate_id.as_deref()
    }

    pub fn recorded_on(&self) -> Option<Timestamp> {
        self.headers.recorded_on
    }

    /// True if both messages share the same payload allocation.
    pub fn ptr_eq(&self, other: &Message) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("event_type", &self.event_type)
            .field("event", &self.payload)
            .field("headers", &self.headers)
            .finish()
    }
}
