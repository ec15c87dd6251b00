//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use catchup::{
    Criteria, Event, InMemorySubscriptionStore, LoadOptions, LockableSubscriptionStore, Message,
    MessageStream, MetadataSubscriberAccessorRepository, Result, Status, Store, Subscription,
    SubscriberMetadataFactory, SubscriptionCriteria, SubscriptionStore,
};
use parking_lot::Mutex;
use std::sync::Arc;

// --- Events ---

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileCreated {
    pub name: String,
}

impl Event for ProfileCreated {
    const EVENT_TYPE: &'static str = "profile.created";
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileVisited {
    pub visitor: String,
}

impl Event for ProfileVisited {
    const EVENT_TYPE: &'static str = "profile.visited";
}

pub fn created(id: &str, name: &str) -> Message {
    Message::new(ProfileCreated {
        name: name.to_string(),
    })
    .with_aggregate("profile", id, 1)
}

pub fn visited(id: &str, visitor: &str, playhead: u64) -> Message {
    Message::new(ProfileVisited {
        visitor: visitor.to_string(),
    })
    .with_aggregate("profile", id, playhead)
}

pub fn repository() -> MetadataSubscriberAccessorRepository {
    MetadataSubscriberAccessorRepository::new(Arc::new(SubscriberMetadataFactory::new()))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

// --- Subscription store ---

/// A write seen by [`RecordingSubscriptionStore`].
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Add(Snapshot),
    Update(Snapshot),
    Remove(String),
    Lock,
}

/// In-memory subscription store that records every write and lock.
#[derive(Default)]
pub struct RecordingSubscriptionStore {
    inner: InMemorySubscriptionStore,
    calls: Mutex<Vec<Call>>,
}

impl RecordingSubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscriptions(subscriptions: impl IntoIterator<Item = Subscription>) -> Self {
        Self {
            inner: InMemorySubscriptionStore::new().with_subscriptions(subscriptions),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn added(&self) -> Vec<Snapshot> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Add(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn updated(&self) -> Vec<Snapshot> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Update(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn removed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Remove(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn locks(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Lock).count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn get(&self, id: &str) -> Option<Subscription> {
        self.inner.get(id)
    }

    pub fn all(&self) -> Vec<Subscription> {
        self.inner
            .find(&SubscriptionCriteria::default())
            .unwrap_or_default()
    }

    /// Overwrite a stored subscription without recording the write.
    pub fn replace(&self, mut subscription: Subscription) {
        self.inner.update(&mut subscription).unwrap();
    }
}

/// The parts of a subscription tests assert on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub id: String,
    pub status: Status,
    pub position: u64,
    pub retry_attempt: u32,
    pub error: Option<String>,
    pub previous_status: Option<Status>,
}

impl Snapshot {
    pub fn new(id: &str, status: Status, position: u64) -> Self {
        Self {
            id: id.to_string(),
            status,
            position,
            retry_attempt: 0,
            error: None,
            previous_status: None,
        }
    }

    pub fn retry_attempt(mut self, retry_attempt: u32) -> Self {
        self.retry_attempt = retry_attempt;
        self
    }

    pub fn error(mut self, message: &str, previous_status: Status) -> Self {
        self.error = Some(message.to_string());
        self.previous_status = Some(previous_status);
        self
    }
}

impl From<&Subscription> for Snapshot {
    fn from(subscription: &Subscription) -> Self {
        let error = subscription.subscription_error();
        Self {
            id: subscription.id().to_string(),
            status: subscription.status(),
            position: subscription.position(),
            retry_attempt: subscription.retry_attempt(),
            error: error.map(|e| e.error_message.clone()),
            previous_status: error.map(|e| e.previous_status),
        }
    }
}

impl SubscriptionStore for RecordingSubscriptionStore {
    fn find(&self, criteria: &SubscriptionCriteria) -> Result<Vec<Subscription>> {
        self.inner.find(criteria)
    }

    fn add(&self, subscription: &mut Subscription) -> Result<()> {
        self.inner.add(subscription)?;
        self.calls.lock().push(Call::Add(Snapshot::from(&*subscription)));
        Ok(())
    }

    fn update(&self, subscription: &mut Subscription) -> Result<()> {
        self.inner.update(subscription)?;
        self.calls.lock().push(Call::Update(Snapshot::from(&*subscription)));
        Ok(())
    }

    fn remove(&self, subscription: &Subscription) -> Result<()> {
        self.inner.remove(subscription)?;
        self.calls
            .lock()
            .push(Call::Remove(subscription.id().to_string()));
        Ok(())
    }

    fn as_lockable(&self) -> Option<&dyn LockableSubscriptionStore> {
        Some(self)
    }
}

impl LockableSubscriptionStore for RecordingSubscriptionStore {
    fn in_lock(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        self.calls.lock().push(Call::Lock);
        self.inner.in_lock(f)
    }
}

/// Subscription in `status` as the engine would have stored it.
pub fn subscription(id: &str, status: Status, position: u64) -> Subscription {
    Subscription::new(id).with_status(status).with_position(position)
}

// --- Event store ---

/// A load the engine issued against [`ScriptedStore`].
#[derive(Clone, Debug, PartialEq)]
pub struct LoadCall {
    pub criteria: Criteria,
    pub options: LoadOptions,
}

/// Event store with fixed `(index, message)` pairs. Indices may have gaps.
#[derive(Default)]
pub struct ScriptedStore {
    messages: Mutex<Vec<(u64, Message)>>,
    loads: Mutex<Vec<LoadCall>>,
}

impl ScriptedStore {
    pub fn new(messages: impl IntoIterator<Item = (u64, Message)>) -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(messages.into_iter().collect()),
            loads: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, index: u64, message: Message) {
        self.messages.lock().push((index, message));
    }

    pub fn loads(&self) -> Vec<LoadCall> {
        self.loads.lock().clone()
    }
}

impl Store for ScriptedStore {
    fn load(&self, criteria: &Criteria, options: LoadOptions) -> Result<MessageStream<'_>> {
        self.loads.lock().push(LoadCall {
            criteria: criteria.clone(),
            options,
        });

        let mut selected: Vec<(u64, Message)> = self
            .messages
            .lock()
            .iter()
            .filter(|(index, message)| criteria.matches(*index, message))
            .cloned()
            .collect();

        if options.backwards {
            selected.reverse();
        }

        let offset = options.offset.unwrap_or(0);
        let limit = options.limit.unwrap_or(usize::MAX);

        Ok(Box::new(
            selected.into_iter().skip(offset).take(limit).map(Ok),
        ))
    }

    fn count(&self, criteria: &Criteria) -> Result<u64> {
        Ok(self
            .messages
            .lock()
            .iter()
            .filter(|(index, message)| criteria.matches(*index, message))
            .count() as u64)
    }
}
