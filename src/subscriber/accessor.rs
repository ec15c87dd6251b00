//! The engine's view of subscribers.

use crate::error::{EngineError, Result};
use crate::subscription::{HandlerResult, RunMode};
use crate::types::Message;
use std::fmt;
use std::sync::Arc;

use super::metadata::{SubscriberMetadata, SubscriberMetadataFactory};
use super::Subscriber;

/// A setup or teardown hook bound to its subscriber instance.
pub type BoundHook<'a> = Box<dyn Fn() -> HandlerResult + 'a>;

/// A message handler bound to its subscriber instance.
pub type BoundHandler<'a> = Box<dyn Fn(&Message) -> HandlerResult + 'a>;

/// Type-erased access to one subscriber and its handler table.
pub trait SubscriberAccessor: Send + Sync {
    fn id(&self) -> &str;

    fn group(&self) -> &str;

    fn run_mode(&self) -> RunMode;

    fn setup_method(&self) -> Option<BoundHook<'_>>;

    fn teardown_method(&self) -> Option<BoundHook<'_>>;

    /// Handlers for `event_type`, in the order they must run.
    fn subscribe_methods(&self, event_type: &str) -> Vec<BoundHandler<'_>>;
}

/// Accessor backed by [`SubscriberMetadata`].
pub struct MetadataSubscriberAccessor<S> {
    subscriber: Arc<S>,
    metadata: Arc<SubscriberMetadata<S>>,
}

impl<S: Subscriber> MetadataSubscriberAccessor<S> {
    pub fn new(subscriber: Arc<S>, metadata: Arc<SubscriberMetadata<S>>) -> Self {
        Self {
            subscriber,
            metadata,
        }
    }

    pub fn subscriber(&self) -> &Arc<S> {
        &self.subscriber
    }

    pub fn metadata(&self) -> &SubscriberMetadata<S> {
        &self.metadata
    }
}

impl<S: Subscriber> SubscriberAccessor for MetadataSubscriberAccessor<S> {
    fn id(&self) -> &str {
        self.metadata.id()
    }

    fn group(&self) -> &str {
        self.metadata.group()
    }

    fn run_mode(&self) -> RunMode {
        self.metadata.run_mode()
    }

    fn setup_method(&self) -> Option<BoundHook<'_>> {
        let hook = self.metadata.setup()?;
        Some(Box::new(move || hook(self.subscriber.as_ref())))
    }

    fn teardown_method(&self) -> Option<BoundHook<'_>> {
        let hook = self.metadata.teardown()?;
        Some(Box::new(move || hook(self.subscriber.as_ref())))
    }

    fn subscribe_methods(&self, event_type: &str) -> Vec<BoundHandler<'_>> {
        self.metadata
            .handlers()
            .iter()
            .filter(|entry| entry.matches(event_type))
            .map(|entry| {
                let bound: BoundHandler<'_> =
                    Box::new(move |message: &Message| entry.invoke(&self.subscriber, message));
                bound
            })
            .collect()
    }
}

impl<S> fmt::Debug for MetadataSubscriberAccessor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataSubscriberAccessor")
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Source of the live subscriber set.
pub trait SubscriberAccessorRepository: Send + Sync {
    fn all(&self) -> Vec<Arc<dyn SubscriberAccessor>>;

    fn get(&self, id: &str) -> Option<Arc<dyn SubscriberAccessor>>;
}

impl<R: SubscriberAccessorRepository + ?Sized> SubscriberAccessorRepository for Arc<R> {
    fn all(&self) -> Vec<Arc<dyn SubscriberAccessor>> {
        (**self).all()
    }

    fn get(&self, id: &str) -> Option<Arc<dyn SubscriberAccessor>> {
        (**self).get(id)
    }
}

/// Repository of registered subscriber instances.
///
/// # Example
///
/// ```ignore
/// let factory = Arc::new(SubscriberMetadataFactory::new());
/// let repository = MetadataSubscriberAccessorRepository::new(factory)
///     .register(ProfileProjector::default())?
///     .register(WelcomeMailer::new(mailer))?;
/// ```
pub struct MetadataSubscriberAccessorRepository {
    factory: Arc<SubscriberMetadataFactory>,
    accessors: Vec<Arc<dyn SubscriberAccessor>>,
}

impl MetadataSubscriberAccessorRepository {
    pub fn new(factory: Arc<SubscriberMetadataFactory>) -> Self {
        Self {
            factory,
            accessors: Vec::new(),
        }
    }

    pub fn register<S: Subscriber>(self, subscriber: S) -> Result<Self> {
        self.register_shared(Arc::new(subscriber))
    }

    /// Register an instance the caller keeps a handle to.
    pub fn register_shared<S: Subscriber>(mut self, subscriber: Arc<S>) -> Result<Self> {
        let metadata = self.factory.metadata::<S>()?;

        if self.accessors.iter().any(|a| a.id() == metadata.id()) {
            return Err(EngineError::DuplicateSubscriber(metadata.id().to_string()));
        }

        self.accessors
            .push(Arc::new(MetadataSubscriberAccessor::new(subscriber, metadata)));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.accessors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accessors.is_empty()
    }
}

impl SubscriberAccessorRepository for MetadataSubscriberAccessorRepository {
    fn all(&self) -> Vec<Arc<dyn SubscriberAccessor>> {
        self.accessors.clone()
    }

    fn get(&self, id: &str) -> Option<Arc<dyn SubscriberAccessor>> {
        self.accessors.iter().find(|a| a.id() == id).cloned()
    }
}
