//! Handler tables built once per subscriber type.

use crate::error::{EngineError, Result};
use crate::subscription::{HandlerError, HandlerResult, RunMode, DEFAULT_GROUP};
use crate::types::{Event, Headers, Message, Timestamp};
use parking_lot::RwLock;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use super::Subscriber;

/// Setup or teardown hook.
pub(crate) type Hook<S> = Arc<dyn Fn(&S) -> HandlerResult + Send + Sync>;

/// Handler invoked with the raw message.
pub(crate) type MessageHandler<S> = Arc<dyn Fn(&S, &Message) -> HandlerResult + Send + Sync>;

/// A typed view of a message handed to `subscribe::<E>` handlers.
///
/// Dereferences to the event.
pub struct Envelope<'a, E> {
    event: &'a E,
    message: &'a Message,
}

impl<'a, E> Envelope<'a, E> {
    pub fn event(&self) -> &'a E {
        self.event
    }

    pub fn message(&self) -> &'a Message {
        self.message
    }

    pub fn headers(&self) -> &'a Headers {
        self.message.headers()
    }

    pub fn aggregate_id(&self) -> Option<&'a str> {
        self.message.aggregate_id()
    }

    pub fn recorded_on(&self) -> Option<Timestamp> {
        self.message.recorded_on()
    }
}

impl<E> Deref for Envelope<'_, E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.event
    }
}

/// One row of a subscriber's dispatch table.
pub struct HandlerEntry<S> {
    /// `None` for handlers registered with `subscribe_all`.
    event_type: Option<&'static str>,
    handler: MessageHandler<S>,
}

impl<S> HandlerEntry<S> {
    pub fn event_type(&self) -> Option<&'static str> {
        self.event_type
    }

    pub fn matches(&self, event_type: &str) -> bool {
        self.event_type.map_or(true, |t| t == event_type)
    }

    pub fn invoke(&self, subscriber: &S, message: &Message) -> HandlerResult {
        (self.handler)(subscriber, message)
    }
}

impl<S> Clone for HandlerEntry<S> {
    fn clone(&self) -> Self {
        Self {
            event_type: self.event_type,
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<S> fmt::Debug for HandlerEntry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("event_type", &self.event_type.unwrap_or("*"))
            .finish()
    }
}

/// Validated description of a subscriber type.
pub struct SubscriberMetadata<S> {
    id: String,
    group: String,
    run_mode: RunMode,
    setup: Option<Hook<S>>,
    teardown: Option<Hook<S>>,
    handlers: Vec<HandlerEntry<S>>,
}

impl<S> SubscriberMetadata<S> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    pub fn has_setup(&self) -> bool {
        self.setup.is_some()
    }

    pub fn has_teardown(&self) -> bool {
        self.teardown.is_some()
    }

    pub(crate) fn setup(&self) -> Option<&Hook<S>> {
        self.setup.as_ref()
    }

    pub(crate) fn teardown(&self) -> Option<&Hook<S>> {
        self.teardown.as_ref()
    }

    /// Entries for `event_type`, in declaration order.
    pub fn handlers_for<'a>(
        &'a self,
        event_type: &'a str,
    ) -> impl Iterator<Item = &'a HandlerEntry<S>> + 'a {
        self.handlers.iter().filter(move |entry| entry.matches(event_type))
    }

    pub fn handlers(&self) -> &[HandlerEntry<S>] {
        &self.handlers
    }
}

impl<S> fmt::Debug for SubscriberMetadata<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberMetadata")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("run_mode", &self.run_mode)
            .field("setup", &self.setup.is_some())
            .field("teardown", &self.teardown.is_some())
            .field("handlers", &self.handlers)
            .finish()
    }
}

/// Collects a subscriber's declarations in [`Subscriber::configure`].
pub struct SubscriberMetadataBuilder<S> {
    type_name: &'static str,
    id: Option<String>,
    group: Option<String>,
    run_mode: RunMode,
    setup: Option<Hook<S>>,
    teardown: Option<Hook<S>>,
    duplicate_setup: bool,
    duplicate_teardown: bool,
    handlers: Vec<HandlerEntry<S>>,
}

impl<S: 'static> SubscriberMetadataBuilder<S> {
    pub fn new() -> Self {
        Self {
            type_name: type_name::<S>(),
            id: None,
            group: None,
            run_mode: RunMode::default(),
            setup: None,
            teardown: None,
            duplicate_setup: false,
            duplicate_teardown: false,
            handlers: Vec::new(),
        }
    }

    pub fn id(&mut self, id: impl Into<String>) -> &mut Self {
        self.id = Some(id.into());
        self
    }

    pub fn group(&mut self, group: impl Into<String>) -> &mut Self {
        self.group = Some(group.into());
        self
    }

    pub fn run_mode(&mut self, run_mode: RunMode) -> &mut Self {
        self.run_mode = run_mode;
        self
    }

    /// Hook run once before the subscription boots.
    pub fn setup<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&S) -> HandlerResult + Send + Sync + 'static,
    {
        if self.setup.is_some() {
            self.duplicate_setup = true;
        }
        self.setup = Some(Arc::new(hook));
        self
    }

    /// Hook run when the subscription is torn down or removed.
    pub fn teardown<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&S) -> HandlerResult + Send + Sync + 'static,
    {
        if self.teardown.is_some() {
            self.duplicate_teardown = true;
        }
        self.teardown = Some(Arc::new(hook));
        self
    }

    /// Handle events of type `E`.
    pub fn subscribe<E, F>(&mut self, handler: F) -> &mut Self
    where
        E: Event,
        F: Fn(&S, Envelope<'_, E>) -> HandlerResult + Send + Sync + 'static,
    {
        let invoke = move |subscriber: &S, message: &Message| match message.event::<E>() {
            Some(event) => handler(subscriber, Envelope { event, message }),
            None => Err(HandlerError::msg(format!(
                "message of type {} does not carry a {}",
                message.event_type(),
                type_name::<E>()
            ))),
        };

        self.handlers.push(HandlerEntry {
            event_type: Some(E::EVENT_TYPE),
            handler: Arc::new(invoke),
        });
        self
    }

    /// Handle raw messages of `event_type`.
    pub fn subscribe_message<F>(&mut self, event_type: &'static str, handler: F) -> &mut Self
    where
        F: Fn(&S, &Message) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.push(HandlerEntry {
            event_type: Some(event_type),
            handler: Arc::new(handler),
        });
        self
    }

    /// Handle every message.
    pub fn subscribe_all<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&S, &Message) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.push(HandlerEntry {
            event_type: None,
            handler: Arc::new(handler),
        });
        self
    }

    pub fn build(self) -> Result<SubscriberMetadata<S>> {
        let id = self
            .id
            .ok_or(EngineError::MissingSubscriberId(self.type_name))?;

        if self.duplicate_setup {
            return Err(EngineError::DuplicateSetup { subscriber: id });
        }
        if self.duplicate_teardown {
            return Err(EngineError::DuplicateTeardown { subscriber: id });
        }

        Ok(SubscriberMetadata {
            id,
            group: self.group.unwrap_or_else(|| DEFAULT_GROUP.to_string()),
            run_mode: self.run_mode,
            setup: self.setup,
            teardown: self.teardown,
            handlers: self.handlers,
        })
    }
}

impl<S: 'static> Default for SubscriberMetadataBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds and caches [`SubscriberMetadata`] per subscriber type.
///
/// Shared by every repository it is handed to.
#[derive(Default)]
pub struct SubscriberMetadataFactory {
    cache: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl SubscriberMetadataFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata<S: Subscriber>(&self) -> Result<Arc<SubscriberMetadata<S>>> {
        let key = TypeId::of::<S>();

        if let Some(cached) = self.cache.read().get(&key) {
            if let Ok(metadata) = Arc::clone(cached).downcast::<SubscriberMetadata<S>>() {
                return Ok(metadata);
            }
        }

        let mut builder = SubscriberMetadataBuilder::<S>::new();
        S::configure(&mut builder);
        let metadata = Arc::new(builder.build()?);

        self.cache
            .write()
            .insert(key, Arc::clone(&metadata) as Arc<dyn Any + Send + Sync>);
        Ok(metadata)
    }

    /// Number of cached subscriber types.
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SubscriberMetadataFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberMetadataFactory")
            .field("cached", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug)]
    struct ProfileCreated {
        name: String,
    }

    impl Event for ProfileCreated {
        const EVENT_TYPE: &'static str = "profile_created";
    }

    #[derive(Debug)]
    struct ProfileVisited;

    impl Event for ProfileVisited {
        const EVENT_TYPE: &'static str = "profile_visited";
    }

    #[derive(Default)]
    struct ProfileProjector {
        seen: Mutex<Vec<String>>,
    }

    impl Subscriber for ProfileProjector {
        fn configure(builder: &mut SubscriberMetadataBuilder<Self>) {
            builder
                .id("profile")
                .group("projections")
                .setup(|_| Ok(()))
                .subscribe::<ProfileCreated, _>(|this, event| {
                    this.seen.lock().push(format!("first:{}", event.name));
                    Ok(())
                })
                .subscribe::<ProfileCreated, _>(|this, event| {
                    let aggregate = event.aggregate_id().unwrap_or("-");
                    this.seen.lock().push(format!("second:{aggregate}"));
                    Ok(())
                })
                .subscribe_all(|this, message| {
                    this.seen.lock().push(format!("all:{}", message.event_type()));
                    Ok(())
                });
        }
    }

    struct Anonymous;

    impl Subscriber for Anonymous {
        fn configure(builder: &mut SubscriberMetadataBuilder<Self>) {
            builder.subscribe_all(|_, _| Ok(()));
        }
    }

    struct TwoSetups;

    impl Subscriber for TwoSetups {
        fn configure(builder: &mut SubscriberMetadataBuilder<Self>) {
            builder.id("two").setup(|_| Ok(())).setup(|_| Ok(()));
        }
    }

    struct TwoTeardowns;

    impl Subscriber for TwoTeardowns {
        fn configure(builder: &mut SubscriberMetadataBuilder<Self>) {
            builder.id("two").teardown(|_| Ok(())).teardown(|_| Ok(()));
        }
    }

    #[test]
    fn test_build_metadata() {
        let factory = SubscriberMetadataFactory::new();
        let metadata = factory.metadata::<ProfileProjector>().unwrap();

        assert_eq!(metadata.id(), "profile");
        assert_eq!(metadata.group(), "projections");
        assert_eq!(metadata.run_mode(), RunMode::FromBeginning);
        assert!(metadata.has_setup());
        assert!(!metadata.has_teardown());
        assert_eq!(metadata.handlers_for("profile_created").count(), 3);
        assert_eq!(metadata.handlers_for("profile_visited").count(), 1);
    }

    #[test]
    fn test_handlers_run_in_declaration_order() {
        let factory = SubscriberMetadataFactory::new();
        let metadata = factory.metadata::<ProfileProjector>().unwrap();
        let projector = ProfileProjector::default();
        let message = Message::new(ProfileCreated {
            name: "alice".into(),
        })
        .with_aggregate("profile", "1", 1);

        for entry in metadata.handlers_for(message.event_type()) {
            entry.invoke(&projector, &message).unwrap();
        }

        assert_eq!(
            *projector.seen.lock(),
            vec!["first:alice", "second:1", "all:profile_created"]
        );
    }

    #[test]
    fn test_factory_caches_per_type() {
        let factory = SubscriberMetadataFactory::new();
        let first = factory.metadata::<ProfileProjector>().unwrap();
        let second = factory.metadata::<ProfileProjector>().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.len(), 1);
    }

    #[test]
    fn test_missing_id() {
        let factory = SubscriberMetadataFactory::new();
        let result = factory.metadata::<Anonymous>();
        assert!(matches!(result, Err(EngineError::MissingSubscriberId(_))));
        assert!(factory.is_empty());
    }

    #[test]
    fn test_duplicate_hooks() {
        let factory = SubscriberMetadataFactory::new();
        assert!(matches!(
            factory.metadata::<TwoSetups>(),
            Err(EngineError::DuplicateSetup { .. })
        ));
        assert!(matches!(
            factory.metadata::<TwoTeardowns>(),
            Err(EngineError::DuplicateTeardown { .. })
        ));
    }

    #[test]
    fn test_mismatched_payload() {
        let mut builder = SubscriberMetadataBuilder::<Anonymous>::new();
        builder
            .id("raw")
            .subscribe::<ProfileVisited, _>(|_, _| Ok(()));
        let metadata = builder.build().unwrap();

        // Same event type name, different payload.
        let message = Message::new(ProfileCreated { name: "x".into() });
        let entry = metadata.handlers().first().unwrap();
        assert!(entry.invoke(&Anonymous, &message).is_err());
    }
}
