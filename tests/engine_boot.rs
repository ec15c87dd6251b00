//! Boot: discovery, setup and catch-up.

mod common;

use catchup::{
    Criteria, HandlerError, LoadOptions, NoRetryStrategy, ProcessedResult, RunMode, Status,
    Subscriber, SubscriberMetadataBuilder, SubscriptionEngine, SubscriptionEngineCriteria,
};
use common::{
    repository, subscription, visited, Call, LoadCall, ProfileVisited, RecordingSubscriptionStore,
    ScriptedStore, Snapshot,
};
use parking_lot::Mutex;
use std::sync::Arc;

// --- Subscribers ---

#[derive(Default)]
struct ProfileProjection {
    visits: Mutex<Vec<String>>,
    setups: Mutex<usize>,
}

impl Subscriber for ProfileProjection {
    fn configure(builder: &mut SubscriberMetadataBuilder<Self>) {
        builder
            .id("profile")
            .group("projections")
            .setup(|this| {
                *this.setups.lock() += 1;
                Ok(())
            })
            .subscribe::<ProfileVisited, _>(|this, event| {
                this.visits.lock().push(event.visitor.clone());
                Ok(())
            });
    }
}

struct FailingSetup;

impl Subscriber for FailingSetup {
    fn configure(builder: &mut SubscriberMetadataBuilder<Self>) {
        builder
            .id("failing_setup")
            .setup(|_| Err(HandlerError::msg("ERROR")))
            .subscribe::<ProfileVisited, _>(|_, _| Ok(()));
    }
}

struct FailingHandler;

impl Subscriber for FailingHandler {
    fn configure(builder: &mut SubscriberMetadataBuilder<Self>) {
        builder
            .id("failing_handler")
            .subscribe::<ProfileVisited, _>(|_, _| Err(HandlerError::msg("ERROR")));
    }
}

#[derive(Default)]
struct FromNowProjection {
    visits: Mutex<Vec<String>>,
}

impl Subscriber for FromNowProjection {
    fn configure(builder: &mut SubscriberMetadataBuilder<Self>) {
        builder
            .id("from_now")
            .run_mode(RunMode::FromNow)
            .subscribe::<ProfileVisited, _>(|this, event| {
                this.visits.lock().push(event.visitor.clone());
                Ok(())
            });
    }
}

struct OnceProjection;

impl Subscriber for OnceProjection {
    fn configure(builder: &mut SubscriberMetadataBuilder<Self>) {
        builder
            .id("once")
            .run_mode(RunMode::Once)
            .subscribe_all(|_, _| Ok(()));
    }
}

/// Declares no handlers.
struct Silent;

impl Subscriber for Silent {
    fn configure(builder: &mut SubscriberMetadataBuilder<Self>) {
        builder.id("silent");
    }
}

fn all() -> SubscriptionEngineCriteria {
    SubscriptionEngineCriteria::default()
}

// --- Tests ---

#[test]
fn test_boot_new_subscription() {
    common::init_tracing();

    let store = ScriptedStore::new([(1, visited("1", "alice", 1))]);
    let subscriptions = Arc::new(RecordingSubscriptionStore::new());
    let projection = Arc::new(ProfileProjection::default());

    let engine = SubscriptionEngine::new(
        Arc::clone(&store),
        Arc::clone(&subscriptions),
        repository().register_shared(Arc::clone(&projection)).unwrap(),
    )
    .with_retry_strategy(NoRetryStrategy);

    let result = engine.boot(&all(), None).unwrap();

    assert_eq!(result, ProcessedResult::new(1, true, vec![]));
    assert_eq!(
        subscriptions.calls(),
        vec![
            Call::Lock,
            Call::Add(Snapshot::new("profile", Status::New, 0)),
            Call::Update(Snapshot::new("profile", Status::Booting, 0)),
            Call::Update(Snapshot::new("profile", Status::Active, 1)),
        ]
    );
    assert_eq!(
        store.loads(),
        vec![LoadCall {
            criteria: Criteria::from_index(0),
            options: LoadOptions::default(),
        }]
    );
    assert_eq!(*projection.visits.lock(), vec!["alice"]);
    assert_eq!(*projection.setups.lock(), 1);

    let stored = subscriptions.get("profile").unwrap();
    assert_eq!(stored.group(), "projections");
    assert_eq!(stored.run_mode(), RunMode::FromBeginning);
    assert!(stored.last_saved_at().is_some());
}

#[test]
fn test_boot_setup_error() {
    let store = ScriptedStore::new([(1, visited("1", "alice", 1))]);
    let subscriptions = Arc::new(RecordingSubscriptionStore::new());

    let engine = SubscriptionEngine::new(
        Arc::clone(&store),
        Arc::clone(&subscriptions),
        repository().register(FailingSetup).unwrap(),
    )
    .with_retry_strategy(NoRetryStrategy);

    let result = engine.boot(&all(), None).unwrap();

    assert_eq!(result.processed_messages, 0);
    assert!(result.finished);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].subscription_id, "failing_setup");
    assert_eq!(result.errors[0].error.message, "ERROR");

    assert_eq!(
        subscriptions.calls(),
        vec![
            Call::Lock,
            Call::Add(Snapshot::new("failing_setup", Status::New, 0)),
            Call::Update(
                Snapshot::new("failing_setup", Status::Error, 0).error("ERROR", Status::New)
            ),
        ]
    );
    assert!(store.loads().is_empty());

    let stored = subscriptions.get("failing_setup").unwrap();
    let error = stored.subscription_error().unwrap();
    let context = error.error_context.as_ref().unwrap();
    assert!(context.location.is_some());
}

#[test]
fn test_boot_handler_error() {
    let store = ScriptedStore::new([(1, visited("1", "alice", 1))]);
    let subscriptions = Arc::new(RecordingSubscriptionStore::new());

    let engine = SubscriptionEngine::new(
        Arc::clone(&store),
        Arc::clone(&subscriptions),
        repository().register(FailingHandler).unwrap(),
    )
    .with_retry_strategy(NoRetryStrategy);

    let result = engine.boot(&all(), None).unwrap();

    assert_eq!(result.processed_messages, 1);
    assert!(result.finished);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(
        subscriptions.calls(),
        vec![
            Call::Lock,
            Call::Add(Snapshot::new("failing_handler", Status::New, 0)),
            Call::Update(Snapshot::new("failing_handler", Status::Booting, 0)),
            Call::Update(
                Snapshot::new("failing_handler", Status::Error, 0).error("ERROR", Status::Booting)
            ),
        ]
    );
}

#[test]
fn test_boot_isolates_failures() {
    let store = ScriptedStore::new([(1, visited("1", "alice", 1))]);
    let subscriptions = Arc::new(RecordingSubscriptionStore::new());
    let projection = Arc::new(ProfileProjection::default());

    let engine = SubscriptionEngine::new(
        Arc::clone(&store),
        Arc::clone(&subscriptions),
        repository()
            .register(FailingHandler)
            .unwrap()
            .register_shared(Arc::clone(&projection))
            .unwrap(),
    )
    .with_retry_strategy(NoRetryStrategy);

    let result = engine.boot(&all(), None).unwrap();
    assert_eq!(result.errors.len(), 1);

    let failing = subscriptions.get("failing_handler").unwrap();
    assert_eq!(failing.status(), Status::Error);
    assert_eq!(failing.position(), 0);

    let profile = subscriptions.get("profile").unwrap();
    assert_eq!(profile.status(), Status::Active);
    assert_eq!(profile.position(), 1);
    assert_eq!(*projection.visits.lock(), vec!["alice"]);
}

#[test]
fn test_boot_from_now() {
    let store = ScriptedStore::new([
        (1, visited("1", "alice", 1)),
        (2, visited("1", "bob", 2)),
    ]);
    let subscriptions = Arc::new(RecordingSubscriptionStore::new());
    let projection = Arc::new(FromNowProjection::default());

    let engine = SubscriptionEngine::new(
        Arc::clone(&store),
        Arc::clone(&subscriptions),
        repository().register_shared(Arc::clone(&projection)).unwrap(),
    );

    let result = engine.boot(&all(), None).unwrap();

    assert_eq!(result, ProcessedResult::idle(vec![]));
    assert_eq!(
        subscriptions.calls(),
        vec![
            Call::Lock,
            Call::Add(Snapshot::new("from_now", Status::New, 0)),
            Call::Update(Snapshot::new("from_now", Status::Active, 2)),
        ]
    );
    assert_eq!(
        store.loads(),
        vec![LoadCall {
            criteria: Criteria::default(),
            options: LoadOptions::latest(),
        }]
    );

    // Only messages appended after booting reach it.
    store.push(3, visited("1", "carol", 3));
    engine.run(&all(), None).unwrap();

    assert_eq!(*projection.visits.lock(), vec!["carol"]);
    assert_eq!(subscriptions.get("from_now").unwrap().position(), 3);
}

#[test]
fn test_boot_from_now_on_empty_store() {
    let store = ScriptedStore::new([]);
    let subscriptions = Arc::new(RecordingSubscriptionStore::new());

    let engine = SubscriptionEngine::new(
        Arc::clone(&store),
        Arc::clone(&subscriptions),
        repository().register(FromNowProjection::default()).unwrap(),
    );

    engine.boot(&all(), None).unwrap();

    let stored = subscriptions.get("from_now").unwrap();
    assert_eq!(stored.status(), Status::Active);
    assert_eq!(stored.position(), 0);
}

#[test]
fn test_boot_once_finishes() {
    let store = ScriptedStore::new([
        (1, visited("1", "alice", 1)),
        (2, visited("1", "bob", 2)),
    ]);
    let subscriptions = Arc::new(RecordingSubscriptionStore::new());

    let engine = SubscriptionEngine::new(
        Arc::clone(&store),
        Arc::clone(&subscriptions),
        repository().register(OnceProjection).unwrap(),
    );

    engine.boot(&all(), None).unwrap();

    let stored = subscriptions.get("once").unwrap();
    assert_eq!(stored.status(), Status::Finished);
    assert_eq!(stored.position(), 2);

    // Finished subscriptions are not run.
    store.push(3, visited("1", "carol", 3));
    let result = engine.run(&all(), None).unwrap();
    assert_eq!(result.processed_messages, 0);
    assert_eq!(subscriptions.get("once").unwrap().position(), 2);
}

#[test]
fn test_boot_with_limit() {
    let store = ScriptedStore::new([
        (1, visited("1", "a", 1)),
        (2, visited("1", "b", 2)),
        (3, visited("1", "c", 3)),
    ]);
    let subscriptions = Arc::new(RecordingSubscriptionStore::new());
    let projection = Arc::new(ProfileProjection::default());

    let engine = SubscriptionEngine::new(
        Arc::clone(&store),
        Arc::clone(&subscriptions),
        repository().register_shared(Arc::clone(&projection)).unwrap(),
    );

    let result = engine.boot(&all(), Some(2)).unwrap();
    assert_eq!(result, ProcessedResult::new(2, false, vec![]));

    let stored = subscriptions.get("profile").unwrap();
    assert_eq!(stored.status(), Status::Booting);
    assert_eq!(stored.position(), 2);

    let result = engine.boot(&all(), None).unwrap();
    assert_eq!(result, ProcessedResult::new(1, true, vec![]));

    let stored = subscriptions.get("profile").unwrap();
    assert_eq!(stored.status(), Status::Active);
    assert_eq!(stored.position(), 3);
    assert_eq!(*projection.visits.lock(), vec!["a", "b", "c"]);
    assert_eq!(*projection.setups.lock(), 1);
    assert_eq!(store.loads()[1].criteria, Criteria::from_index(2));
}

#[test]
fn test_boot_stops_booting_when_limit_ends_the_window() {
    let store = ScriptedStore::new([(1, visited("1", "alice", 1))]);
    let subscriptions = Arc::new(RecordingSubscriptionStore::new());

    let engine = SubscriptionEngine::new(
        Arc::clone(&store),
        Arc::clone(&subscriptions),
        repository().register(ProfileProjection::default()).unwrap(),
    );

    let result = engine.boot(&all(), Some(1)).unwrap();
    assert_eq!(result, ProcessedResult::new(1, false, vec![]));

    let stored = subscriptions.get("profile").unwrap();
    assert_eq!(stored.status(), Status::Booting);
    assert_eq!(stored.position(), 1);

    // The next boot sees an empty window and activates.
    let result = engine.boot(&all(), Some(1)).unwrap();
    assert_eq!(result, ProcessedResult::new(0, true, vec![]));

    let stored = subscriptions.get("profile").unwrap();
    assert_eq!(stored.status(), Status::Active);
    assert_eq!(stored.position(), 1);
}

#[test]
fn test_boot_tolerates_index_gaps() {
    let store = ScriptedStore::new([
        (1, visited("1", "alice", 1)),
        (3, visited("1", "bob", 2)),
    ]);
    let subscriptions = Arc::new(RecordingSubscriptionStore::new());
    let projection = Arc::new(ProfileProjection::default());

    let engine = SubscriptionEngine::new(
        Arc::clone(&store),
        Arc::clone(&subscriptions),
        repository().register_shared(Arc::clone(&projection)).unwrap(),
    );

    engine.boot(&all(), None).unwrap();

    assert_eq!(subscriptions.get("profile").unwrap().position(), 3);
    assert_eq!(*projection.visits.lock(), vec!["alice", "bob"]);
}

#[test]
fn test_boot_resumes_each_subscription_at_its_position() {
    let store = ScriptedStore::new([
        (1, visited("1", "alice", 1)),
        (2, visited("1", "bob", 2)),
    ]);
    let subscriptions = Arc::new(RecordingSubscriptionStore::with_subscriptions([
        subscription("profile", Status::Booting, 1).with_group("projections"),
    ]));
    let projection = Arc::new(ProfileProjection::default());

    let engine = SubscriptionEngine::new(
        Arc::clone(&store),
        Arc::clone(&subscriptions),
        repository()
            .register_shared(Arc::clone(&projection))
            .unwrap()
            .register(Silent)
            .unwrap(),
    );

    engine.boot(&all(), None).unwrap();

    assert_eq!(*projection.visits.lock(), vec!["bob"]);
    assert_eq!(*projection.setups.lock(), 0);
    assert_eq!(store.loads()[0].criteria, Criteria::from_index(0));

    for id in ["profile", "silent"] {
        let stored = subscriptions.get(id).unwrap();
        assert_eq!(stored.status(), Status::Active);
        assert_eq!(stored.position(), 2);
    }
}

#[test]
fn test_boot_outdates_subscriptions_without_subscriber() {
    let store = ScriptedStore::new([(1, visited("1", "alice", 1))]);
    let subscriptions = Arc::new(RecordingSubscriptionStore::with_subscriptions([
        subscription("ghost", Status::New, 0),
        subscription("ghost_booting", Status::Booting, 1),
        subscription("ghost_active", Status::Active, 1),
    ]));

    let engine = SubscriptionEngine::new(
        Arc::clone(&store),
        Arc::clone(&subscriptions),
        repository(),
    );

    let result = engine.boot(&all(), None).unwrap();

    assert_eq!(result, ProcessedResult::idle(vec![]));
    assert!(store.loads().is_empty());
    assert_eq!(subscriptions.get("ghost").unwrap().status(), Status::Outdated);
    assert_eq!(
        subscriptions.get("ghost_booting").unwrap().status(),
        Status::Outdated
    );
    // Left for run to handle.
    assert_eq!(
        subscriptions.get("ghost_active").unwrap().status(),
        Status::Active
    );
}

#[test]
fn test_boot_criteria_limits_discovery() {
    let store = ScriptedStore::new([]);
    let subscriptions = Arc::new(RecordingSubscriptionStore::new());

    let engine = SubscriptionEngine::new(
        Arc::clone(&store),
        Arc::clone(&subscriptions),
        repository()
            .register(ProfileProjection::default())
            .unwrap()
            .register(Silent)
            .unwrap(),
    );

    engine
        .boot(&SubscriptionEngineCriteria::new().with_ids(["profile"]), None)
        .unwrap();

    assert_eq!(
        subscriptions.added(),
        vec![Snapshot::new("profile", Status::New, 0)]
    );
    assert!(subscriptions.get("silent").is_none());

    engine
        .boot(&SubscriptionEngineCriteria::new().with_groups(["default"]), None)
        .unwrap();

    assert_eq!(subscriptions.added().len(), 2);
    assert_eq!(subscriptions.get("silent").unwrap().status(), Status::Active);
}
