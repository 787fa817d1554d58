use std::time::Duration;

use futures::StreamExt;
use tokio::time::timeout;

use omnid::core::resource::kinds::{ClusterSpec, MachineSetNodeSpec};
use omnid::core::resource::{Kind, Namespace, Resource, ResourceSpec};
use omnid::core::selector::{Selector, Selectors};
use omnid::core::store::watch::Event;
use omnid::core::store::{Store, Writer};

fn cluster(id: &str) -> Resource {
    Resource::new(
        id,
        ResourceSpec::Cluster(ClusterSpec {
            talos_version: "1.11.2".to_string(),
            kubernetes_version: "1.34.1".to_string(),
        }),
    )
}

async fn next_event(
    stream: &mut (impl futures::Stream<Item = Result<Event, omnid::core::Error>> + Unpin),
) -> Event {
    timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("timed out waiting for event")
        .expect("stream ended")
        .expect("watch error")
}

#[tokio::test]
async fn test_watch_replays_snapshot_then_bootstrapped() {
    let store = Store::new();
    store.create(&Writer::External, cluster("c1")).unwrap();
    store.create(&Writer::External, cluster("c2")).unwrap();

    let mut stream =
        Box::pin(store.watch_kind(Namespace::Default, Kind::Cluster, Selectors::all()));

    let mut seen = Vec::new();
    for _ in 0..2 {
        match next_event(&mut stream).await {
            Event::Created(res) => seen.push(res.id().to_string()),
            other => panic!("expected created, got {other:?}"),
        }
    }
    seen.sort();
    assert_eq!(seen, vec!["c1", "c2"]);
    assert!(matches!(next_event(&mut stream).await, Event::Bootstrapped));
}

#[tokio::test]
async fn test_every_accepted_write_emits_exactly_one_event() {
    let store = Store::new();
    let mut stream =
        Box::pin(store.watch_kind(Namespace::Default, Kind::Cluster, Selectors::all()));
    assert!(matches!(next_event(&mut stream).await, Event::Bootstrapped));

    let created = store.create(&Writer::External, cluster("c1")).unwrap();
    match next_event(&mut stream).await {
        Event::Created(res) => assert_eq!(res.metadata.version, 1),
        other => panic!("expected created, got {other:?}"),
    }

    let mut next = created.clone();
    next.spec = ResourceSpec::Cluster(ClusterSpec {
        talos_version: "1.11.3".to_string(),
        kubernetes_version: "1.34.1".to_string(),
    });
    let updated = store.update(&Writer::External, next).unwrap();
    match next_event(&mut stream).await {
        Event::Updated { old, new } => {
            assert_eq!(old.metadata.version, 1);
            assert_eq!(new.metadata.version, updated.metadata.version);
        }
        other => panic!("expected updated, got {other:?}"),
    }

    let key = created.key();
    store.teardown(&Writer::External, &key).unwrap();
    match next_event(&mut stream).await {
        Event::Updated { new, .. } => assert!(new.metadata.is_tearing_down()),
        other => panic!("expected teardown update, got {other:?}"),
    }

    // Destroy emits exactly one destroyed event.
    store.destroy(&Writer::External, &key).unwrap();
    match next_event(&mut stream).await {
        Event::Destroyed(res) => assert_eq!(res.id(), "c1"),
        other => panic!("expected destroyed, got {other:?}"),
    }

    // Idempotent teardown of a missing resource emits nothing further; the
    // stream stays quiet.
    let quiet = timeout(Duration::from_millis(200), stream.next()).await;
    assert!(quiet.is_err(), "unexpected extra event");
}

#[tokio::test]
async fn test_watch_kind_filters_by_selector() {
    let store = Store::new();
    let selector = Selectors::one(Selector::field_eq("zone", "eu"));
    let mut stream = Box::pin(store.watch_kind(Namespace::Default, Kind::MachineSetNode, selector));
    assert!(matches!(next_event(&mut stream).await, Event::Bootstrapped));

    store
        .create(
            &Writer::External,
            Resource::new("n1", ResourceSpec::MachineSetNode(MachineSetNodeSpec {}))
                .with_label("zone", "us"),
        )
        .unwrap();
    store
        .create(
            &Writer::External,
            Resource::new("n2", ResourceSpec::MachineSetNode(MachineSetNodeSpec {}))
                .with_label("zone", "eu"),
        )
        .unwrap();

    match next_event(&mut stream).await {
        Event::Created(res) => assert_eq!(res.id(), "n2"),
        other => panic!("expected created for n2, got {other:?}"),
    }
}

#[tokio::test]
async fn test_single_resource_watch() {
    let store = Store::new();
    let created = store.create(&Writer::External, cluster("c1")).unwrap();
    store.create(&Writer::External, cluster("c2")).unwrap();

    let mut stream = Box::pin(store.watch(&created.key()));
    match next_event(&mut stream).await {
        Event::Created(res) => assert_eq!(res.id(), "c1"),
        other => panic!("expected created, got {other:?}"),
    }
    assert!(matches!(next_event(&mut stream).await, Event::Bootstrapped));

    // Writes to other resources do not surface.
    let other_key = Resource::new("c2", ResourceSpec::Cluster(ClusterSpec::default())).key();
    store.teardown(&Writer::External, &other_key).unwrap();
    let quiet = timeout(Duration::from_millis(200), stream.next()).await;
    assert!(quiet.is_err(), "unexpected event for foreign resource");
}
