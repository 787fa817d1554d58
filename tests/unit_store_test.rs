use omnid::core::Error;
use omnid::core::resource::kinds::{ClusterSpec, MachineSetNodeSpec};
use omnid::core::resource::{Kind, Namespace, Phase, Resource, ResourceKey, ResourceSpec};
use omnid::core::store::{GetOptions, ListOptions, SortBy, Store, Writer};

fn cluster(id: &str) -> Resource {
    Resource::new(
        id,
        ResourceSpec::Cluster(ClusterSpec {
            talos_version: "1.11.2".to_string(),
            kubernetes_version: "1.34.1".to_string(),
        }),
    )
}

#[test]
fn test_create_assigns_version_one() {
    let store = Store::new();
    let created = store.create(&Writer::External, cluster("c1")).unwrap();
    assert_eq!(created.metadata.version, 1);
    assert_eq!(created.metadata.phase, Phase::Running);
    assert_eq!(created.metadata.created, created.metadata.updated);
}

#[test]
fn test_create_duplicate_key_fails() {
    let store = Store::new();
    store.create(&Writer::External, cluster("c1")).unwrap();
    let err = store.create(&Writer::External, cluster("c1")).unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));
}

#[test]
fn test_get_specific_version() {
    let store = Store::new();
    let created = store.create(&Writer::External, cluster("c1")).unwrap();
    let key = created.key();

    assert!(store.get_with(&key, &GetOptions { version: Some(1) }).is_ok());
    let err = store
        .get_with(&key, &GetOptions { version: Some(3) })
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn test_cas_conflict_exactly_one_writer_wins() {
    let store = Store::new();
    let created = store.create(&Writer::External, cluster("c1")).unwrap();

    // Two clients observe the same version and both write.
    let mut first = created.clone();
    first.spec = ResourceSpec::Cluster(ClusterSpec {
        talos_version: "1.11.3".to_string(),
        kubernetes_version: "1.34.1".to_string(),
    });
    let mut second = created.clone();
    second.spec = ResourceSpec::Cluster(ClusterSpec {
        talos_version: "1.12.0".to_string(),
        kubernetes_version: "1.34.1".to_string(),
    });

    let winner = store.update(&Writer::External, first).unwrap();
    assert_eq!(winner.metadata.version, 2);

    let err = store.update(&Writer::External, second.clone()).unwrap_err();
    assert_eq!(
        err,
        Error::Conflict {
            expected: 1,
            found: 2
        }
    );

    // A retry with the observed version succeeds and bumps by exactly one.
    second.metadata.version = 2;
    let retried = store.update(&Writer::External, second).unwrap();
    assert_eq!(retried.metadata.version, 3);
}

#[test]
fn test_owner_enforcement() {
    let store = Store::new();
    let owner = Writer::controller("ControllerA");
    let other = Writer::controller("ControllerB");

    let res = cluster("owned").with_owner("ControllerA");
    let created = store.create(&owner, res).unwrap();

    // A foreign controller's write is a store error, not a silent drop.
    let err = store.update(&other, created.clone()).unwrap_err();
    assert!(matches!(err, Error::OwnerConflict { .. }));
    let err = store.update(&Writer::External, created.clone()).unwrap_err();
    assert!(matches!(err, Error::OwnerConflict { .. }));

    assert!(store.update(&owner, created).is_ok());
}

#[test]
fn test_owner_is_immutable() {
    let store = Store::new();
    let owner = Writer::controller("ControllerA");
    let created = store
        .create(&owner, cluster("owned").with_owner("ControllerA"))
        .unwrap();

    let mut hijacked = created;
    hijacked.metadata.owner = Some("ControllerB".to_string());
    let err = store
        .update(&Writer::controller("ControllerB"), hijacked)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn test_system_labels_rejected_from_user_writes() {
    let store = Store::new();
    let res = cluster("c1").with_label("omni.sidero.dev/connected", "");
    let err = store.create(&Writer::External, res).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    // Controllers may set system labels on their resources.
    let res = cluster("c2")
        .with_owner("ControllerA")
        .with_label("omni.sidero.dev/connected", "");
    assert!(store.create(&Writer::controller("ControllerA"), res).is_ok());
}

#[test]
fn test_user_patch_weight_band_enforced_at_the_store() {
    let store = Store::new();
    let patch = |id: &str| {
        Resource::new(
            id,
            ResourceSpec::ConfigPatch(omnid::core::resource::kinds::ConfigPatchSpec::default()),
        )
    };

    assert!(store.create(&Writer::External, patch("100-ok")).is_ok());
    assert!(store.create(&Writer::External, patch("900-ok")).is_ok());

    let err = store.create(&Writer::External, patch("000-install-disk")).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    let err = store.create(&Writer::External, patch("901-too-heavy")).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    let err = store.create(&Writer::External, patch("no-weight")).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn test_teardown_destroy_and_finalizers() {
    let store = Store::new();
    let created = store.create(&Writer::External, cluster("c1")).unwrap();
    let key = created.key();

    // Destroy before teardown is a precondition failure.
    let err = store.destroy(&Writer::External, &key).unwrap_err();
    assert!(matches!(err, Error::PreconditionFailed(_)));

    store.add_finalizer(&key, "SecretsController").unwrap();

    let torn = store.teardown(&Writer::External, &key).unwrap();
    assert_eq!(torn.metadata.phase, Phase::TearingDown);
    // Teardown is idempotent: no new version on repeat.
    let again = store.teardown(&Writer::External, &key).unwrap();
    assert_eq!(again.metadata.version, torn.metadata.version);

    // Finalizers block destruction.
    let err = store.destroy(&Writer::External, &key).unwrap_err();
    assert!(matches!(err, Error::PreconditionFailed(_)));

    store.remove_finalizer(&key, "SecretsController").unwrap();
    store.destroy(&Writer::External, &key).unwrap();
    assert!(matches!(store.get(&key), Err(Error::NotFound(_))));
}

#[test]
fn test_finalizer_mutations_bump_version_once() {
    let store = Store::new();
    let created = store.create(&Writer::External, cluster("c1")).unwrap();
    let key = created.key();

    let with = store.add_finalizer(&key, "A").unwrap();
    assert_eq!(with.metadata.version, 2);
    // Idempotent re-add produces no new version.
    let again = store.add_finalizer(&key, "A").unwrap();
    assert_eq!(again.metadata.version, 2);

    let removed = store.remove_finalizer(&key, "A").unwrap();
    assert_eq!(removed.metadata.version, 3);
}

#[test]
fn test_list_with_selector_sort_and_pagination() {
    let store = Store::new();
    for (id, zone) in [("n3", "eu"), ("n1", "eu"), ("n2", "us"), ("n4", "eu")] {
        store
            .create(
                &Writer::External,
                Resource::new(id, ResourceSpec::MachineSetNode(MachineSetNodeSpec {}))
                    .with_label("zone", zone),
            )
            .unwrap();
    }

    let opts = ListOptions {
        selectors: omnid::core::selector::Selector::field_eq("zone", "eu").into(),
        sort_by: SortBy::Id,
        descending: false,
        offset: 0,
        limit: 0,
    };
    let eu = store.list(Namespace::Default, Kind::MachineSetNode, &opts).unwrap();
    let ids: Vec<&str> = eu.iter().map(|r| r.id()).collect();
    assert_eq!(ids, vec!["n1", "n3", "n4"]);

    let opts = ListOptions {
        selectors: omnid::core::selector::Selector::field_eq("zone", "eu").into(),
        sort_by: SortBy::Id,
        descending: true,
        offset: 1,
        limit: 1,
    };
    let page = store.list(Namespace::Default, Kind::MachineSetNode, &opts).unwrap();
    let ids: Vec<&str> = page.iter().map(|r| r.id()).collect();
    assert_eq!(ids, vec!["n3"]);
}

#[test]
fn test_namespaces_isolate_keys() {
    let store = Store::new();
    store.create(&Writer::External, cluster("c1")).unwrap();

    let other = ResourceKey::new(Namespace::Ephemeral, Kind::Cluster, "c1");
    assert!(matches!(store.get(&other), Err(Error::NotFound(_))));
}
