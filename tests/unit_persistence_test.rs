use omnid::core::resource::kinds::{ClusterSpec, ControllerStatusSpec, MachineStatusSnapshotSpec};
use omnid::core::resource::{Kind, Namespace, Resource, ResourceKey, ResourceSpec};
use omnid::core::store::persistence::{load_snapshot, save_snapshot};
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

#[tokio::test]
async fn test_snapshot_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("omnid.snapshot");

    let store = Store::new();
    store.create(&Writer::External, cluster("c1")).unwrap();
    store
        .create(
            &Writer::controller("SecretsController"),
            cluster("c2").with_owner("SecretsController"),
        )
        .unwrap();
    store.add_finalizer(&cluster("c1").key(), "SecretsController").unwrap();

    save_snapshot(&store, &path).await.unwrap();

    let restored = Store::new();
    let loaded = load_snapshot(&restored, &path).await.unwrap();
    assert_eq!(loaded, 2);

    let c1 = restored.get(&cluster("c1").key()).unwrap();
    assert_eq!(c1.metadata.version, 2);
    assert!(c1.metadata.finalizers.contains("SecretsController"));

    let c2 = restored.get(&cluster("c2").key()).unwrap();
    assert_eq!(c2.metadata.owner.as_deref(), Some("SecretsController"));
    assert_eq!(
        c2.spec.as_cluster().unwrap().talos_version,
        "1.11.2"
    );
}

#[tokio::test]
async fn test_non_persistent_namespaces_are_recomputed_not_saved() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("omnid.snapshot");

    let store = Store::new();
    store.create(&Writer::External, cluster("c1")).unwrap();
    // Ephemeral and metrics resources never reach the snapshot.
    store
        .create(
            &Writer::External,
            Resource::new(
                "m1",
                ResourceSpec::MachineStatusSnapshot(MachineStatusSnapshotSpec {
                    stage: "running".to_string(),
                    ready: true,
                }),
            ),
        )
        .unwrap();
    store
        .create(
            &Writer::controller("A"),
            Resource::new(
                "A",
                ResourceSpec::ControllerStatus(ControllerStatusSpec::default()),
            )
            .with_owner("A"),
        )
        .unwrap();

    save_snapshot(&store, &path).await.unwrap();

    let restored = Store::new();
    assert_eq!(load_snapshot(&restored, &path).await.unwrap(), 1);
    assert!(restored.get(&cluster("c1").key()).is_ok());
    assert!(restored
        .get(&ResourceKey::new(
            Namespace::Ephemeral,
            Kind::MachineStatusSnapshot,
            "m1"
        ))
        .is_err());
}

#[tokio::test]
async fn test_missing_snapshot_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new();
    let loaded = load_snapshot(&store, &dir.path().join("absent.snapshot"))
        .await
        .unwrap();
    assert_eq!(loaded, 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_corrupt_snapshot_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("omnid.snapshot");

    let store = Store::new();
    store.create(&Writer::External, cluster("c1")).unwrap();
    save_snapshot(&store, &path).await.unwrap();

    // Flip a payload byte; the checksum catches it.
    let mut raw = std::fs::read(&path).unwrap();
    let middle = raw.len() / 2;
    raw[middle] ^= 0xFF;
    std::fs::write(&path, &raw).unwrap();

    let restored = Store::new();
    let err = load_snapshot(&restored, &path).await.unwrap_err();
    assert!(matches!(err, omnid::core::Error::InvalidFormat(_)));
}
