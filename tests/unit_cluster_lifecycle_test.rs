mod support;

use omnid::core::Error;
use omnid::core::resource::kinds::{
    ClusterPhase, ClusterSpec, KubernetesStatusSpec, MachineSetNodeSpec, MachineSetRole,
    MachineSetSpec, MachineStatusSnapshotSpec, UpdateStrategy,
};
use omnid::core::resource::labels::{LABEL_CLUSTER, LABEL_MACHINE_SET};
use omnid::core::resource::{Kind, Resource, ResourceKey, ResourceSpec};
use support::{TestPlane, join_machine};

fn create_cluster(plane: &TestPlane, id: &str) {
    plane
        .service
        .create(Resource::new(
            id,
            ResourceSpec::Cluster(ClusterSpec {
                talos_version: "1.11.2".to_string(),
                kubernetes_version: "1.34.1".to_string(),
            }),
        ))
        .unwrap();
}

fn create_machine_set(plane: &TestPlane, cluster: &str, id: &str, role: MachineSetRole) {
    plane
        .service
        .create(
            Resource::new(
                id,
                ResourceSpec::MachineSet(MachineSetSpec {
                    cluster: cluster.to_string(),
                    role,
                    allocation: Default::default(),
                    update_strategy: UpdateStrategy { max_parallelism: 1 },
                }),
            )
            .with_label(LABEL_CLUSTER, cluster),
        )
        .unwrap();
}

fn assign_node(plane: &TestPlane, cluster: &str, set: &str, machine: &str) {
    plane
        .service
        .create(
            Resource::new(machine, ResourceSpec::MachineSetNode(MachineSetNodeSpec {}))
                .with_label(LABEL_CLUSTER, cluster)
                .with_label(LABEL_MACHINE_SET, set),
        )
        .unwrap();
}

fn report_ready(plane: &TestPlane, machine: &str) {
    plane
        .service
        .create(Resource::new(
            machine,
            ResourceSpec::MachineStatusSnapshot(MachineStatusSnapshotSpec {
                stage: "running".to_string(),
                ready: true,
            }),
        ))
        .unwrap();
}

/// Brings up a one-machine control plane and returns the join token secret.
async fn bootstrap_single_node_cluster(plane: &TestPlane) -> String {
    let token = plane.service.create_join_token("default", None).unwrap();
    let secret = token.spec.as_join_token().unwrap().token.clone();

    join_machine(plane, "m1", &secret);
    report_ready(plane, "m1");
    create_cluster(plane, "c1");
    create_machine_set(plane, "c1", "c1-control-planes", MachineSetRole::ControlPlane);
    assign_node(plane, "c1", "c1-control-planes", "m1");

    plane.settle().await;
    plane.talos.set_etcd_healthy("c1", &["m1"]);
    plane.settle().await;
    secret
}

#[tokio::test]
async fn test_create_cluster_and_join_control_plane() {
    let plane = TestPlane::new().with_siderolink_config();
    let secret = bootstrap_single_node_cluster(&plane).await;

    // The machine-set controller materialized the membership.
    let cm = plane
        .store
        .get(&ResourceKey::in_default(Kind::ClusterMachine, "m1"))
        .unwrap();
    assert_eq!(cm.metadata.owner.as_deref(), Some("MachineSetController"));
    let cm_spec = cm.spec.as_cluster_machine().unwrap();
    assert_eq!(cm_spec.cluster, "c1");
    assert_eq!(cm_spec.machine_set, "c1-control-planes");

    // The rendered config carries the join token and the advertised API URL.
    let config = plane
        .store
        .get(&ResourceKey::in_default(Kind::ClusterMachineConfig, "m1"))
        .unwrap();
    let config_spec = config.spec.as_cluster_machine_config().unwrap();
    let rendered = config_spec.data.get_uncompressed().unwrap();
    let rendered = String::from_utf8(rendered.to_vec()).unwrap();
    assert!(rendered.contains(&secret));
    assert!(rendered.contains("https://omnid.test:8090"));

    // The config reached the machine.
    assert_eq!(
        plane.talos.applied_config_hash("m1").as_deref(),
        Some(config_spec.config_hash.as_str())
    );

    // Bootstrap ran exactly once and flipped after etcd came up.
    assert!(plane.talos.was_bootstrapped("m1"));
    let bootstrap = plane
        .store
        .get(&ResourceKey::in_default(Kind::ClusterBootstrapStatus, "c1"))
        .unwrap();
    let bootstrap = bootstrap.spec.as_cluster_bootstrap_status().unwrap();
    assert!(bootstrap.bootstrapped);
    assert_eq!(bootstrap.bootstrap_machine, "m1");

    // The cluster settles into Running.
    let status = plane
        .store
        .get(&ResourceKey::in_default(Kind::ClusterStatus, "c1"))
        .unwrap();
    let status = status.spec.as_cluster_status().unwrap();
    assert_eq!(status.phase, ClusterPhase::Running);

    // Ready needs the Kubernetes control plane on top.
    assert!(!status.ready);
    plane
        .service
        .create(Resource::new(
            "c1",
            ResourceSpec::KubernetesStatus(KubernetesStatusSpec {
                api_server_ready: true,
                static_pods_ready: true,
            }),
        ))
        .unwrap();
    plane.settle().await;
    let status = plane
        .store
        .get(&ResourceKey::in_default(Kind::ClusterStatus, "c1"))
        .unwrap();
    assert!(status.spec.as_cluster_status().unwrap().ready);
}

#[tokio::test]
async fn test_destroy_waits_for_finalizers_then_cascades() {
    let plane = TestPlane::new().with_siderolink_config();
    bootstrap_single_node_cluster(&plane).await;

    let cluster_key = ResourceKey::in_default(Kind::Cluster, "c1");

    // Controllers hold finalizers, so destroy before teardown fails.
    let err = plane.service.destroy(&cluster_key).unwrap_err();
    assert!(matches!(err, Error::PreconditionFailed(_)));

    plane.service.teardown(&cluster_key).unwrap();
    plane.settle().await;
    plane.settle().await;

    // The cascade reaped every descendant and released all finalizers.
    for kind in [
        Kind::ClusterMachine,
        Kind::ClusterMachineConfig,
        Kind::ClusterMachineConfigStatus,
        Kind::ClusterSecrets,
        Kind::MachineSet,
    ] {
        let leftovers = plane
            .store
            .list(
                omnid::core::resource::Namespace::Default,
                kind,
                &Default::default(),
            )
            .unwrap();
        assert!(leftovers.is_empty(), "leftover {kind} after cascade");
    }

    // The torn-down machine was reset through the Talos port.
    assert!(plane.talos.was_reset("m1"));

    // All finalizers drained; the user-level destroy now succeeds.
    let cluster = plane.store.get(&cluster_key).unwrap();
    assert!(cluster.metadata.finalizers.is_empty());
    plane.service.destroy(&cluster_key).unwrap();
    assert!(matches!(
        plane.store.get(&cluster_key),
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_locked_cluster_suppresses_membership_changes() {
    let plane = TestPlane::new().with_siderolink_config();
    let secret = bootstrap_single_node_cluster(&plane).await;

    // Lock the cluster, then ask for another machine.
    let cluster_key = ResourceKey::in_default(Kind::Cluster, "c1");
    let mut cluster = plane.store.get(&cluster_key).unwrap();
    cluster
        .metadata
        .annotations
        .insert("locked".to_string(), String::new());
    plane.service.update(cluster).unwrap();

    join_machine(&plane, "m2", &secret);
    report_ready(&plane, "m2");
    assign_node(&plane, "c1", "c1-control-planes", "m2");
    plane.settle().await;

    // The new node is desired but not materialized while locked; status
    // still reports.
    assert!(matches!(
        plane
            .store
            .get(&ResourceKey::in_default(Kind::ClusterMachine, "m2")),
        Err(Error::NotFound(_))
    ));
    let status = plane
        .store
        .get(&ResourceKey::in_default(Kind::MachineSetStatus, "c1-control-planes"))
        .unwrap();
    assert_eq!(status.spec.as_machine_set_status().unwrap().requested_machines, 2);

    // Unlock and the membership converges.
    let mut cluster = plane.store.get(&cluster_key).unwrap();
    cluster.metadata.annotations.shift_remove("locked");
    plane.service.update(cluster).unwrap();
    plane.settle().await;
    assert!(plane
        .store
        .get(&ResourceKey::in_default(Kind::ClusterMachine, "m2"))
        .is_ok());
}
