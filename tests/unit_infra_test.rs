mod support;

use omnid::core::resource::kinds::{
    AcceptanceStatus, AllocationPolicy, ClusterSpec, MachineRequestSpec, MachineSetNodeSpec,
    MachineSetRole, MachineSetSpec, MachineStatusSnapshotSpec, UpdateStrategy,
};
use omnid::core::resource::labels::{LABEL_CLUSTER, LABEL_MACHINE_SET};
use omnid::core::resource::{Kind, Namespace, Resource, ResourceKey, ResourceSpec};
use support::TestPlane;

fn infra_machine_key(id: &str) -> ResourceKey {
    ResourceKey::new(Namespace::InfraProvider, Kind::InfraMachine, id)
}

async fn setup_provider_machine(plane: &TestPlane, machine: &str) -> String {
    let token = plane.service.create_join_token("default", None).unwrap();
    let secret = token.spec.as_join_token().unwrap().token.clone();

    plane
        .service
        .register_link(
            machine,
            &format!("pubkey-{machine}"),
            "fdae:41e4:649b:9303::42/64",
            "203.0.113.7:51820",
            Some("bare-metal-1"),
            &secret,
        )
        .unwrap();
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
    plane
        .service
        .set_machine_acceptance(machine, AcceptanceStatus::Accepted)
        .unwrap();

    plane
        .service
        .create(Resource::new(
            "c1",
            ResourceSpec::Cluster(ClusterSpec {
                talos_version: "1.11.2".to_string(),
                kubernetes_version: "1.34.1".to_string(),
            }),
        ))
        .unwrap();
    plane
        .service
        .create(
            Resource::new(
                "c1-workers",
                ResourceSpec::MachineSet(MachineSetSpec {
                    cluster: "c1".to_string(),
                    role: MachineSetRole::Worker,
                    allocation: AllocationPolicy::Manual,
                    update_strategy: UpdateStrategy::default(),
                }),
            )
            .with_label(LABEL_CLUSTER, "c1"),
        )
        .unwrap();
    secret
}

#[tokio::test]
async fn test_infra_machine_projection() {
    let plane = TestPlane::new().with_siderolink_config();
    setup_provider_machine(&plane, "pm1").await;
    plane.settle().await;

    let infra = plane.store.get(&infra_machine_key("pm1")).unwrap();
    let spec = infra.spec.as_infra_machine().unwrap();
    assert_eq!(spec.provider, "bare-metal-1");
    assert_eq!(spec.acceptance, AcceptanceStatus::Accepted);
    // Never allocated, so nothing to wipe yet.
    assert!(spec.wipe_id.is_empty());
    assert_eq!(spec.install_event_id, 0);
    // The node unique token assigned to the link is projected.
    assert!(!spec.node_unique_token.is_empty());
}

#[tokio::test]
async fn test_wipe_id_rotates_when_machine_leaves_cluster() {
    let plane = TestPlane::new().with_siderolink_config();
    setup_provider_machine(&plane, "pm1").await;

    plane
        .service
        .create(
            Resource::new("pm1", ResourceSpec::MachineSetNode(MachineSetNodeSpec {}))
                .with_label(LABEL_CLUSTER, "c1")
                .with_label(LABEL_MACHINE_SET, "c1-workers"),
        )
        .unwrap();
    plane.settle().await;
    assert!(plane
        .store
        .get(&ResourceKey::in_default(Kind::ClusterMachine, "pm1"))
        .is_ok());

    // Remove the node; the membership drains and the wipe id rotates.
    let node_key = ResourceKey::in_default(Kind::MachineSetNode, "pm1");
    plane.service.teardown(&node_key).unwrap();
    plane.service.destroy(&node_key).unwrap();
    plane.settle().await;
    plane.settle().await;

    let infra = plane.store.get(&infra_machine_key("pm1")).unwrap();
    let spec = infra.spec.as_infra_machine().unwrap();
    assert!(!spec.wipe_id.is_empty());
    assert_eq!(spec.install_event_id, 1);

    // Until the provider acknowledges the wipe, the machine is not
    // eligible for re-allocation.
    plane
        .service
        .create(
            Resource::new("pm1", ResourceSpec::MachineSetNode(MachineSetNodeSpec {}))
                .with_label(LABEL_CLUSTER, "c1")
                .with_label(LABEL_MACHINE_SET, "c1-workers"),
        )
        .unwrap();
    plane.settle().await;
    assert!(plane
        .store
        .get(&ResourceKey::in_default(Kind::ClusterMachine, "pm1"))
        .is_err());

    // The provider wipes and acknowledges; allocation resumes.
    plane
        .service
        .create(Resource::new(
            "pm1",
            ResourceSpec::MachineRequest(MachineRequestSpec {
                provider: "bare-metal-1".to_string(),
                talos_version: "1.11.2".to_string(),
                acknowledged_wipe_id: spec.wipe_id.clone(),
                install_event_id_at_last_wipe: spec.install_event_id,
            }),
        ))
        .unwrap();
    plane.settle().await;
    assert!(plane
        .store
        .get(&ResourceKey::in_default(Kind::ClusterMachine, "pm1"))
        .is_ok());
}
