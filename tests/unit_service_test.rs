mod support;

use omnid::core::Error;
use omnid::core::patch::weight_of;
use omnid::core::resource::kinds::{ClusterSpec, MachineSetNodeSpec};
use omnid::core::resource::labels::{
    ANNOTATION_LOCKED, ANNOTATION_TAINTED_IMPORTING, LABEL_CLUSTER, LABEL_MACHINE,
    LABEL_MACHINE_SET,
};
use omnid::core::resource::{Kind, Namespace, Phase, Resource, ResourceKey, ResourceSpec};
use support::{TestPlane, join_machine};

#[tokio::test]
async fn test_gen_join_config_renders_artifacts() {
    let plane = TestPlane::new().with_siderolink_config();
    let token = plane.service.create_join_token("default", None).unwrap();
    let secret = token.spec.as_join_token().unwrap().token.clone();

    let (document, kernel_args) = plane.service.gen_join_config(None, None).unwrap();

    assert!(document.contains("SideroLinkConfig"));
    assert!(document.contains(&format!("https://omnid.test:8090?jointoken={secret}")));
    assert!(document.contains("EventSinkConfig"));
    assert!(document.contains("KmsgLogConfig"));

    assert!(kernel_args.contains(&format!("siderolink.api=https://omnid.test:8090?jointoken={secret}")));
    assert!(kernel_args.contains("talos.events.sink="));
    assert!(kernel_args.contains("talos.logging.kernel="));

    // The tunnel flag can be forced per invocation.
    let (document, _) = plane.service.gen_join_config(Some(true), None).unwrap();
    assert!(document.contains("grpc_tunnel=true"));
}

#[tokio::test]
async fn test_register_link_requires_valid_token() {
    let plane = TestPlane::new().with_siderolink_config();
    plane.service.create_join_token("default", None).unwrap();

    let err = plane
        .service
        .register_link("m1", "pk", "fdae::1/64", "203.0.113.1:51820", None, "wrong")
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));
}

#[tokio::test]
async fn test_register_link_reconnect_updates_peer() {
    let plane = TestPlane::new().with_siderolink_config();
    let token = plane.service.create_join_token("default", None).unwrap();
    let secret = token.spec.as_join_token().unwrap().token.clone();

    join_machine(&plane, "m1", &secret);
    let link = plane
        .service
        .register_link("m1", "new-pubkey", "fdae::1/64", "198.51.100.9:51820", None, &secret)
        .unwrap();

    let spec = link.spec.as_link().unwrap();
    assert_eq!(spec.public_key, "new-pubkey");
    assert_eq!(spec.remote_addr, "198.51.100.9:51820");
    assert!(spec.connected);

    // Exactly one usage record per link.
    let usages = plane
        .store
        .list(Namespace::Default, Kind::JoinTokenUsage, &Default::default())
        .unwrap();
    assert_eq!(usages.len(), 1);
}

#[tokio::test]
async fn test_maintenance_upgrade_writes_a_machine_patch() {
    let plane = TestPlane::new().with_siderolink_config();
    plane.service.maintenance_upgrade("m1", "1.11.3").unwrap();

    let patches = plane
        .store
        .list(Namespace::Default, Kind::ConfigPatch, &Default::default())
        .unwrap();
    assert_eq!(patches.len(), 1);
    let patch = &patches[0];
    assert_eq!(patch.metadata.labels.get(LABEL_MACHINE), Some("m1"));

    // The weight sits inside the user band.
    let weight = weight_of(patch.id()).unwrap();
    assert!((100..=900).contains(&weight));

    let data = patch
        .spec
        .as_config_patch()
        .unwrap()
        .data
        .get_uncompressed()
        .unwrap();
    assert!(String::from_utf8(data.to_vec()).unwrap().contains("installer:v1.11.3"));
}

#[tokio::test]
async fn test_import_cluster_sets_taints() {
    let plane = TestPlane::new().with_siderolink_config();
    let secrets = b"ca:\n  crt: abc\n";

    // A dry run writes nothing.
    plane
        .service
        .import_cluster("imported", "1.11.2", "1.34.1", secrets, true)
        .unwrap();
    assert!(plane
        .store
        .get(&ResourceKey::in_default(Kind::Cluster, "imported"))
        .is_err());

    plane
        .service
        .import_cluster("imported", "1.11.2", "1.34.1", secrets, false)
        .unwrap();
    let cluster = plane
        .store
        .get(&ResourceKey::in_default(Kind::Cluster, "imported"))
        .unwrap();
    assert!(cluster.metadata.has_annotation(ANNOTATION_LOCKED));
    assert!(cluster.metadata.has_annotation(ANNOTATION_TAINTED_IMPORTING));

    // The secrets controller mirrors the imported bundle instead of
    // generating.
    plane.settle().await;
    let secrets_res = plane
        .store
        .get(&ResourceKey::in_default(Kind::ClusterSecrets, "imported"))
        .unwrap();
    let data = secrets_res
        .spec
        .as_cluster_secrets()
        .unwrap()
        .data
        .get_uncompressed()
        .unwrap();
    assert_eq!(data.as_ref(), b"ca:\n  crt: abc\n");
}

#[tokio::test]
async fn test_abort_import_gate_and_teardown() {
    let plane = TestPlane::new().with_siderolink_config();
    let token = plane.service.create_join_token("default", None).unwrap();
    let secret = token.spec.as_join_token().unwrap().token.clone();

    // Aborting a normal cluster is refused.
    plane
        .service
        .create(Resource::new(
            "plain",
            ResourceSpec::Cluster(ClusterSpec::default()),
        ))
        .unwrap();
    let err = plane.service.abort_import("plain").unwrap_err();
    assert!(matches!(err, Error::PreconditionFailed(_)));

    // A tainted import with a joined node aborts: links drain and the
    // cluster tears down.
    plane
        .service
        .import_cluster("imported", "1.11.2", "1.34.1", b"ca: {}\n", false)
        .unwrap();
    join_machine(&plane, "m1", &secret);
    plane
        .service
        .create(
            Resource::new("m1", ResourceSpec::MachineSetNode(MachineSetNodeSpec {}))
                .with_label(LABEL_CLUSTER, "imported")
                .with_label(LABEL_MACHINE_SET, "imported-control-planes"),
        )
        .unwrap();

    plane.service.abort_import("imported").unwrap();

    let cluster = plane
        .store
        .get(&ResourceKey::in_default(Kind::Cluster, "imported"))
        .unwrap();
    assert_eq!(cluster.metadata.phase, Phase::TearingDown);
    let link = plane
        .store
        .get(&ResourceKey::in_default(Kind::Link, "m1"))
        .unwrap();
    assert_eq!(link.metadata.phase, Phase::TearingDown);
}
