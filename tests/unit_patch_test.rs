use bytes::Bytes;

use omnid::core::Error;
use omnid::core::patch::{
    PatchRef, RenderInput, RenderedConfig, patch_matches, render, weight_of,
};
use omnid::core::ports::noop::YamlConfigLoader;
use omnid::core::resource::Labels;
use omnid::core::resource::kinds::{ClusterSpec, MachineSetRole};

fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs.iter().copied().collect()
}

fn run(patches: Vec<PatchRef>) -> Result<RenderedConfig, Error> {
    let cluster = ClusterSpec {
        talos_version: "1.11.2".to_string(),
        kubernetes_version: "1.34.1".to_string(),
    };
    let input = RenderInput {
        cluster_id: "c1",
        cluster: &cluster,
        machine_id: "m1",
        machine_set_id: "c1-workers",
        role: MachineSetRole::Worker,
        secrets: None,
        join_token: "jointoken123",
        api_url: "https://omnid.test:8090",
        patches,
    };
    render(&input, &YamlConfigLoader)
}

fn patch(id: &str, data: &str) -> PatchRef {
    PatchRef {
        id: id.to_string(),
        data: Bytes::copy_from_slice(data.as_bytes()),
    }
}

#[test]
fn test_weight_parsing() {
    assert_eq!(weight_of("000-install-disk").unwrap(), 0);
    assert_eq!(weight_of("200-cluster-base").unwrap(), 200);
    assert_eq!(weight_of("450-user-patch").unwrap(), 450);
    assert!(weight_of("no-digits-here").is_err());
    assert!(weight_of("nodash").is_err());
}

#[test]
fn test_patch_targeting() {
    // Cluster-wide patch applies to every machine in the cluster.
    assert!(patch_matches(&labels(&[("cluster", "c1")]), "c1", "s1", "m1"));
    assert!(!patch_matches(&labels(&[("cluster", "c2")]), "c1", "s1", "m1"));

    // Machine-set label narrows to its members.
    assert!(patch_matches(
        &labels(&[("cluster", "c1"), ("machine-set", "s1")]),
        "c1",
        "s1",
        "m1"
    ));
    assert!(!patch_matches(
        &labels(&[("cluster", "c1"), ("machine-set", "s2")]),
        "c1",
        "s1",
        "m1"
    ));

    // Node-scoped labels pin to one machine, with or without the cluster label.
    assert!(patch_matches(&labels(&[("machine", "m1")]), "c1", "s1", "m1"));
    assert!(!patch_matches(&labels(&[("machine", "m2")]), "c1", "s1", "m1"));
    assert!(patch_matches(
        &labels(&[("cluster-machine", "m1")]),
        "c1",
        "s1",
        "m1"
    ));

    // A patch with no targeting labels matches nothing.
    assert!(!patch_matches(&labels(&[]), "c1", "s1", "m1"));
}

#[test]
fn test_merge_order_is_weight_then_id() {
    let rendered = run(vec![
        patch("500-later", "machine:\n  env:\n    WINNER: w500\n"),
        patch("100-first", "machine:\n  env:\n    WINNER: w100\n"),
        patch("500-earlier", "machine:\n  env:\n    WINNER: w500e\n"),
    ])
    .unwrap();

    let text = String::from_utf8(rendered.data.to_vec()).unwrap();
    // Highest weight wins; within equal weights, the lexically later id
    // is applied last.
    assert!(text.contains("WINNER: w500"));
    assert!(!text.contains("WINNER: w100"));
    assert!(!text.contains("WINNER: w500e"));
}

#[test]
fn test_strategic_merge_preserves_siblings() {
    let rendered = run(vec![patch(
        "300-hostname",
        "machine:\n  network:\n    hostname: renamed\n",
    )])
    .unwrap();

    let text = String::from_utf8(rendered.data.to_vec()).unwrap();
    assert!(text.contains("hostname: renamed"));
    // The base machine section survives alongside the patched field.
    assert!(text.contains("token: jointoken123"));
    assert!(text.contains("api: https://omnid.test:8090"));
}

#[test]
fn test_rendering_is_deterministic() {
    let patches = vec![
        patch("300-a", "machine:\n  env:\n    A: '1'\n"),
        patch("400-b", "machine:\n  env:\n    B: '2'\n"),
    ];
    let first = run(patches.clone()).unwrap();
    let second = run(patches).unwrap();

    assert_eq!(first.data, second.data);
    assert_eq!(first.hash, second.hash);
}

#[test]
fn test_empty_patches_are_dropped() {
    let baseline = run(vec![]).unwrap();
    let with_blank = run(vec![patch("300-blank", "   \n\t\n")]).unwrap();
    assert_eq!(baseline.hash, with_blank.hash);
}

#[test]
fn test_invalid_patch_is_bound_to_its_id() {
    let err = run(vec![
        patch("300-fine", "machine:\n  env:\n    A: '1'\n"),
        patch("400-broken", ": not [ yaml\n"),
    ])
    .unwrap_err();

    match err {
        Error::InvalidConfig { patch_id, .. } => assert_eq!(patch_id, "400-broken"),
        other => panic!("expected invalid-config, got {other}"),
    }
}

#[test]
fn test_redacted_copy_strips_secrets() {
    let rendered = run(vec![]).unwrap();
    let redacted = String::from_utf8(rendered.redacted.to_vec()).unwrap();

    assert!(!redacted.contains("jointoken123"));
    assert!(redacted.contains("******"));
    // Non-sensitive fields survive redaction.
    assert!(redacted.contains("clusterName: c1"));
}
