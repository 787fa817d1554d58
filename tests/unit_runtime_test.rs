use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::watch;

use omnid::core::Error;
use omnid::core::resource::kinds::MachineSetNodeSpec;
use omnid::core::resource::{Kind, Resource, ResourceKey, ResourceSpec};
use omnid::core::runtime::backoff::Backoff;
use omnid::core::runtime::graph::assemble;
use omnid::core::runtime::{
    Controller, ControllerContext, ControllerDefinition, InputSpec, ReconcileOutcome,
};
use omnid::core::store::Store;

fn def(name: &str, inputs: Vec<InputSpec>, outputs: Vec<Kind>) -> ControllerDefinition {
    ControllerDefinition {
        name: name.to_string(),
        inputs,
        outputs,
    }
}

#[test]
fn test_assembly_rejects_duplicate_output_owners() {
    let err = assemble(&[
        def("A", vec![], vec![Kind::Machine]),
        def("B", vec![], vec![Kind::Machine]),
    ])
    .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn test_assembly_rejects_strong_cycles() {
    let err = assemble(&[
        def(
            "A",
            vec![InputSpec::strong(Kind::ClusterMachine)],
            vec![Kind::Machine],
        ),
        def(
            "B",
            vec![InputSpec::strong(Kind::Machine)],
            vec![Kind::ClusterMachine],
        ),
    ])
    .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn test_assembly_allows_cycles_broken_by_status_kinds() {
    // The back edge runs through a status kind, which is the sanctioned
    // way to break a dependency cycle.
    let order = assemble(&[
        def(
            "A",
            vec![InputSpec::strong(Kind::MachineStatus)],
            vec![Kind::Machine],
        ),
        def(
            "B",
            vec![InputSpec::strong(Kind::Machine)],
            vec![Kind::MachineStatus],
        ),
    ])
    .unwrap();
    assert_eq!(order.len(), 2);
}

#[test]
fn test_assembly_allows_weak_back_edges() {
    let order = assemble(&[
        def(
            "A",
            vec![InputSpec::weak(Kind::ClusterMachine)],
            vec![Kind::Machine],
        ),
        def(
            "B",
            vec![InputSpec::strong(Kind::Machine)],
            vec![Kind::ClusterMachine],
        ),
    ])
    .unwrap();
    assert_eq!(order.len(), 2);
    // The one strong edge orders A before B.
    assert_eq!(order, vec!["A".to_string(), "B".to_string()]);
}

#[test]
fn test_backoff_grows_and_caps() {
    let mut backoff = Backoff::new();
    let first = backoff.next_delay();
    let second = backoff.next_delay();
    assert!(second >= first);

    for _ in 0..20 {
        let delay = backoff.next_delay();
        assert!(delay <= std::time::Duration::from_secs(60));
    }

    backoff.reset();
    assert_eq!(backoff.attempts(), 0);
}

/// A controller that ensures one output resource and counts its runs.
struct CountingController {
    runs: Arc<AtomicU64>,
}

#[async_trait]
impl Controller for CountingController {
    fn definition(&self) -> ControllerDefinition {
        def("CountingController", vec![], vec![Kind::MachineSetNode])
    }

    async fn reconcile(&self, ctx: &ControllerContext) -> Result<ReconcileOutcome, Error> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        ctx.ensure(Resource::new(
            "node-a",
            ResourceSpec::MachineSetNode(MachineSetNodeSpec {}),
        ))?;
        Ok(ReconcileOutcome::Ok)
    }
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let store = Arc::new(Store::new());
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let ctx = ControllerContext::new(Arc::clone(&store), "CountingController", cancel_rx);
    let runs = Arc::new(AtomicU64::new(0));
    let controller = CountingController {
        runs: Arc::clone(&runs),
    };

    controller.reconcile(&ctx).await.unwrap();
    let key = ResourceKey::in_default(Kind::MachineSetNode, "node-a");
    let after_first = store.get(&key).unwrap();
    assert_eq!(after_first.metadata.owner.as_deref(), Some("CountingController"));

    // Running again with no input change produces no store writes.
    controller.reconcile(&ctx).await.unwrap();
    let after_second = store.get(&key).unwrap();
    assert_eq!(after_first.metadata.version, after_second.metadata.version);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_context_cancellation_is_cooperative() {
    let store = Arc::new(Store::new());
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let ctx = ControllerContext::new(store, "AnyController", cancel_rx);

    assert!(ctx.check_cancelled().is_ok());
    cancel_tx.send(true).unwrap();
    assert_eq!(ctx.check_cancelled().unwrap_err(), Error::Canceled);
}
