// src/core/runtime/scheduler.rs

//! The controller scheduler.
//!
//! One task per controller: reconciles are serial within a controller and
//! parallel across controllers. A controller does not run until every one
//! of its inputs has emitted its `bootstrapped` marker. Fatal errors mark
//! the controller degraded in a ControllerStatus resource and retry with
//! exponential backoff; panics are converted to fatal errors at the
//! boundary.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SelectAll, StreamExt};
use futures::FutureExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::controller::{Controller, ControllerContext, ControllerDefinition};
use super::graph;
use crate::core::Error;
use crate::core::metrics;
use crate::core::resource::kinds::ControllerStatusSpec;
use crate::core::resource::{Namespace, Resource, ResourceSpec};
use crate::core::selector::Selectors;
use crate::core::store::watch::Event;
use crate::core::store::Store;

/// Every reconcile runs under this deadline.
const RECONCILE_TIMEOUT: Duration = Duration::from_secs(60);

type InputStream = Pin<Box<dyn futures::Stream<Item = Result<Event, Error>> + Send>>;

/// Owns the controller set and drives their reconcile loops.
pub struct Scheduler {
    store: Arc<Store>,
    controllers: Vec<Arc<dyn Controller>>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            controllers: Vec::new(),
        }
    }

    pub fn register(&mut self, controller: impl Controller) {
        self.controllers.push(Arc::new(controller));
    }

    /// Validates output ownership and cycle freedom; returns the warm-up
    /// order.
    pub fn assemble(&self) -> Result<Vec<String>, Error> {
        let definitions: Vec<ControllerDefinition> =
            self.controllers.iter().map(|c| c.definition()).collect();
        graph::assemble(&definitions)
    }

    /// Runs all controllers until the shutdown signal fires.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), Error> {
        let order = self.assemble()?;
        info!(controllers = order.len(), "controller graph assembled, starting scheduler");

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        for controller in self.controllers {
            let store = Arc::clone(&self.store);
            let cancelled = cancel_rx.clone();
            tasks.spawn(run_controller(store, controller, cancelled));
        }

        let _ = shutdown_rx.recv().await;
        info!("scheduler shutting down");
        let _ = cancel_tx.send(true);
        while tasks.join_next().await.is_some() {}
        Ok(())
    }
}

fn input_streams(store: &Store, def: &ControllerDefinition) -> SelectAll<InputStream> {
    let mut streams: SelectAll<InputStream> = SelectAll::new();
    for input in &def.inputs {
        streams.push(Box::pin(store.watch_kind(
            input.namespace,
            input.kind,
            Selectors::all(),
        )));
    }
    streams
}

/// The per-controller loop: collect input events, coalesce them into one
/// pending flag, and run reconciles serially.
async fn run_controller(
    store: Arc<Store>,
    controller: Arc<dyn Controller>,
    cancelled: watch::Receiver<bool>,
) {
    let def = controller.definition();
    let name = def.name.clone();
    let ctx = ControllerContext::new(Arc::clone(&store), name.clone(), cancelled.clone());

    let mut streams = input_streams(&store, &def);
    let total_inputs = def.inputs.len();
    let mut bootstrapped = 0usize;
    // Controllers without inputs run exactly once at startup.
    let mut pending = total_inputs == 0;
    let mut backoff = Backoff::new();
    let mut next_attempt: Option<Instant> = None;
    let mut status = ControllerStatusSpec::default();
    let mut cancel_rx = cancelled.clone();

    debug!(controller = %name, inputs = total_inputs, "controller loop started");

    loop {
        let ready = bootstrapped >= total_inputs;
        let due = next_attempt.is_none_or(|at| Instant::now() >= at);
        if ready && pending && due {
            pending = false;
            next_attempt = None;
            run_reconcile(
                &controller,
                &ctx,
                &mut backoff,
                &mut pending,
                &mut next_attempt,
                &mut status,
            )
            .await;
            publish_status(&ctx, &status);
            continue;
        }

        let timer = async {
            match next_attempt {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            maybe_event = streams.next(), if total_inputs > 0 => {
                match maybe_event {
                    Some(Ok(Event::Bootstrapped)) => {
                        bootstrapped += 1;
                        if bootstrapped >= total_inputs {
                            pending = true;
                        }
                    }
                    Some(Ok(event)) => {
                        if controller.qualifies(&event) {
                            pending = true;
                        }
                    }
                    Some(Err(Error::Overrun(dropped))) => {
                        // Fell behind the bus; resubscribe from a fresh
                        // snapshot and reconcile once caught up again.
                        warn!(controller = %name, dropped, "input watch overrun, resubscribing");
                        metrics::WATCH_OVERRUNS_TOTAL.inc();
                        streams = input_streams(&store, &def);
                        bootstrapped = 0;
                        pending = true;
                    }
                    Some(Err(e)) => {
                        warn!(controller = %name, error = %e, "input watch error, resubscribing");
                        streams = input_streams(&store, &def);
                        bootstrapped = 0;
                        pending = true;
                    }
                    None => {
                        // All input streams ended; the store is gone.
                        return;
                    }
                }
            }
            _ = timer => {}
            _ = cancel_rx.changed() => {
                if *cancel_rx.borrow() {
                    debug!(controller = %name, "controller loop stopped");
                    return;
                }
            }
        }
    }
}

async fn run_reconcile(
    controller: &Arc<dyn Controller>,
    ctx: &ControllerContext,
    backoff: &mut Backoff,
    pending: &mut bool,
    next_attempt: &mut Option<Instant>,
    status: &mut ControllerStatusSpec,
) {
    use super::controller::ReconcileOutcome;

    let name = ctx.name().to_string();
    let timer = metrics::RECONCILE_LATENCY_SECONDS.start_timer();
    let result = invoke(controller, ctx).await;
    timer.observe_duration();

    status.reconcile_count += 1;
    metrics::RECONCILES_TOTAL
        .with_label_values(&[name.as_str()])
        .inc();

    match result {
        Ok(ReconcileOutcome::Ok) => {
            backoff.reset();
            status.degraded = false;
            status.last_error.clear();
        }
        Ok(ReconcileOutcome::Requeue(after)) => {
            backoff.reset();
            status.degraded = false;
            status.last_error.clear();
            *pending = true;
            *next_attempt = Some(Instant::now() + after);
        }
        Err(e @ Error::Conflict { .. }) => {
            // Another writer won the CAS race; re-run almost immediately.
            debug!(controller = %name, error = %e, "reconcile aborted on conflict");
            metrics::CAS_CONFLICTS_TOTAL.inc();
            *pending = true;
            *next_attempt = Some(Instant::now() + backoff.conflict_jitter());
        }
        Err(e) if e.is_transient() || e == Error::DeadlineExceeded => {
            let delay = backoff.next_delay();
            warn!(controller = %name, error = %e, ?delay, "transient reconcile failure");
            *pending = true;
            *next_attempt = Some(Instant::now() + delay);
        }
        Err(e) if e.is_user_induced() => {
            // The controller has surfaced the message on a status resource;
            // nothing to retry until an input changes.
            warn!(controller = %name, error = %e, "reconcile rejected invalid input");
            status.last_error = e.to_string();
        }
        Err(e) => {
            let delay = backoff.next_delay();
            error!(controller = %name, error = %e, ?delay, "fatal reconcile error, controller degraded");
            metrics::FATAL_RECONCILES_TOTAL.inc();
            status.degraded = true;
            status.last_error = e.to_string();
            *pending = true;
            *next_attempt = Some(Instant::now() + delay);
        }
    }
}

/// Runs one reconcile under the deadline, converting panics to fatal
/// errors.
async fn invoke(
    controller: &Arc<dyn Controller>,
    ctx: &ControllerContext,
) -> Result<super::controller::ReconcileOutcome, Error> {
    let fut = std::panic::AssertUnwindSafe(controller.reconcile(ctx)).catch_unwind();
    match tokio::time::timeout(RECONCILE_TIMEOUT, fut).await {
        Err(_) => Err(Error::DeadlineExceeded),
        Ok(Err(panic)) => Err(Error::Fatal(panic_message(panic))),
        Ok(Ok(result)) => result,
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("reconcile panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("reconcile panicked: {msg}")
    } else {
        "reconcile panicked".to_string()
    }
}

/// Mirrors the in-memory controller status into the metrics namespace.
fn publish_status(ctx: &ControllerContext, status: &ControllerStatusSpec) {
    let res = Resource::new_in(
        Namespace::Metrics,
        ctx.name(),
        ResourceSpec::ControllerStatus(status.clone()),
    );
    if let Err(e) = ctx.ensure(res) {
        warn!(controller = %ctx.name(), error = %e, "failed to publish controller status");
    }
}
