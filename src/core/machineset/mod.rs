// src/core/machineset/mod.rs

//! The machine-set orchestrator: allocation, scaling, rolling updates, and
//! teardown ordering, plus the controller that applies rendered configs.

pub mod apply;
pub mod controller;

pub use apply::MachineConfigApplyController;
pub use controller::MachineSetController;

use crate::core::Error;
use crate::core::resource::labels::{
    ANNOTATION_UPDATE_LOCKED, LABEL_ACCEPTED, LABEL_CONNECTED, LABEL_INFRA_PROVIDER,
};
use crate::core::resource::{Kind, Namespace, Resource, ResourceKey};
use crate::core::runtime::ControllerContext;

/// Grants a cluster machine one rolling-update slot; the render controller
/// refreshes a settled machine's config only while this is present.
pub const ANNOTATION_UPDATE_SLOT: &str = "omnid.internal/update-slot";

/// Whether a machine can be drawn into a machine set: connected, accepted,
/// not update-locked, not already a member anywhere, and (for
/// provider-managed machines) wiped since its last membership.
pub fn machine_eligible(ctx: &ControllerContext, machine: &Resource) -> Result<bool, Error> {
    let labels = &machine.metadata.labels;
    if !labels.contains(LABEL_CONNECTED) || !labels.contains(LABEL_ACCEPTED) {
        return Ok(false);
    }
    // The lock annotation lives on the Link: the Machine is owner-enforced,
    // the Link is the user-writable record for this node.
    let locked = ctx
        .get_optional(&ResourceKey::in_default(Kind::Link, machine.id()))?
        .is_some_and(|link| link.metadata.has_annotation(ANNOTATION_UPDATE_LOCKED));
    if locked {
        return Ok(false);
    }
    if ctx
        .get_optional(&ResourceKey::in_default(Kind::ClusterMachine, machine.id()))?
        .is_some()
    {
        return Ok(false);
    }
    if labels.contains(LABEL_INFRA_PROVIDER) && !wipe_acknowledged(ctx, machine.id())? {
        return Ok(false);
    }
    Ok(true)
}

/// A provider-managed machine re-enters the free pool only after the
/// provider acknowledged the current wipe id. Install-event comparisons
/// accept only increases, which bounds re-allocation of a machine whose
/// wipe has not been observed yet.
fn wipe_acknowledged(ctx: &ControllerContext, machine_id: &str) -> Result<bool, Error> {
    let infra = ctx.get_optional(&ResourceKey::new(
        Namespace::InfraProvider,
        Kind::InfraMachine,
        machine_id,
    ))?;
    let Some(infra) = infra.as_ref().and_then(|res| res.spec.as_infra_machine()) else {
        // Not yet projected; never allocated, nothing to wipe.
        return Ok(true);
    };
    if infra.wipe_id.is_empty() {
        return Ok(true);
    }

    let request = ctx.get_optional(&ResourceKey::new(
        Namespace::InfraProvider,
        Kind::MachineRequest,
        machine_id,
    ))?;
    let Some(request) = request.as_ref().and_then(|res| res.spec.as_machine_request()) else {
        return Ok(false);
    };
    Ok(request.acknowledged_wipe_id == infra.wipe_id
        && request.install_event_id_at_last_wipe <= infra.install_event_id)
}
