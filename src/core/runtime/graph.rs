// src/core/runtime/graph.rs

//! Assembly-time validation of the controller graph: unique output
//! ownership and cycle detection, with a warm-up order as a by-product.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use super::controller::{ControllerDefinition, InputRole};
use crate::core::Error;

/// Validates the controller set and returns controller names in warm-up
/// (topological) order.
///
/// Every output kind must have exactly one owning controller. Edges run
/// from a producer to each consumer with a strong input on the produced
/// kind; status kinds are exempt from edge formation, which is the single
/// sanctioned way to break a dependency cycle.
pub fn assemble(definitions: &[ControllerDefinition]) -> Result<Vec<String>, Error> {
    let mut owners: HashMap<_, &str> = HashMap::new();
    for def in definitions {
        for output in &def.outputs {
            if let Some(previous) = owners.insert(*output, def.name.as_str()) {
                return Err(Error::InvalidArgument(format!(
                    "output kind {output} is claimed by both '{previous}' and '{}'",
                    def.name
                )));
            }
        }
    }

    // producer name -> consumer names
    let mut edges: HashMap<&str, HashSet<&str>> = HashMap::new();
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    for def in definitions {
        indegree.entry(def.name.as_str()).or_insert(0);
    }

    for def in definitions {
        for input in &def.inputs {
            if input.role != InputRole::Strong || input.kind.is_status() {
                continue;
            }
            let Some(&producer) = owners.get(&input.kind) else {
                // Externally written kinds have no producing controller.
                continue;
            };
            if producer == def.name {
                continue;
            }
            if edges.entry(producer).or_default().insert(def.name.as_str()) {
                *indegree.entry(def.name.as_str()).or_insert(0) += 1;
            }
        }
    }

    // Kahn's algorithm; anything left over sits on a cycle.
    let mut ready: VecDeque<&str> = indegree
        .iter()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(&name, _)| name)
        .collect();
    let mut order = Vec::with_capacity(definitions.len());

    while let Some(name) = ready.pop_front() {
        order.push(name.to_string());
        if let Some(consumers) = edges.get(name) {
            for &consumer in consumers {
                let degree = indegree.get_mut(consumer).expect("all nodes seeded");
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(consumer);
                }
            }
        }
    }

    if order.len() != definitions.len() {
        let stuck: Vec<&str> = indegree
            .iter()
            .filter(|&(_, &degree)| degree > 0)
            .map(|(&name, _)| name)
            .collect();
        return Err(Error::InvalidArgument(format!(
            "controller dependency cycle involving {stuck:?}; cycles must be \
             broken by a status resource"
        )));
    }

    debug!(?order, "controller graph assembled");
    Ok(order)
}
