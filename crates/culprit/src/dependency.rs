//! Forced dependencies between trace events.
//!
//! Dependency marking runs once, on the root DAG. It links every failure to
//! the later recovery of the same entity so the pair is pruned atomically:
//! removing the failure removes the recovery, while removing the recovery on
//! its own leaves the failure in place.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use culprit_types::{DependencyPolicy, Event, Fingerprint, Label, PairRole};

use crate::dag::DagError;

// ============================================================================
// Dependency Marking
// ============================================================================

/// Adds failure→recovery edges to `events` in a single pass.
///
/// Each failure pairs with the first later recovery sharing its fingerprint;
/// repeated failures of one entity pair with their own recoveries. Returns
/// the number of edges added.
pub(crate) fn mark_dependencies(events: &mut [Event]) -> Result<usize, DagError> {
    let mut pending: HashMap<Fingerprint, usize> = HashMap::new();
    let mut edges = 0;

    for index in 0..events.len() {
        match events[index].dependency_policy() {
            DependencyPolicy::NoOp => {}
            DependencyPolicy::Unsupported => {
                return Err(DagError::UnsupportedDependencies {
                    label: events[index].label,
                    kind: events[index].kind_name(),
                });
            }
            DependencyPolicy::AtomicPair(PairRole::Failure) => {
                pending.insert(events[index].fingerprint().clone(), index);
            }
            DependencyPolicy::AtomicPair(PairRole::Recovery) => {
                if let Some(failure) = pending.remove(events[index].fingerprint()) {
                    let recovery = events[index].label;
                    events[failure].add_dependent(recovery);
                    edges += 1;
                }
            }
        }
    }

    tracing::debug!(edges, "marked failure/recovery dependencies");
    Ok(edges)
}

// ============================================================================
// Transitive Closure
// ============================================================================

/// Collects `seeds` and every label reachable from them through
/// `dependent_labels`.
///
/// Labels missing from `index` are included but not expanded.
pub(crate) fn forward_closure(
    seeds: impl IntoIterator<Item = Label>,
    index: &HashMap<Label, Arc<Event>>,
) -> HashSet<Label> {
    let mut closure = HashSet::new();
    let mut worklist: Vec<Label> = seeds.into_iter().collect();

    while let Some(label) = worklist.pop() {
        if !closure.insert(label) {
            continue;
        }
        if let Some(event) = index.get(&label) {
            worklist.extend(
                event
                    .dependent_labels
                    .iter()
                    .filter(|dependent| !closure.contains(*dependent)),
            );
        }
    }

    closure
}

// ============================================================================
// Tests
// ============================================================================
