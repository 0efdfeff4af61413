//! The causal event DAG and its derived views.
//!
//! A *root* DAG is built once from a recorded trace: it validates labels,
//! marks failure/recovery dependencies and creates the run's shared state
//! (label index, prefix cache, fresh-label generator). *Views* are derived
//! from the root or from other views by removing input events; they never
//! re-derive dependencies and share the root's state through cheap handles.
//!
//! Every removal re-runs [`EventDag::peek`], which replaces the recorded
//! internal events with the ones the surviving inputs actually cause.

mod peek;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use culprit_sim::{SimError, SimulationFactory};
use culprit_types::{Event, Label, LabelGenerator};

use crate::dependency;
use crate::prefix_cache::SharedPrefixCache;
use crate::replay::ReplayError;

pub use peek::PeekConfig;

/// State shared by every view of one minimization run.
#[derive(Debug, Clone)]
struct Shared {
    /// Label → event over the full original trace.
    index: Arc<HashMap<Label, Arc<Event>>>,
    cache: SharedPrefixCache,
    labels: Arc<LabelGenerator>,
    peek: PeekConfig,
}

/// Ordered set of trace events with label and position indices.
#[derive(Debug, Clone)]
pub struct EventDag {
    events: Vec<Arc<Event>>,
    positions: HashMap<Label, usize>,
    shared: Shared,
}

impl EventDag {
    /// Builds a root DAG with the default peek configuration.
    pub fn new(events: Vec<Event>) -> Result<Self, DagError> {
        Self::with_peek_config(events, PeekConfig::default())
    }

    /// Builds a root DAG from a recorded trace.
    ///
    /// Fails on duplicate labels, on input kinds whose dependencies cannot
    /// be modelled, and on `dependent_labels` that resolve to no event.
    pub fn with_peek_config(mut events: Vec<Event>, peek: PeekConfig) -> Result<Self, DagError> {
        let mut seen = HashSet::with_capacity(events.len());
        for event in &events {
            if !seen.insert(event.label) {
                return Err(DagError::DuplicateLabel { label: event.label });
            }
        }

        dependency::mark_dependencies(&mut events)?;

        for event in &events {
            if let Some(missing) = event
                .dependent_labels
                .iter()
                .find(|label| !seen.contains(*label))
            {
                return Err(DagError::DanglingDependency {
                    label: event.label,
                    missing: *missing,
                });
            }
        }

        let labels = LabelGenerator::after(&seen);
        let events: Vec<Arc<Event>> = events.into_iter().map(Arc::new).collect();
        let index = events
            .iter()
            .map(|event| (event.label, Arc::clone(event)))
            .collect();

        tracing::debug!(
            events = events.len(),
            first_fresh = %labels.peek_next(),
            "built root event DAG"
        );

        let mut dag = Self {
            events,
            positions: HashMap::new(),
            shared: Shared {
                index: Arc::new(index),
                cache: SharedPrefixCache::new(),
                labels: Arc::new(labels),
                peek,
            },
        };
        dag.reindex();
        Ok(dag)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn events(&self) -> &[Arc<Event>] {
        &self.events
    }

    /// Input events of this view, in trace order.
    pub fn input_events(&self) -> Vec<Arc<Event>> {
        self.events
            .iter()
            .filter(|event| event.is_input())
            .cloned()
            .collect()
    }

    pub fn input_labels(&self) -> Vec<Label> {
        self.events
            .iter()
            .filter(|event| event.is_input())
            .map(|event| event.label)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, label: Label) -> bool {
        self.positions.contains_key(&label)
    }

    pub fn get(&self, label: Label) -> Option<&Arc<Event>> {
        self.positions.get(&label).map(|&position| &self.events[position])
    }

    /// The prefix cache shared by this view's family.
    pub fn prefix_cache(&self) -> &SharedPrefixCache {
        &self.shared.cache
    }

    pub fn peek_config(&self) -> &PeekConfig {
        &self.shared.peek
    }

    // ------------------------------------------------------------------------
    // Pruning
    // ------------------------------------------------------------------------

    /// Removes the requested input events and everything that depends on
    /// them, then re-infers internal events with [`EventDag::peek`].
    ///
    /// Recovery events are only ever removed as dependents of their failure;
    /// requesting a recovery directly leaves it in place. Internal events
    /// and events absent from this view are ignored.
    pub fn remove_events<F>(&mut self, ignored: &[Arc<Event>], factory: &F) -> Result<(), DagError>
    where
        F: SimulationFactory,
    {
        let seeds: Vec<Label> = ignored
            .iter()
            .filter(|event| {
                event
                    .as_input()
                    .is_some_and(|input| !input.kind.is_recovery())
            })
            .map(|event| event.label)
            .filter(|label| self.contains(*label))
            .collect();

        let doomed = dependency::forward_closure(seeds, &self.shared.index);
        let before = self.events.len();
        self.events.retain(|event| !doomed.contains(&event.label));
        self.reindex();

        tracing::debug!(
            requested = ignored.len(),
            removed = before - self.events.len(),
            remaining = self.events.len(),
            "removed events"
        );

        self.peek(factory)
    }

    /// Derives a new view without `ignored`, sharing this view's cache.
    pub fn ignore_portion<F>(&self, ignored: &[Arc<Event>], factory: &F) -> Result<EventDag, DagError>
    where
        F: SimulationFactory,
    {
        let mut view = self.clone();
        view.remove_events(ignored, factory)?;
        Ok(view)
    }

    /// Splits this view's input events into `k` contiguous, non-empty
    /// chunks whose sizes differ by at most one (larger chunks first).
    ///
    /// This is not the `ceil(n / k)`-sized interval scheme with a short last
    /// chunk: that one gives `[3, 3, 1]` for 7 into 3, and only three chunks
    /// for 6 into 4. Balanced sizes always yield exactly `k` chunks.
    pub fn split_inputs(&self, k: usize) -> Result<Vec<Vec<Arc<Event>>>, DagError> {
        let inputs = self.input_events();
        split_evenly(&inputs, k).ok_or_else(|| DagError::InvalidSplit {
            k,
            inputs: inputs.len(),
        })
    }

    fn reindex(&mut self) {
        self.positions = self
            .events
            .iter()
            .enumerate()
            .map(|(position, event)| (event.label, position))
            .collect();
    }
}

fn split_evenly<T: Clone>(items: &[T], k: usize) -> Option<Vec<Vec<T>>> {
    if k == 0 || k > items.len() {
        return None;
    }

    let base = items.len() / k;
    let extra = items.len() % k;
    let mut chunks = Vec::with_capacity(k);
    let mut start = 0;
    for chunk in 0..k {
        let size = base + usize::from(chunk < extra);
        chunks.push(items[start..start + size].to_vec());
        start += size;
    }
    Some(chunks)
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while building or deriving event DAGs.
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    #[error("label {label} appears more than once in the trace")]
    DuplicateLabel { label: Label },

    #[error("{label} depends on {missing}, which is not in the trace")]
    DanglingDependency { label: Label, missing: Label },

    #[error("{label}: dependencies of {kind} events are not supported")]
    UnsupportedDependencies { label: Label, kind: &'static str },

    #[error("cannot split {inputs} input events into {k} chunks")]
    InvalidSplit { k: usize, inputs: usize },

    #[error("simulation error during peek: {0}")]
    Simulation(#[from] SimError),

    #[error("replay error during peek: {0}")]
    Replay(#[from] ReplayError),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use culprit_sim::{ScriptedFactory, ScriptedWorld};
    use culprit_types::{DpId, HostId, InputEvent, InputKind, Timestamp};
    use test_case::test_case;

    fn input(label: u64, kind: InputKind) -> Event {
        Event::input(Label::new(label), Timestamp::from_secs(label), InputEvent::new(kind))
    }

    fn custom(label: u64) -> Event {
        input(
            label,
            InputKind::Custom {
                class: format!("i{label}"),
            },
        )
    }

    fn labels(events: &[Arc<Event>]) -> Vec<u64> {
        events.iter().map(|e| e.label.as_u64()).collect()
    }

    fn factory() -> ScriptedFactory {
        ScriptedFactory::new(ScriptedWorld::default())
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let err = EventDag::new(vec![custom(1), custom(1)]).unwrap_err();
        assert!(matches!(err, DagError::DuplicateLabel { .. }));
    }

    #[test]
    fn dangling_dependencies_are_rejected() {
        let mut event = custom(1);
        event.add_dependent(Label::new(99));
        let err = EventDag::new(vec![event]).unwrap_err();
        assert!(matches!(
            err,
            DagError::DanglingDependency { missing, .. } if missing == Label::new(99)
        ));
    }

    #[test]
    fn unsupported_input_is_rejected_at_construction() {
        let err = EventDag::new(vec![input(
            1,
            InputKind::HostMigration {
                host: HostId::new(1),
                old_dpid: DpId::new(1),
                old_port: 1,
                new_dpid: DpId::new(2),
                new_port: 1,
            },
        )])
        .unwrap_err();
        assert!(matches!(err, DagError::UnsupportedDependencies { .. }));
    }

    #[test]
    fn removing_failure_removes_its_recovery() {
        let dpid = DpId::new(1);
        let dag = EventDag::new(vec![
            input(1, InputKind::SwitchFailure { dpid }),
            custom(2),
            input(3, InputKind::SwitchRecovery { dpid }),
        ])
        .unwrap();

        let failure = Arc::clone(&dag.events()[0]);
        let view = dag.ignore_portion(&[failure], &factory()).unwrap();
        assert_eq!(labels(view.events()), vec![2]);
        assert_eq!(dag.len(), 3, "the parent view is untouched");
    }

    #[test]
    fn removing_recovery_directly_is_a_no_op() {
        let dpid = DpId::new(1);
        let dag = EventDag::new(vec![
            input(1, InputKind::SwitchFailure { dpid }),
            input(2, InputKind::SwitchRecovery { dpid }),
        ])
        .unwrap();

        let recovery = Arc::clone(&dag.events()[1]);
        let view = dag.ignore_portion(&[recovery], &factory()).unwrap();
        assert_eq!(labels(view.events()), vec![1, 2]);
    }

    #[test]
    fn views_share_the_prefix_cache() {
        let dag = EventDag::new(vec![custom(1), custom(2)]).unwrap();
        let first = Arc::clone(&dag.events()[0]);
        let view = dag.ignore_portion(&[first], &factory()).unwrap();
        assert!(view.prefix_cache().ptr_eq(dag.prefix_cache()));
    }

    #[test]
    fn accessors_reflect_the_view() {
        let dag = EventDag::new(vec![custom(1), custom(2)]).unwrap();
        assert!(dag.contains(Label::new(2)));
        assert!(!dag.contains(Label::new(3)));
        assert_eq!(dag.get(Label::new(2)).map(|e| e.label), Some(Label::new(2)));
        assert_eq!(dag.input_labels(), vec![Label::new(1), Label::new(2)]);
    }

    #[test_case(7, 1 => vec![7]; "one chunk")]
    #[test_case(7, 3 => vec![3, 2, 2]; "uneven")]
    #[test_case(7, 5 => vec![2, 2, 1, 1, 1]; "more chunks than half")]
    #[test_case(6, 4 => vec![2, 2, 1, 1]; "exactly k chunks where ceil intervals would give three")]
    #[test_case(6, 6 => vec![1, 1, 1, 1, 1, 1]; "singletons")]
    fn split_sizes(n: u64, k: usize) -> Vec<usize> {
        let dag = EventDag::new((1..=n).map(custom).collect()).unwrap();
        dag.split_inputs(k)
            .unwrap()
            .iter()
            .map(Vec::len)
            .collect()
    }

    #[test_case(0; "zero")]
    #[test_case(4; "more than inputs")]
    fn invalid_split(k: usize) {
        let dag = EventDag::new((1..=3).map(custom).collect()).unwrap();
        assert!(matches!(
            dag.split_inputs(k),
            Err(DagError::InvalidSplit { inputs: 3, .. })
        ));
    }
}
