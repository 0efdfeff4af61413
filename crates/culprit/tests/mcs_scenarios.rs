//! Minimization scenarios driven by mock harnesses.
//!
//! Traces contain input events only, so peek never needs to replay and the
//! verdict comes entirely from the harness.

use std::collections::HashSet;

use culprit::{
    EfficientMcsFinder, EventDag, McsConfig, McsError, McsFinder, McsOutcome, ReplayHarness,
};
use culprit_sim::{CheckKind, ScriptedFactory, ScriptedWorld, Violation};
use culprit_types::{DpId, Event, InputEvent, InputKind, Label, Timestamp};
use proptest::prelude::*;
use test_case::test_case;

// ============================================================================
// Helpers
// ============================================================================

/// Reproduces iff every required label survives.
struct RequireAll(HashSet<Label>);

impl RequireAll {
    fn new(labels: impl IntoIterator<Item = u64>) -> Self {
        Self(labels.into_iter().map(Label::new).collect())
    }
}

impl ReplayHarness for RequireAll {
    fn replay(&self, dag: &EventDag) -> Result<Vec<Violation>, McsError> {
        let present: HashSet<Label> = dag.input_labels().into_iter().collect();
        Ok(if self.0.is_subset(&present) {
            vec![Violation::new(CheckKind::Loops, "loop s1 -> s2 -> s1")]
        } else {
            Vec::new()
        })
    }
}

fn custom(label: u64) -> Event {
    Event::input(
        Label::new(label),
        Timestamp::from_secs(label),
        InputEvent::new(InputKind::Custom {
            class: format!("input{label}"),
        }),
    )
}

fn trace(n: u64) -> EventDag {
    EventDag::new((1..=n).map(custom).collect()).unwrap()
}

fn factory() -> ScriptedFactory {
    ScriptedFactory::new(ScriptedWorld::default())
}

fn basic(dag: EventDag, harness: &RequireAll) -> McsOutcome {
    McsFinder::new(dag, &factory(), harness, McsConfig::default())
        .find()
        .unwrap()
}

fn efficient(dag: EventDag, harness: &RequireAll) -> McsOutcome {
    EfficientMcsFinder::new(dag, &factory(), harness, McsConfig::default())
        .find()
        .unwrap()
}

fn as_u64(labels: &[Label]) -> Vec<u64> {
    labels.iter().map(|label| label.as_u64()).collect()
}

// ============================================================================
// Six-input scenarios
// ============================================================================

#[test_case(&[1] ; "first input alone")]
#[test_case(&[1, 6] ; "first and last")]
#[test_case(&[1, 2, 3, 4, 5, 6] ; "every input")]
fn basic_driver_finds_mcs(expected: &[u64]) {
    let harness = RequireAll::new(expected.iter().copied());
    let outcome = basic(trace(6), &harness);
    assert_eq!(as_u64(&outcome.labels()), expected);
    assert!(!outcome.violations.is_empty());
}

#[test_case(&[1] ; "first input alone")]
#[test_case(&[1, 6] ; "first and last")]
#[test_case(&[1, 2, 3, 4, 5, 6] ; "every input")]
fn efficient_driver_finds_mcs(expected: &[u64]) {
    let harness = RequireAll::new(expected.iter().copied());
    let outcome = efficient(trace(6), &harness);
    assert_eq!(as_u64(&outcome.labels()), expected);
}

#[test]
fn recovery_keeps_its_failure() {
    let dpid = DpId::new(1);
    let dag = EventDag::new(vec![
        Event::input(
            Label::new(1),
            Timestamp::from_secs(1),
            InputEvent::new(InputKind::SwitchFailure { dpid }),
        ),
        custom(2),
        Event::input(
            Label::new(3),
            Timestamp::from_secs(3),
            InputEvent::new(InputKind::SwitchRecovery { dpid }),
        ),
        custom(4),
    ])
    .unwrap();

    let harness = RequireAll::new([3]);
    let basic = basic(dag.clone(), &harness);
    let efficient = efficient(dag, &harness);

    assert_eq!(as_u64(&basic.labels()), vec![1, 3]);
    assert_eq!(basic.labels(), efficient.labels());
}

#[test]
fn single_input_trace_is_already_minimal() {
    let harness = RequireAll::new([1]);
    let outcome = basic(trace(1), &harness);
    assert_eq!(as_u64(&outcome.labels()), vec![1]);
    assert_eq!(outcome.stats.rounds, 1, "only the empty candidate is tried");
    assert_eq!(outcome.stats.replays, 2);
}

// ============================================================================
// Properties
// ============================================================================

fn trace_and_mcs() -> impl Strategy<Value = (u64, Vec<u64>)> {
    (1u64..=12).prop_flat_map(|n| {
        prop::collection::vec(any::<bool>(), n as usize).prop_map(move |keep| {
            let mcs: Vec<u64> = (1..=n).filter(|&i| keep[(i - 1) as usize]).collect();
            (n, mcs)
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn both_drivers_recover_ground_truth((n, mcs) in trace_and_mcs()) {
        let harness = RequireAll::new(mcs.iter().copied());

        let basic = basic(trace(n), &harness);
        let efficient = efficient(trace(n), &harness);

        prop_assert_eq!(as_u64(&basic.labels()), mcs.clone());
        prop_assert_eq!(as_u64(&efficient.labels()), mcs);
    }

    #[test]
    fn split_inputs_partitions_contiguously(n in 1u64..30, k_seed in any::<usize>()) {
        let k = 1 + k_seed % n as usize;
        let dag = trace(n);
        let chunks = dag.split_inputs(k).unwrap();

        prop_assert_eq!(chunks.len(), k);
        prop_assert!(chunks.iter().all(|chunk| !chunk.is_empty()));

        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        let largest = sizes.iter().copied().max().unwrap_or(0);
        let smallest = sizes.iter().copied().min().unwrap_or(0);
        prop_assert!(largest - smallest <= 1);
        prop_assert!(sizes.windows(2).all(|pair| pair[0] >= pair[1]));

        let rebuilt: Vec<Label> = chunks.iter().flatten().map(|event| event.label).collect();
        prop_assert_eq!(rebuilt, dag.input_labels());
    }

    #[test]
    fn split_outside_range_is_rejected(n in 0u64..10, extra in 1usize..5) {
        let dag = trace(n);
        prop_assert!(dag.split_inputs(0).is_err());
        prop_assert!(dag.split_inputs(n as usize + extra).is_err());
    }
}
