//! Minimal causal sequence search (ddmin over input events).
//!
//! Starting from a root DAG whose full replay reproduces a violation, the
//! drivers repeatedly split the surviving inputs into `k` chunks and try each
//! complement. The first complement that still reproduces becomes the new
//! candidate and `k` resets; when none does, `k` doubles (capped at the input
//! count). The search stops when the candidate can no longer be subdivided;
//! a last remaining input is dropped too if the violation survives without
//! it. The result is locally minimal: removing any single remaining chunk
//! loses the violation. Recoveries are only removed together with their
//! failure, so a minimal sequence keeps every failure its recoveries need.
//!
//! [`McsFinder`] evaluates complements one at a time. [`EfficientMcsFinder`]
//! evaluates a round's complements in parallel and memoizes verdicts by the
//! set of surviving inputs; it adopts the same complement the basic driver
//! would, so both return identical results.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use culprit_sim::{OracleError, SimError, SimulationFactory, Violation};
use culprit_types::{Event, Label};
use rayon::prelude::*;

use crate::dag::{DagError, EventDag};
use crate::harness::ReplayHarness;
use crate::prefix_cache::CacheStats;
use crate::replay::ReplayError;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for minimization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McsConfig {
    /// Number of chunks in the first round and after every reduction.
    pub initial_granularity: usize,
    /// Upper bound on candidate replays.
    pub max_replays: u64,
    /// Assume the full trace reproduces instead of replaying it first.
    pub skip_seed_check: bool,
}

impl Default for McsConfig {
    fn default() -> Self {
        Self {
            initial_granularity: 2,
            max_replays: 10_000,
            skip_seed_check: false,
        }
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Counters for one minimization run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct McsStats {
    /// Candidate replays charged against `max_replays`.
    pub replays: u64,
    /// Candidate verdicts answered from the memo.
    pub memo_hits: u64,
    /// Split rounds.
    pub rounds: usize,
    /// Accepted reductions.
    pub reductions: usize,
    pub original_inputs: usize,
    pub minimized_inputs: usize,
    pub cache: CacheStats,
    pub elapsed: Duration,
}

impl McsStats {
    /// Percentage of inputs removed.
    pub fn reduction_pct(&self) -> f64 {
        if self.original_inputs == 0 {
            return 0.0;
        }
        (1.0 - self.minimized_inputs as f64 / self.original_inputs as f64) * 100.0
    }
}

/// Result of a minimization run.
#[derive(Debug, Clone)]
pub struct McsOutcome {
    /// The minimal causal sequence: surviving inputs, in trace order.
    pub mcs: Vec<Arc<Event>>,
    /// The final view, including the internal events inferred for it.
    pub dag: EventDag,
    /// Violations reported by the last reproducing replay.
    pub violations: Vec<Violation>,
    pub stats: McsStats,
}

impl McsOutcome {
    pub fn labels(&self) -> Vec<Label> {
        self.mcs.iter().map(|event| event.label).collect()
    }
}

// ============================================================================
// Search
// ============================================================================

struct Adopted {
    view: EventDag,
    violations: Vec<Violation>,
}

/// How a driver evaluates candidates.
trait Trials {
    fn trial(&self, view: &EventDag) -> Result<Vec<Violation>, McsError>;

    /// Returns the lowest-index complement of `chunks` that reproduces.
    ///
    /// Complements that remove nothing (a chunk of recoveries only) are
    /// skipped, otherwise the search would adopt the same candidate forever.
    fn round(&self, current: &EventDag, chunks: &[Vec<Arc<Event>>])
    -> Result<Option<Adopted>, McsError>;

    fn replays(&self) -> u64;

    fn memo_hits(&self) -> u64 {
        0
    }
}

fn ddmin(root: EventDag, config: &McsConfig, trials: &impl Trials) -> Result<McsOutcome, McsError> {
    let started = Instant::now();
    let original_inputs = root.input_events().len();

    tracing::info!(
        events = root.len(),
        inputs = original_inputs,
        "starting minimization"
    );

    let mut violations = Vec::new();
    if original_inputs > 0 && !config.skip_seed_check {
        violations = trials.trial(&root)?;
        if violations.is_empty() {
            return Err(McsError::SeedNotReproducible);
        }
        tracing::info!(violations = violations.len(), "seed trace reproduces");
    }

    let initial = config.initial_granularity.max(2);
    let mut current = root;
    let mut k = initial;
    let mut rounds = 0;
    let mut reductions = 0;

    loop {
        let n = current.input_events().len();
        if k > n {
            // A lone input stays unless the violation needs no input at all.
            if n == 1 {
                rounds += 1;
                if let Some(adopted) = trials.round(&current, &current.split_inputs(1)?)? {
                    tracing::info!(from = n, to = 0, "violation needs no inputs");
                    current = adopted.view;
                    violations = adopted.violations;
                    reductions += 1;
                }
            }
            break;
        }
        rounds += 1;

        let chunks = current.split_inputs(k)?;
        tracing::debug!(round = rounds, k, inputs = n, "trying complements");

        match trials.round(&current, &chunks)? {
            Some(adopted) => {
                let remaining = adopted.view.input_events().len();
                tracing::info!(from = n, to = remaining, k, "reduced candidate");
                current = adopted.view;
                violations = adopted.violations;
                reductions += 1;
                k = initial;
            }
            None => {
                if k >= n {
                    break;
                }
                k = (k * 2).min(n);
            }
        }
    }

    let mcs = current.input_events();
    let stats = McsStats {
        replays: trials.replays(),
        memo_hits: trials.memo_hits(),
        rounds,
        reductions,
        original_inputs,
        minimized_inputs: mcs.len(),
        cache: current.prefix_cache().stats(),
        elapsed: started.elapsed(),
    };

    tracing::info!(
        original = stats.original_inputs,
        minimized = stats.minimized_inputs,
        replays = stats.replays,
        rounds = stats.rounds,
        "minimization complete"
    );

    Ok(McsOutcome {
        mcs,
        dag: current,
        violations,
        stats,
    })
}

fn count_replay(replays: &AtomicU64, limit: u64) -> Result<(), McsError> {
    let used = replays.fetch_add(1, Ordering::Relaxed);
    if used >= limit {
        replays.fetch_sub(1, Ordering::Relaxed);
        return Err(McsError::ReplayBudgetExhausted { limit });
    }
    Ok(())
}

// ============================================================================
// Basic Driver
// ============================================================================

/// Sequential ddmin driver.
pub struct McsFinder<'a, F, H> {
    dag: EventDag,
    factory: &'a F,
    harness: &'a H,
    config: McsConfig,
    replays: AtomicU64,
}

impl<'a, F, H> McsFinder<'a, F, H>
where
    F: SimulationFactory,
    H: ReplayHarness,
{
    pub fn new(dag: EventDag, factory: &'a F, harness: &'a H, config: McsConfig) -> Self {
        Self {
            dag,
            factory,
            harness,
            config,
            replays: AtomicU64::new(0),
        }
    }

    /// Runs the search to completion.
    pub fn find(self) -> Result<McsOutcome, McsError> {
        let root = self.dag.clone();
        ddmin(root, &self.config, &self)
    }
}

impl<F, H> Trials for McsFinder<'_, F, H>
where
    F: SimulationFactory,
    H: ReplayHarness,
{
    fn trial(&self, view: &EventDag) -> Result<Vec<Violation>, McsError> {
        count_replay(&self.replays, self.config.max_replays)?;
        self.harness.replay(view)
    }

    fn round(
        &self,
        current: &EventDag,
        chunks: &[Vec<Arc<Event>>],
    ) -> Result<Option<Adopted>, McsError> {
        let n = current.input_events().len();
        for chunk in chunks {
            let view = current.ignore_portion(chunk, self.factory)?;
            if view.input_events().len() == n {
                continue;
            }
            let violations = self.trial(&view)?;
            if !violations.is_empty() {
                return Ok(Some(Adopted { view, violations }));
            }
        }
        Ok(None)
    }

    fn replays(&self) -> u64 {
        self.replays.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Efficient Driver
// ============================================================================

/// Parallel, memoizing ddmin driver.
///
/// Complements of one round are evaluated concurrently on the rayon pool;
/// verdicts are memoized by the labels of the surviving inputs. Replays are
/// charged against the budget afterwards, in index order, and only up to the
/// adopted complement, so a budget that suffices for [`McsFinder`] suffices
/// here too.
pub struct EfficientMcsFinder<'a, F, H> {
    dag: EventDag,
    factory: &'a F,
    harness: &'a H,
    config: McsConfig,
    replays: AtomicU64,
    memo_hits: AtomicU64,
    memo: Mutex<HashMap<Vec<Label>, Verdict>>,
}

#[derive(Debug, Clone)]
struct Verdict {
    violations: Vec<Violation>,
    /// Set once the replay behind this verdict has been charged.
    charged: bool,
}

struct Evaluated {
    key: Vec<Label>,
    view: EventDag,
    violations: Vec<Violation>,
    uncharged: bool,
}

impl<'a, F, H> EfficientMcsFinder<'a, F, H>
where
    F: SimulationFactory + Sync,
    H: ReplayHarness + Sync,
{
    pub fn new(dag: EventDag, factory: &'a F, harness: &'a H, config: McsConfig) -> Self {
        Self {
            dag,
            factory,
            harness,
            config,
            replays: AtomicU64::new(0),
            memo_hits: AtomicU64::new(0),
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Runs the search to completion.
    pub fn find(self) -> Result<McsOutcome, McsError> {
        let root = self.dag.clone();
        ddmin(root, &self.config, &self)
    }

    fn memoized(&self, key: &[Label]) -> Option<Verdict> {
        let verdict = self
            .memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();
        if verdict.is_some() {
            self.memo_hits.fetch_add(1, Ordering::Relaxed);
        }
        verdict
    }

    /// Replays `view` unless memoized, without touching the budget.
    fn evaluate(&self, view: EventDag) -> Result<Evaluated, McsError> {
        let key = view.input_labels();
        if let Some(verdict) = self.memoized(&key) {
            return Ok(Evaluated {
                key,
                view,
                violations: verdict.violations,
                uncharged: !verdict.charged,
            });
        }

        let violations = self.harness.replay(&view)?;
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.clone(),
                Verdict {
                    violations: violations.clone(),
                    charged: false,
                },
            );
        Ok(Evaluated {
            key,
            view,
            violations,
            uncharged: true,
        })
    }

    fn charge(&self, key: &[Label]) -> Result<(), McsError> {
        count_replay(&self.replays, self.config.max_replays)?;
        if let Some(verdict) = self
            .memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(key)
        {
            verdict.charged = true;
        }
        Ok(())
    }
}

impl<F, H> Trials for EfficientMcsFinder<'_, F, H>
where
    F: SimulationFactory + Sync,
    H: ReplayHarness + Sync,
{
    fn trial(&self, view: &EventDag) -> Result<Vec<Violation>, McsError> {
        let key = view.input_labels();
        if let Some(verdict) = self.memoized(&key) {
            if !verdict.charged {
                self.charge(&key)?;
            }
            return Ok(verdict.violations);
        }

        count_replay(&self.replays, self.config.max_replays)?;
        let violations = self.harness.replay(view)?;
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key,
                Verdict {
                    violations: violations.clone(),
                    charged: true,
                },
            );
        Ok(violations)
    }

    fn round(
        &self,
        current: &EventDag,
        chunks: &[Vec<Arc<Event>>],
    ) -> Result<Option<Adopted>, McsError> {
        let n = current.input_events().len();
        let results: Vec<Result<Option<Evaluated>, McsError>> = chunks
            .par_iter()
            .map(|chunk| {
                let view = current.ignore_portion(chunk, self.factory)?;
                if view.input_events().len() == n {
                    return Ok(None);
                }
                self.evaluate(view).map(Some)
            })
            .collect();

        // Index order, so the choice and the budget match the sequential driver.
        for result in results {
            let Some(evaluated) = result? else {
                continue;
            };
            if evaluated.uncharged {
                self.charge(&evaluated.key)?;
            }
            if !evaluated.violations.is_empty() {
                return Ok(Some(Adopted {
                    view: evaluated.view,
                    violations: evaluated.violations,
                }));
            }
        }
        Ok(None)
    }

    fn replays(&self) -> u64 {
        self.replays.load(Ordering::Relaxed)
    }

    fn memo_hits(&self) -> u64 {
        self.memo_hits.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors during minimization.
#[derive(Debug, thiserror::Error)]
pub enum McsError {
    #[error("the full trace does not reproduce the violation")]
    SeedNotReproducible,

    #[error("replay budget of {limit} candidate replays exhausted")]
    ReplayBudgetExhausted { limit: u64 },

    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    Replay(#[from] ReplayError),

    #[error(transparent)]
    Simulation(#[from] SimError),

    #[error(transparent)]
    Oracle(#[from] OracleError),
}

impl McsError {
    /// Returns true if an invariant check ended the run on purpose.
    pub fn is_halted(&self) -> bool {
        matches!(self, McsError::Oracle(OracleError::Halted { .. }))
    }
}

// ============================================================================
// Tests
// ============================================================================
