//! Replay harnesses: map a candidate DAG to an invariant verdict.

use culprit_sim::{
    Disposition, NamedCheck, NotificationStream, Simulation, SimulationFactory, Violation,
};
use culprit_types::SimDuration;

use crate::dag::EventDag;
use crate::mcs::McsError;
use crate::replay::{ReplayConfig, Replayer};

/// Answers "does this candidate still reproduce the violation?".
///
/// An empty result means the violation did not reproduce.
pub trait ReplayHarness {
    fn replay(&self, dag: &EventDag) -> Result<Vec<Violation>, McsError>;
}

impl<H: ReplayHarness + ?Sized> ReplayHarness for &H {
    fn replay(&self, dag: &EventDag) -> Result<Vec<Violation>, McsError> {
        (**self).replay(dag)
    }
}

/// Replays a DAG into a fresh simulation and applies a named check.
///
/// After the last event the simulation runs freely for `settle` so that
/// reactions to the final inputs can surface before the check.
#[derive(Debug, Clone)]
pub struct SimulationHarness<F> {
    factory: F,
    check: NamedCheck,
    replay: ReplayConfig,
    settle: SimDuration,
}

impl<F: SimulationFactory> SimulationHarness<F> {
    pub fn new(factory: F, check: NamedCheck) -> Self {
        Self {
            factory,
            check,
            replay: ReplayConfig::default(),
            settle: SimDuration::from_secs(3),
        }
    }

    pub fn with_replay_config(mut self, replay: ReplayConfig) -> Self {
        self.replay = replay;
        self
    }

    pub fn with_settle(mut self, settle: SimDuration) -> Self {
        self.settle = settle;
        self
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn check(&self) -> &NamedCheck {
        &self.check
    }
}

impl<F: SimulationFactory> ReplayHarness for SimulationHarness<F> {
    fn replay(&self, dag: &EventDag) -> Result<Vec<Violation>, McsError> {
        let mut sim = self.factory.bootstrap()?;
        let stats = Replayer::new(self.replay.clone()).replay(&mut sim, dag.events())?;

        for stream in NotificationStream::ALL {
            sim.flush(stream);
        }
        if let Some(last) = dag.events().last() {
            let _forward = sim
                .notifications()
                .subscribe(&NotificationStream::ALL, |_| Disposition::Forward);
            sim.run_until(last.time + self.settle)?;
        }

        let violations = self.check.evaluate(&sim)?;
        tracing::debug!(
            check = self.check.name(),
            injected = stats.injected,
            timed_out = stats.timed_out,
            violations = violations.len(),
            "replayed candidate"
        );
        Ok(violations)
    }
}
