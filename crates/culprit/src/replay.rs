//! Replays a recorded event sequence into a simulation.
//!
//! Before each event the replay clock is advanced to the event's recorded
//! time. Input events are injected. Internal events are awaited: the
//! replayer steps the clock until the simulation releases a pending
//! notification with the same fingerprint, or the wait times out.

use std::sync::Arc;

use culprit_sim::{SimError, Simulation};
use culprit_types::{Event, EventKind, InputEvent, InternalEvent, Label, SimDuration};

// ============================================================================
// Configuration
// ============================================================================

/// Timing knobs for replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    /// How long to wait for an expected internal event.
    pub internal_event_timeout: SimDuration,
    /// Clock step while waiting.
    pub poll_interval: SimDuration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            internal_event_timeout: SimDuration::from_millis(500),
            poll_interval: SimDuration::from_millis(50),
        }
    }
}

/// Counters for one replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub injected: usize,
    pub released: usize,
    pub timed_out: usize,
    pub skipped: usize,
}

// ============================================================================
// Replayer
// ============================================================================

/// Drives a simulation through a recorded event sequence.
#[derive(Debug, Clone, Default)]
pub struct Replayer {
    config: ReplayConfig,
    ignore_unsupported: bool,
}

impl Replayer {
    pub fn new(config: ReplayConfig) -> Self {
        Self {
            config,
            ignore_unsupported: false,
        }
    }

    /// Skips input kinds whose dependencies are not modelled instead of
    /// failing on them.
    pub fn ignore_unsupported(mut self, ignore: bool) -> Self {
        self.ignore_unsupported = ignore;
        self
    }

    /// Replays `events` in order.
    pub fn replay<S>(&self, sim: &mut S, events: &[Arc<Event>]) -> Result<ReplayStats, ReplayError>
    where
        S: Simulation + ?Sized,
    {
        let mut stats = ReplayStats::default();

        for event in events {
            if sim.now() < event.time {
                sim.run_until(event.time).map_err(|source| ReplayError::Clock {
                    label: event.label,
                    source,
                })?;
            }

            match &event.kind {
                EventKind::Input(input) => self.inject(sim, event.label, input, &mut stats)?,
                EventKind::Internal(internal) => {
                    self.await_internal(sim, event.label, internal, &mut stats)?;
                }
            }
        }

        tracing::trace!(?stats, "replay finished");
        Ok(stats)
    }

    fn inject<S>(
        &self,
        sim: &mut S,
        label: Label,
        input: &InputEvent,
        stats: &mut ReplayStats,
    ) -> Result<(), ReplayError>
    where
        S: Simulation + ?Sized,
    {
        if input.kind.is_unsupported() {
            if self.ignore_unsupported {
                tracing::debug!(%label, kind = input.kind.name(), "skipping unsupported input");
                stats.skipped += 1;
                return Ok(());
            }
            return Err(ReplayError::UnsupportedInput {
                label,
                kind: input.kind.name(),
            });
        }

        sim.inject(input)
            .map_err(|source| ReplayError::Injection { label, source })?;
        stats.injected += 1;
        Ok(())
    }

    fn await_internal<S>(
        &self,
        sim: &mut S,
        label: Label,
        internal: &InternalEvent,
        stats: &mut ReplayStats,
    ) -> Result<(), ReplayError>
    where
        S: Simulation + ?Sized,
    {
        let deadline = sim.now() + self.config.internal_event_timeout;
        let step = self.config.poll_interval.max(SimDuration::from_nanos(1));

        loop {
            if sim.release(internal) {
                stats.released += 1;
                return Ok(());
            }
            if sim.now() >= deadline {
                tracing::warn!(
                    %label,
                    fingerprint = %internal.fingerprint,
                    timeout = %self.config.internal_event_timeout,
                    "timed out waiting for internal event"
                );
                stats.timed_out += 1;
                return Ok(());
            }
            let next = (sim.now() + step).min(deadline);
            sim.run_until(next)
                .map_err(|source| ReplayError::Clock { label, source })?;
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while replaying a trace.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("failed to inject {label}: {source}")]
    Injection {
        label: Label,
        #[source]
        source: SimError,
    },

    #[error("simulation failed advancing the clock to {label}: {source}")]
    Clock {
        label: Label,
        #[source]
        source: SimError,
    },

    #[error("{label} is a {kind} input, which replay does not support")]
    UnsupportedInput { label: Label, kind: &'static str },
}

// ============================================================================
// Tests
// ============================================================================
