//! Peek: causal inference by bounded forward replay.
//!
//! After a view loses some inputs, the internal events recorded in the
//! original trace no longer describe what the system will do. Peek walks the
//! surviving inputs in order and, for each one that was followed by internal
//! events in the trace, replays everything inferred so far plus that input
//! into a fresh simulation, then records every message receipt and state
//! change observed before a deadline. The recorded events replace the stale
//! ones.
//!
//! Inferred prefixes are memoized in the run's shared prefix cache, keyed by
//! the sequence of surviving input labels.

use std::sync::{Arc, Mutex, PoisonError};

use culprit_sim::{Disposition, NotificationStream, Simulation, SimulationFactory};
use culprit_types::{Event, SimDuration, Timestamp};

use super::{DagError, EventDag};
use crate::replay::{ReplayConfig, Replayer};

/// Settings for peek inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeekConfig {
    /// How long past the next input to keep observing.
    pub window: SimDuration,
    /// Replay settings for the inferred prefix.
    pub replay: ReplayConfig,
}

impl Default for PeekConfig {
    fn default() -> Self {
        Self {
            window: SimDuration::from_secs(3),
            replay: ReplayConfig::default(),
        }
    }
}

impl EventDag {
    /// Replaces this view's internal events with the ones its surviving
    /// inputs actually cause.
    ///
    /// Internal events recorded before the first input are dropped. A view
    /// with no inputs is left unchanged.
    pub fn peek<F>(&mut self, factory: &F) -> Result<(), DagError>
    where
        F: SimulationFactory,
    {
        let inputs: Vec<usize> = self
            .events
            .iter()
            .enumerate()
            .filter(|(_, event)| event.is_input())
            .map(|(position, _)| position)
            .collect();
        if inputs.is_empty() {
            return Ok(());
        }

        let keys: Vec<_> = inputs.iter().map(|&p| self.events[p].label).collect();
        let window = self.shared.peek.window;
        let last_time = self.events.last().map_or(Timestamp::ZERO, |event| event.time);

        let (mut inferred, resume) = match self.shared.cache.longest_match(&keys) {
            Some(found) => (found.events, found.len),
            None => (Vec::new(), 0),
        };
        tracing::debug!(inputs = inputs.len(), cached = resume, "peek");

        for (idx, &position) in inputs.iter().enumerate().skip(resume) {
            let input = Arc::clone(&self.events[position]);
            let (slice_end, deadline) = match inputs.get(idx + 1) {
                Some(&next) => (next, self.events[next].time + window),
                None => (self.events.len(), last_time + window),
            };
            let expected = slice_end - position - 1;

            inferred.push(Arc::clone(&input));
            if expected == 0 {
                tracing::trace!(label = %input.label, "no internal events expected, skipping replay");
            } else {
                let observed = self.observe(factory, &inferred, deadline)?;
                tracing::trace!(
                    label = %input.label,
                    expected,
                    observed = observed.len(),
                    %deadline,
                    "peeked"
                );
                inferred.extend(observed);
            }

            self.shared.cache.insert(&keys[..=idx], inferred.clone());
        }

        self.events = inferred;
        self.reindex();
        Ok(())
    }

    /// Replays `prefix` into a fresh simulation and records every
    /// notification observed up to `deadline`.
    fn observe<F>(
        &self,
        factory: &F,
        prefix: &[Arc<Event>],
        deadline: Timestamp,
    ) -> Result<Vec<Arc<Event>>, DagError>
    where
        F: SimulationFactory,
    {
        let mut sim = factory.bootstrap()?;
        Replayer::new(self.shared.peek.replay.clone())
            .ignore_unsupported(true)
            .replay(&mut sim, prefix)?;

        for stream in NotificationStream::ALL {
            sim.flush(stream);
        }

        let recorded = Arc::new(Mutex::new(Vec::new()));
        let subscription = {
            let recorded = Arc::clone(&recorded);
            let labels = Arc::clone(&self.shared.labels);
            sim.notifications()
                .subscribe(&NotificationStream::ALL, move |notification| {
                    let event = Event::internal(
                        labels.next_label(),
                        notification.time(),
                        notification.to_internal(),
                    );
                    recorded
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(Arc::new(event));
                    Disposition::Forward
                })
        };

        let outcome = sim.run_until(deadline);
        drop(subscription);
        outcome?;

        let observed = std::mem::take(&mut *recorded.lock().unwrap_or_else(PoisonError::into_inner));
        Ok(observed)
    }
}
