//! Deterministic scripted simulation.
//!
//! A [`ScriptedWorld`] declares how the system under test reacts to events:
//! each [`Reaction`] emits a notification some time after a triggering event
//! occurs, and each [`ViolationRule`] reports a violation once all of its
//! required events have occurred (and none of its `unless` events have).
//! Reactions can trigger on delivered notifications too, so causal chains
//! such as `link failure → port status → flow_mod` are expressible.
//!
//! The simulation is single-threaded and fully deterministic: the event queue
//! is ordered by `(time, sequence)` and nothing depends on wall-clock time.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use culprit_types::{
    ControllerId, DpId, Fingerprint, InputEvent, InternalEvent, SimDuration, Timestamp,
};
use serde::{Deserialize, Serialize};

use crate::notify::{Disposition, Notification, NotificationHub, NotificationStream};
use crate::oracle::{CheckKind, Violation};
use crate::{InvariantProbe, SimError, Simulation, SimulationFactory};

// ============================================================================
// World Description
// ============================================================================

/// Matches occurred events by fingerprint and, optionally, kind name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub fingerprint: Fingerprint,
    /// Kind name such as `switch_failure`; `None` matches any kind.
    #[serde(default)]
    pub kind: Option<String>,
}

impl Trigger {
    pub fn on(fingerprint: impl Into<Fingerprint>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            kind: None,
        }
    }

    pub fn on_kind(fingerprint: impl Into<Fingerprint>, kind: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            kind: Some(kind.into()),
        }
    }

    fn matches(&self, kind: &str, fingerprint: &Fingerprint) -> bool {
        &self.fingerprint == fingerprint && self.kind.as_deref().is_none_or(|k| k == kind)
    }
}

/// Notification template emitted by a reaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emission {
    MessageReceipt {
        dpid: DpId,
        controller: ControllerId,
        fingerprint: Fingerprint,
    },
    StateChange {
        controller: ControllerId,
        name: String,
        value: String,
        fingerprint: Fingerprint,
    },
}

impl Emission {
    fn at(&self, time: Timestamp) -> Notification {
        match self {
            Emission::MessageReceipt {
                dpid,
                controller,
                fingerprint,
            } => Notification::MessageReceipt {
                dpid: *dpid,
                controller: *controller,
                fingerprint: fingerprint.clone(),
                time,
            },
            Emission::StateChange {
                controller,
                name,
                value,
                fingerprint,
            } => Notification::StateChange {
                controller: *controller,
                name: name.clone(),
                value: value.clone(),
                fingerprint: fingerprint.clone(),
                time,
            },
        }
    }
}

/// Emits `emits` a fixed delay after `trigger` occurs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub trigger: Trigger,
    #[serde(default)]
    pub after: SimDuration,
    pub emits: Emission,
}

/// Reports a violation of `check` once every `requires` trigger has occurred
/// and no `unless` trigger has.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationRule {
    pub check: CheckKind,
    pub description: String,
    pub requires: Vec<Trigger>,
    #[serde(default)]
    pub unless: Vec<Trigger>,
}

/// Declarative description of a system under test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedWorld {
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub violations: Vec<ViolationRule>,
}

impl ScriptedWorld {
    /// Rejects worlds whose reactions retrigger each other without delay.
    ///
    /// Such a cycle schedules new work at the current instant forever, so
    /// `run_until` would never reach its deadline.
    pub fn validate(&self) -> Result<(), SimError> {
        let emitted: Vec<(&'static str, Fingerprint)> = self
            .reactions
            .iter()
            .map(|reaction| {
                let notification = reaction.emits.at(Timestamp::ZERO);
                (
                    notification.to_internal().kind.name(),
                    notification.fingerprint().clone(),
                )
            })
            .collect();

        // Edge i -> j when delivering i's emission schedules j at the same instant.
        let successors: Vec<Vec<usize>> = emitted
            .iter()
            .map(|(kind, fingerprint)| {
                self.reactions
                    .iter()
                    .enumerate()
                    .filter(|(_, next)| {
                        next.after == SimDuration::ZERO && next.trigger.matches(kind, fingerprint)
                    })
                    .map(|(j, _)| j)
                    .collect()
            })
            .collect();

        let mut indegree = vec![0usize; self.reactions.len()];
        for &j in successors.iter().flatten() {
            indegree[j] += 1;
        }
        let mut ready: Vec<usize> = (0..indegree.len()).filter(|&i| indegree[i] == 0).collect();
        let mut removed = 0;
        while let Some(i) = ready.pop() {
            removed += 1;
            for &j in &successors[i] {
                indegree[j] -= 1;
                if indegree[j] == 0 {
                    ready.push(j);
                }
            }
        }

        if removed == self.reactions.len() {
            return Ok(());
        }
        let cyclic: Vec<String> = indegree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree > 0)
            .map(|(i, _)| self.reactions[i].trigger.fingerprint.to_string())
            .collect();
        Err(SimError::InvalidWorld(format!(
            "zero-delay reaction cycle through {}",
            cyclic.join(", ")
        )))
    }
}

// ============================================================================
// Scripted Simulation
// ============================================================================

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Scheduled {
    at: Timestamp,
    seq: u64,
    reaction: usize,
}

/// A [`Simulation`] driven by a [`ScriptedWorld`].
#[derive(Debug)]
pub struct ScriptedSimulation {
    world: Arc<ScriptedWorld>,
    now: Timestamp,
    next_seq: u64,
    queue: BinaryHeap<Reverse<Scheduled>>,
    pending: Vec<Notification>,
    occurred: HashSet<(&'static str, Fingerprint)>,
    hub: NotificationHub,
    injected: Vec<InputEvent>,
    delivered: Vec<Notification>,
}

impl ScriptedSimulation {
    pub fn new(world: Arc<ScriptedWorld>) -> Self {
        Self {
            world,
            now: Timestamp::ZERO,
            next_seq: 0,
            queue: BinaryHeap::new(),
            pending: Vec::new(),
            occurred: HashSet::new(),
            hub: NotificationHub::new(),
            injected: Vec::new(),
            delivered: Vec::new(),
        }
    }

    /// Inputs injected so far, in order.
    pub fn injected(&self) -> &[InputEvent] {
        &self.injected
    }

    /// Notifications delivered so far, in order.
    pub fn delivered(&self) -> &[Notification] {
        &self.delivered
    }

    /// Number of notifications still buffered.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn occur(&mut self, kind: &'static str, fingerprint: &Fingerprint) {
        self.occurred.insert((kind, fingerprint.clone()));

        for (index, reaction) in self.world.reactions.iter().enumerate() {
            if reaction.trigger.matches(kind, fingerprint) {
                self.queue.push(Reverse(Scheduled {
                    at: self.now + reaction.after,
                    seq: self.next_seq,
                    reaction: index,
                }));
                self.next_seq += 1;
            }
        }
    }

    fn deliver(&mut self, notification: Notification) {
        let kind = notification.to_internal().kind.name();
        self.occur(kind, &notification.fingerprint().clone());
        self.delivered.push(notification);
    }

    fn has_occurred(&self, trigger: &Trigger) -> bool {
        self.occurred
            .iter()
            .any(|(kind, fingerprint)| trigger.matches(kind, fingerprint))
    }
}

impl InvariantProbe for ScriptedSimulation {
    fn probe(&self, check: CheckKind) -> Vec<Violation> {
        self.world
            .violations
            .iter()
            .filter(|rule| rule.check == check)
            .filter(|rule| rule.requires.iter().all(|t| self.has_occurred(t)))
            .filter(|rule| !rule.unless.iter().any(|t| self.has_occurred(t)))
            .map(|rule| Violation::new(check, rule.description.clone()))
            .collect()
    }
}

impl Simulation for ScriptedSimulation {
    fn now(&self) -> Timestamp {
        self.now
    }

    fn inject(&mut self, input: &InputEvent) -> Result<(), SimError> {
        tracing::trace!(kind = input.kind.name(), fingerprint = %input.fingerprint, now = %self.now, "inject");
        self.occur(input.kind.name(), &input.fingerprint);
        self.injected.push(input.clone());
        Ok(())
    }

    fn flush(&mut self, stream: NotificationStream) {
        let (flushed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|n| n.stream() == stream);
        self.pending = kept;
        for notification in flushed {
            self.deliver(notification);
        }
    }

    fn notifications(&self) -> &NotificationHub {
        &self.hub
    }

    fn release(&mut self, expected: &InternalEvent) -> bool {
        match self.pending.iter().position(|n| n.matches(expected)) {
            Some(index) => {
                let notification = self.pending.remove(index);
                self.deliver(notification);
                true
            }
            None => false,
        }
    }

    fn run_until(&mut self, deadline: Timestamp) -> Result<(), SimError> {
        while let Some(Reverse(next)) = self.queue.peek() {
            if next.at > deadline {
                break;
            }
            let Some(Reverse(next)) = self.queue.pop() else {
                break;
            };
            self.now = self.now.max(next.at);

            let notification = self.world.reactions[next.reaction].emits.at(self.now);
            match self.hub.dispatch(&notification) {
                Disposition::Forward => self.deliver(notification),
                Disposition::Buffer => self.pending.push(notification),
            }
        }

        self.now = self.now.max(deadline);
        Ok(())
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Bootstraps [`ScriptedSimulation`]s over a shared world.
#[derive(Debug, Clone)]
pub struct ScriptedFactory {
    world: Arc<ScriptedWorld>,
    bootstraps: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub fn new(world: ScriptedWorld) -> Self {
        Self {
            world: Arc::new(world),
            bootstraps: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn world(&self) -> &ScriptedWorld {
        &self.world
    }

    /// Number of simulations bootstrapped so far.
    pub fn bootstraps(&self) -> usize {
        self.bootstraps.load(Ordering::Relaxed)
    }
}

impl SimulationFactory for ScriptedFactory {
    type Sim = ScriptedSimulation;

    fn bootstrap(&self) -> Result<Self::Sim, SimError> {
        self.world.validate()?;
        self.bootstraps.fetch_add(1, Ordering::Relaxed);
        Ok(ScriptedSimulation::new(Arc::clone(&self.world)))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use culprit_types::{InputKind, InternalKind};

    fn custom(class: &str) -> InputEvent {
        InputEvent::with_fingerprint(
            InputKind::Custom {
                class: class.to_string(),
            },
            Fingerprint::from(class),
        )
    }

    fn receipt(fp: &str) -> Emission {
        Emission::MessageReceipt {
            dpid: DpId::new(1),
            controller: ControllerId::new(1),
            fingerprint: Fingerprint::from(fp),
        }
    }

    fn world() -> ScriptedWorld {
        ScriptedWorld {
            reactions: vec![
                Reaction {
                    trigger: Trigger::on("a"),
                    after: SimDuration::from_secs(1),
                    emits: receipt("m1"),
                },
                Reaction {
                    trigger: Trigger::on("m1"),
                    after: SimDuration::from_secs(1),
                    emits: receipt("m2"),
                },
            ],
            violations: vec![ViolationRule {
                check: CheckKind::Loops,
                description: "loop after m2".to_string(),
                requires: vec![Trigger::on("m2")],
                unless: vec![Trigger::on("cure")],
            }],
        }
    }

    #[test]
    fn unobserved_notifications_are_buffered() {
        let mut sim = ScriptedSimulation::new(Arc::new(world()));
        sim.inject(&custom("a")).unwrap();
        sim.run_until(Timestamp::from_secs(5)).unwrap();

        // m1 is buffered, so m2 never fires.
        assert_eq!(sim.pending_len(), 1);
        assert!(sim.delivered().is_empty());
        assert!(sim.probe(CheckKind::Loops).is_empty());
    }

    #[test]
    fn forwarding_listener_drives_causal_chain() {
        let mut sim = ScriptedSimulation::new(Arc::new(world()));
        let _subscription = sim
            .notifications()
            .subscribe(&NotificationStream::ALL, |_| Disposition::Forward);

        sim.inject(&custom("a")).unwrap();
        sim.run_until(Timestamp::from_secs(5)).unwrap();

        assert_eq!(sim.delivered().len(), 2);
        assert_eq!(sim.delivered()[1].time(), Timestamp::from_secs(2));
        assert_eq!(sim.probe(CheckKind::Loops).len(), 1);
        assert_eq!(sim.now(), Timestamp::from_secs(5));
    }

    #[test]
    fn release_delivers_matching_notification() {
        let mut sim = ScriptedSimulation::new(Arc::new(world()));
        sim.inject(&custom("a")).unwrap();
        sim.run_until(Timestamp::from_secs(1)).unwrap();

        let expected = InternalEvent::new(
            InternalKind::ControlMessageReceive {
                dpid: DpId::new(1),
                controller: ControllerId::new(1),
            },
            Fingerprint::from("m1"),
        );
        assert!(sim.release(&expected));
        assert!(!sim.release(&expected));

        sim.run_until(Timestamp::from_secs(2)).unwrap();
        assert_eq!(sim.pending_len(), 1, "m2 arrives after m1 is delivered");
    }

    #[test]
    fn flush_delivers_only_the_requested_stream() {
        let mut sim = ScriptedSimulation::new(Arc::new(world()));
        sim.inject(&custom("a")).unwrap();
        sim.run_until(Timestamp::from_secs(1)).unwrap();

        sim.flush(NotificationStream::StateChange);
        assert_eq!(sim.pending_len(), 1);

        sim.flush(NotificationStream::MessageReceipt);
        assert_eq!(sim.pending_len(), 0);
        assert_eq!(sim.delivered().len(), 1);
    }

    #[test]
    fn unless_trigger_suppresses_violation() {
        let mut sim = ScriptedSimulation::new(Arc::new(world()));
        let _subscription = sim
            .notifications()
            .subscribe(&NotificationStream::ALL, |_| Disposition::Forward);
        sim.inject(&custom("a")).unwrap();
        sim.inject(&custom("cure")).unwrap();
        sim.run_until(Timestamp::from_secs(5)).unwrap();

        assert!(sim.probe(CheckKind::Loops).is_empty());
    }

    #[test]
    fn kind_filter_distinguishes_failure_from_recovery() {
        let failure = InputEvent::new(InputKind::SwitchFailure { dpid: DpId::new(1) });
        let recovery = InputEvent::new(InputKind::SwitchRecovery { dpid: DpId::new(1) });
        let world = ScriptedWorld {
            reactions: Vec::new(),
            violations: vec![ViolationRule {
                check: CheckKind::Blackholes,
                description: "s1 down".to_string(),
                requires: vec![Trigger::on_kind(failure.fingerprint.clone(), "switch_failure")],
                unless: vec![Trigger::on_kind(recovery.fingerprint.clone(), "switch_recovery")],
            }],
        };

        let mut sim = ScriptedSimulation::new(Arc::new(world));
        sim.inject(&failure).unwrap();
        assert_eq!(sim.probe(CheckKind::Blackholes).len(), 1);
        sim.inject(&recovery).unwrap();
        assert!(sim.probe(CheckKind::Blackholes).is_empty());
    }

    #[test]
    fn factory_counts_bootstraps() {
        let factory = ScriptedFactory::new(world());
        let clone = factory.clone();
        let _a = factory.bootstrap().unwrap();
        let _b = clone.bootstrap().unwrap();
        assert_eq!(factory.bootstraps(), 2);
    }

    #[test]
    fn zero_delay_self_trigger_is_rejected() {
        let world = ScriptedWorld {
            reactions: vec![Reaction {
                trigger: Trigger::on("echo"),
                after: SimDuration::ZERO,
                emits: receipt("echo"),
            }],
            violations: Vec::new(),
        };

        let err = world.validate().unwrap_err();
        assert!(matches!(err, SimError::InvalidWorld(_)));
        assert!(ScriptedFactory::new(world).bootstrap().is_err());
    }

    #[test]
    fn zero_delay_cycle_between_reactions_is_rejected() {
        let world = ScriptedWorld {
            reactions: vec![
                Reaction {
                    trigger: Trigger::on("ping"),
                    after: SimDuration::ZERO,
                    emits: receipt("pong"),
                },
                Reaction {
                    trigger: Trigger::on("pong"),
                    after: SimDuration::ZERO,
                    emits: receipt("ping"),
                },
            ],
            violations: Vec::new(),
        };

        let message = world.validate().unwrap_err().to_string();
        assert!(message.contains("ping"));
        assert!(message.contains("pong"));
    }

    #[test]
    fn delayed_self_trigger_is_accepted() {
        let world = ScriptedWorld {
            reactions: vec![Reaction {
                trigger: Trigger::on("tick"),
                after: SimDuration::from_secs(1),
                emits: receipt("tick"),
            }],
            violations: Vec::new(),
        };
        world.validate().unwrap();

        let mut sim = ScriptedSimulation::new(Arc::new(world));
        let _subscription = sim
            .notifications()
            .subscribe(&NotificationStream::ALL, |_| Disposition::Forward);
        sim.inject(&custom("tick")).unwrap();
        sim.run_until(Timestamp::from_secs(3)).unwrap();

        assert_eq!(sim.delivered().len(), 3);
    }

    #[test]
    fn world_parses_from_json() {
        let json = r#"{
            "reactions": [
                {"trigger": {"fingerprint": "a"}, "after": 1000000000,
                 "emits": {"message_receipt": {"dpid": 1, "controller": 1, "fingerprint": "m1"}}}
            ],
            "violations": [
                {"check": "loops", "description": "loop", "requires": [{"fingerprint": "m1"}]}
            ]
        }"#;
        let world: ScriptedWorld = serde_json::from_str(json).unwrap();
        assert_eq!(world.reactions.len(), 1);
        assert_eq!(world.reactions[0].after, SimDuration::from_secs(1));
        assert!(world.violations[0].unless.is_empty());
    }
}
