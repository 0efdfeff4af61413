//! # culprit-sim: Simulation collaborator interface for `Culprit`
//!
//! Trace minimization never talks to a network directly. It drives a
//! [`Simulation`] through a small interface: inject inputs, advance the
//! replay clock, flush buffered notifications, and observe message receipts
//! and state changes through scoped subscriptions on a [`NotificationHub`].
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   SimulationFactory::bootstrap               │
//! │                              │                               │
//! │  ┌───────────────────────────▼────────────────────────────┐  │
//! │  │                      Simulation                        │  │
//! │  │  inject()   run_until()   flush()   release()          │  │
//! │  │                                                        │  │
//! │  │  NotificationHub ──► Subscription (dropped = removed)  │  │
//! │  └───────────────────────────┬────────────────────────────┘  │
//! │                              │ InvariantProbe                │
//! │  ┌───────────────────────────▼────────────────────────────┐  │
//! │  │ InvariantOracle: check_everything, check_loops, ...    │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`scripted::ScriptedSimulation`] is a deterministic implementation driven
//! by a declarative [`scripted::ScriptedWorld`]. Production engines implement
//! the same traits.

mod error;
pub mod notify;
pub mod oracle;
pub mod scripted;

use culprit_types::{InputEvent, InternalEvent, Timestamp};

pub use error::SimError;
pub use notify::{Disposition, Notification, NotificationHub, NotificationStream, Subscription};
pub use oracle::{CheckFn, CheckKind, InvariantOracle, NamedCheck, OracleError, Violation};
pub use scripted::{
    Emission, Reaction, ScriptedFactory, ScriptedSimulation, ScriptedWorld, Trigger,
    ViolationRule,
};

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Read-only access to the invariant detectors of a running simulation.
pub trait InvariantProbe {
    /// Runs one detector and returns the violations it reports.
    fn probe(&self, check: CheckKind) -> Vec<Violation>;
}

/// A deterministic, single-threaded simulation of the system under test.
pub trait Simulation: InvariantProbe {
    /// Current replay-clock time.
    fn now(&self) -> Timestamp;

    /// Injects an input event at the current time.
    fn inject(&mut self, input: &InputEvent) -> Result<(), SimError>;

    /// Delivers every notification currently buffered on `stream`.
    fn flush(&mut self, stream: NotificationStream);

    /// Hub for scoped message-receipt and state-change listeners.
    fn notifications(&self) -> &NotificationHub;

    /// Delivers the buffered notification matching `expected`, if present.
    fn release(&mut self, expected: &InternalEvent) -> bool;

    /// Advances the replay clock to `deadline`, processing everything
    /// scheduled up to and including it.
    fn run_until(&mut self, deadline: Timestamp) -> Result<(), SimError>;
}

/// Creates fresh, isolated simulations.
///
/// Each replay attempt bootstraps its own instance so no state leaks between
/// attempts.
pub trait SimulationFactory {
    type Sim: Simulation;

    fn bootstrap(&self) -> Result<Self::Sim, SimError>;
}
