//! Errors raised by simulation collaborators.

use culprit_types::Timestamp;

/// Errors that can occur while driving a simulation.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("failed to bootstrap simulation: {0}")]
    Bootstrap(String),

    #[error("failed to inject {kind} at {time}: {reason}")]
    Injection {
        kind: &'static str,
        time: Timestamp,
        reason: String,
    },

    #[error("invalid world: {0}")]
    InvalidWorld(String),

    #[error("simulation stopped: {0}")]
    Stopped(String),
}
