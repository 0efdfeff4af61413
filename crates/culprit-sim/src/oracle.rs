//! Invariant oracle: named checks over a simulation's invariant detectors.
//!
//! The minimization driver only needs one question answered after each
//! replay: does the violation still reproduce? A check answers it with the
//! list of violations it found (empty means no violation). Some compositions
//! end the whole run instead, by returning [`OracleError::Halted`] once
//! connectivity is established.
//!
//! # Available Checks
//!
//! | Name | Behaviour |
//! |---|---|
//! | `check_everything` | union of loops, blackholes and connectivity, deduplicated |
//! | `check_for_loops_or_connectivity` | loops, else halt if connected |
//! | `check_for_loops_blackholes_or_connectivity` | loops, blackholes, else halt if connected |
//! | `check_for_loops_blackholes` | loops, else blackholes |
//! | `check_loops`, `check_blackholes`, `check_connectivity`, `check_liveness`, `check_correspondence` | single detector |

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::InvariantProbe;

// ============================================================================
// Violations
// ============================================================================

/// Invariant detectors a simulation exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Loops,
    Blackholes,
    Connectivity,
    Liveness,
    Correspondence,
}

impl CheckKind {
    pub const ALL: [CheckKind; 5] = [
        CheckKind::Loops,
        CheckKind::Blackholes,
        CheckKind::Connectivity,
        CheckKind::Liveness,
        CheckKind::Correspondence,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CheckKind::Loops => "loops",
            CheckKind::Blackholes => "blackholes",
            CheckKind::Connectivity => "connectivity",
            CheckKind::Liveness => "liveness",
            CheckKind::Correspondence => "correspondence",
        }
    }
}

/// One violation reported by a detector.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Violation {
    pub check: CheckKind,
    pub description: String,
}

impl Violation {
    pub fn new(check: CheckKind, description: impl Into<String>) -> Self {
        Self {
            check,
            description: description.into(),
        }
    }
}

impl Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.check.name(), self.description)
    }
}

// ============================================================================
// Named Checks
// ============================================================================

/// Signature of an invariant check.
pub type CheckFn =
    Arc<dyn Fn(&dyn InvariantProbe) -> Result<Vec<Violation>, OracleError> + Send + Sync>;

/// A check resolved from the oracle by name.
#[derive(Clone)]
pub struct NamedCheck {
    name: String,
    check: CheckFn,
}

impl NamedCheck {
    pub fn new(name: impl Into<String>, check: CheckFn) -> Self {
        Self {
            name: name.into(),
            check,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the check against `probe`.
    pub fn evaluate(&self, probe: &dyn InvariantProbe) -> Result<Vec<Violation>, OracleError> {
        (self.check)(probe)
    }
}

impl fmt::Debug for NamedCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedCheck").field("name", &self.name).finish()
    }
}

/// Prefix of the qualified single-detector names found in older recordings,
/// e.g. `InvariantChecker.check_loops`.
const QUALIFIED_PREFIX: &str = "InvariantChecker.";

fn single_detector(
    kind: CheckKind,
) -> impl Fn(&dyn InvariantProbe) -> Result<Vec<Violation>, OracleError> + Send + Sync + 'static {
    move |probe| Ok(probe.probe(kind))
}

/// Registry mapping check names to check functions.
#[derive(Clone, Default)]
pub struct InvariantOracle {
    checks: BTreeMap<String, CheckFn>,
}

impl InvariantOracle {
    /// Creates an oracle with no checks registered.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates an oracle with every built-in check registered.
    pub fn standard() -> Self {
        let mut oracle = Self::empty();
        oracle.register("check_everything", check_everything);
        oracle.register(
            "check_for_loops_or_connectivity",
            check_for_loops_or_connectivity,
        );
        oracle.register(
            "check_for_loops_blackholes_or_connectivity",
            check_for_loops_blackholes_or_connectivity,
        );
        oracle.register("check_for_loops_blackholes", check_for_loops_blackholes);
        for kind in CheckKind::ALL {
            oracle.register(format!("check_{}", kind.name()), single_detector(kind));
            oracle.register(
                format!("{QUALIFIED_PREFIX}check_{}", kind.name()),
                single_detector(kind),
            );
        }
        for kind in [CheckKind::Loops, CheckKind::Connectivity] {
            oracle.register(
                format!("{QUALIFIED_PREFIX}python_check_{}", kind.name()),
                single_detector(kind),
            );
        }
        oracle
    }

    /// Registers (or replaces) a check under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, check: F)
    where
        F: Fn(&dyn InvariantProbe) -> Result<Vec<Violation>, OracleError> + Send + Sync + 'static,
    {
        self.checks.insert(name.into(), Arc::new(check));
    }

    /// Looks up a check by name.
    pub fn get(&self, name: &str) -> Result<NamedCheck, OracleError> {
        self.checks
            .get(name)
            .map(|check| NamedCheck::new(name, Arc::clone(check)))
            .ok_or_else(|| OracleError::UnknownCheck {
                name: name.to_string(),
                known: self.names().collect::<Vec<_>>().join(", "),
            })
    }

    /// Registered check names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.checks.keys().map(String::as_str)
    }
}

impl fmt::Debug for InvariantOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.checks.keys()).finish()
    }
}

// ============================================================================
// Compositions
// ============================================================================

/// Union of the loop, blackhole and connectivity detectors, deduplicated.
pub fn check_everything(probe: &dyn InvariantProbe) -> Result<Vec<Violation>, OracleError> {
    let mut violations = BTreeSet::new();
    for kind in [CheckKind::Loops, CheckKind::Blackholes, CheckKind::Connectivity] {
        violations.extend(probe.probe(kind));
    }
    Ok(violations.into_iter().collect())
}

/// Halts the run once connectivity is established; otherwise reports nothing.
pub fn bail_on_connectivity(probe: &dyn InvariantProbe) -> Result<Vec<Violation>, OracleError> {
    if probe.probe(CheckKind::Connectivity).is_empty() {
        tracing::info!("connectivity established, halting");
        return Err(OracleError::Halted {
            reason: "connectivity established".to_string(),
        });
    }
    Ok(Vec::new())
}

pub fn check_for_loops_or_connectivity(
    probe: &dyn InvariantProbe,
) -> Result<Vec<Violation>, OracleError> {
    let loops = probe.probe(CheckKind::Loops);
    if !loops.is_empty() {
        return Ok(loops);
    }
    bail_on_connectivity(probe)
}

pub fn check_for_loops_blackholes_or_connectivity(
    probe: &dyn InvariantProbe,
) -> Result<Vec<Violation>, OracleError> {
    let found = check_for_loops_blackholes(probe)?;
    if !found.is_empty() {
        return Ok(found);
    }
    bail_on_connectivity(probe)
}

/// Loops first; blackholes only when there are no loops.
pub fn check_for_loops_blackholes(
    probe: &dyn InvariantProbe,
) -> Result<Vec<Violation>, OracleError> {
    for kind in [CheckKind::Loops, CheckKind::Blackholes] {
        let found = probe.probe(kind);
        if !found.is_empty() {
            return Ok(found);
        }
    }
    Ok(Vec::new())
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by the invariant oracle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OracleError {
    #[error("unknown invariant check '{name}' (known: {known})")]
    UnknownCheck { name: String, known: String },

    /// The check decided the run should stop; not a bug report.
    #[error("run halted by invariant check: {reason}")]
    Halted { reason: String },
}

// ============================================================================
// Tests
// ============================================================================
