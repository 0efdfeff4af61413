//! # culprit: Minimal causal sequence finder
//!
//! Given a recorded trace of a distributed control-plane execution that ends
//! in an invariant violation, `culprit` computes the **minimal causal
//! sequence** (MCS): the smallest subset of input events that, replayed on
//! its own, still reproduces the violation.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       McsFinder / EfficientMcsFinder          │
//! │       split_inputs(k) ─► ignore_portion(chunk) ─► harness     │
//! │                               │                               │
//! │  ┌────────────────────────────▼─────────────────────────────┐ │
//! │  │ EventDag (root or view)                                  │ │
//! │  │   remove_events ─► forward closure over dependents       │ │
//! │  │   peek ─► Replayer ─► Simulation ─► recorded internals   │ │
//! │  └────────────────────────────┬─────────────────────────────┘ │
//! │                               │ shared by every view          │
//! │  ┌────────────────────────────▼─────────────────────────────┐ │
//! │  │ label index   PrefixCache (RwLock)   LabelGenerator      │ │
//! │  └──────────────────────────────────────────────────────────┘ │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use culprit::{EventDag, McsConfig, McsFinder, SimulationHarness};
//! use culprit_sim::{InvariantOracle, ScriptedFactory};
//!
//! let factory = ScriptedFactory::new(world);
//! let check = InvariantOracle::standard().get("check_everything")?;
//! let harness = SimulationHarness::new(factory.clone(), check);
//!
//! let dag = EventDag::new(events)?;
//! let outcome = McsFinder::new(dag, &factory, &harness, McsConfig::default()).find()?;
//! println!("MCS: {:?}", outcome.labels());
//! ```

pub mod dag;
mod dependency;
pub mod harness;
pub mod mcs;
pub mod prefix_cache;
pub mod replay;
pub mod trace;

pub use dag::{DagError, EventDag, PeekConfig};
pub use harness::{ReplayHarness, SimulationHarness};
pub use mcs::{EfficientMcsFinder, McsConfig, McsError, McsFinder, McsOutcome, McsStats};
pub use prefix_cache::{CacheStats, PrefixCache, PrefixMatch, SharedPrefixCache};
pub use replay::{ReplayConfig, ReplayError, ReplayStats, Replayer};
pub use trace::{TraceBundle, TraceError, TraceFormat};
