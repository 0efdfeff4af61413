//! Configuration management for culprit
//!
//! Configuration is merged from these sources, highest precedence first:
//! 1. CLI arguments
//! 2. Environment variables (`CULPRIT_*`, `__` between section and key)
//! 3. culprit.local.toml (gitignored, local overrides)
//! 4. culprit.toml (project config)
//! 5. ~/.config/culprit/config.toml (user defaults)
//! 6. Built-in defaults

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main culprit configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CulpritConfig {
    pub mcs: McsSection,
    pub peek: PeekSection,
    pub replay: ReplaySection,
    pub output: OutputSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct McsSection {
    /// Invariant check used when the trace bundle does not name one.
    pub invariant: String,
    pub driver: DriverKind,
    pub initial_granularity: usize,
    pub max_replays: u64,
    pub skip_seed_check: bool,
}

impl Default for McsSection {
    fn default() -> Self {
        Self {
            invariant: "check_everything".to_string(),
            driver: DriverKind::Basic,
            initial_granularity: 2,
            max_replays: 10_000,
            skip_seed_check: false,
        }
    }
}

/// Which minimization driver to run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DriverKind {
    /// Sequential delta debugging.
    Basic,
    /// Parallel trials with memoized verdicts.
    Efficient,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeekSection {
    /// How long past the next input to wait for expected internal events.
    pub window_ms: u64,
}

impl Default for PeekSection {
    fn default() -> Self {
        Self { window_ms: 3_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaySection {
    pub internal_event_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Simulated time the harness runs past the last event before checking.
    pub settle_ms: u64,
}

impl Default for ReplaySection {
    fn default() -> Self {
        Self {
            internal_event_timeout_ms: 500,
            poll_interval_ms: 50,
            settle_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// Where minimized bundles go. Next to the input bundle when unset.
    pub directory: Option<PathBuf>,
}

impl CulpritConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from a specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Parses a single TOML file, without layering.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the drivers cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mcs.initial_granularity < 2 {
            return Err(ConfigError::Validation(format!(
                "mcs.initial_granularity must be at least 2, got {}",
                self.mcs.initial_granularity
            )));
        }
        if self.mcs.max_replays == 0 {
            return Err(ConfigError::Validation(
                "mcs.max_replays must be positive".to_string(),
            ));
        }
        if self.replay.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "replay.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.mcs.invariant.is_empty() {
            return Err(ConfigError::Validation(
                "mcs.invariant must name a check".to_string(),
            ));
        }
        Ok(())
    }

    /// Renders the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        if let Some(directory) = &mut self.output.directory
            && directory.is_relative()
        {
            *directory = base_dir.as_ref().join(&*directory);
        }
    }
}
