//! Trace bundles: everything needed to minimize a recorded failure.
//!
//! A bundle holds the recorded events, the name of the invariant check that
//! failed and, optionally, a scripted world description to replay against.
//! Bundles are stored as JSON (`.json`) or compact postcard binary (`.bin`,
//! `.trace`), chosen by file extension.

use std::fmt::Write as _;
use std::path::Path;

use culprit_sim::ScriptedWorld;
use culprit_types::Event;
use serde::{Deserialize, Serialize};

use crate::dag::{DagError, EventDag, PeekConfig};

/// Current on-disk bundle format.
pub const FORMAT_VERSION: u32 = 1;

/// Serialization format of a bundle file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    Json,
    Postcard,
}

impl TraceFormat {
    /// Picks a format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self, TraceError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(TraceFormat::Json),
            Some("bin" | "trace") => Ok(TraceFormat::Postcard),
            other => Err(TraceError::UnsupportedExtension {
                extension: other.unwrap_or_default().to_string(),
            }),
        }
    }
}

/// A recorded trace ready for minimization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceBundle {
    pub format_version: u32,
    /// Invariant check that the trace violates.
    pub invariant: String,
    pub events: Vec<Event>,
    /// Scripted system under test, if the trace carries one.
    #[serde(default)]
    pub world: Option<ScriptedWorld>,
    /// Unix seconds.
    pub created_at: u64,
    /// Digest of the bundle this one was minimized from.
    #[serde(default)]
    pub source_digest: Option<String>,
}

impl TraceBundle {
    pub fn new(invariant: impl Into<String>, events: Vec<Event>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            invariant: invariant.into(),
            events,
            world: None,
            created_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            source_digest: None,
        }
    }

    pub fn with_world(mut self, world: ScriptedWorld) -> Self {
        self.world = Some(world);
        self
    }

    /// Builds the minimized bundle for `events`, linked back to this one.
    pub fn derive(&self, events: Vec<Event>) -> Result<Self, TraceError> {
        let mut derived = Self::new(self.invariant.clone(), events);
        derived.world.clone_from(&self.world);
        derived.source_digest = Some(self.digest()?);
        Ok(derived)
    }

    /// Builds the root DAG for this bundle.
    pub fn to_dag(&self, peek: PeekConfig) -> Result<EventDag, DagError> {
        EventDag::with_peek_config(self.events.clone(), peek)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TraceError> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TraceError> {
        let bundle: Self = postcard::from_bytes(bytes)?;
        bundle.check_version()
    }

    /// blake3 digest of the postcard encoding, hex-encoded.
    pub fn digest(&self) -> Result<String, TraceError> {
        Ok(blake3::hash(&self.to_bytes()?).to_hex().to_string())
    }

    /// Saves the bundle in the format implied by the file extension.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), TraceError> {
        let path = path.as_ref();
        let bytes = match TraceFormat::from_path(path)? {
            TraceFormat::Json => serde_json::to_vec_pretty(self)?,
            TraceFormat::Postcard => self.to_bytes()?,
        };
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Loads a bundle in the format implied by the file extension.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, TraceError> {
        let path = path.as_ref();
        let format = TraceFormat::from_path(path)?;
        let bytes = std::fs::read(path)?;
        match format {
            TraceFormat::Json => serde_json::from_slice::<Self>(&bytes)?.check_version(),
            TraceFormat::Postcard => Self::from_bytes(&bytes),
        }
    }

    /// Returns a human-readable summary of this bundle.
    pub fn summary(&self) -> String {
        let inputs = self.events.iter().filter(|e| e.is_input()).count();
        let mut summary = format!(
            "Invariant: {}\nEvents: {} ({} input, {} internal)",
            self.invariant,
            self.events.len(),
            inputs,
            self.events.len() - inputs,
        );
        if let (Some(first), Some(last)) = (self.events.first(), self.events.last()) {
            let _ = write!(summary, "\nSpan: {} .. {}", first.time, last.time);
        }
        if let Some(world) = &self.world {
            let _ = write!(
                summary,
                "\nWorld: {} reactions, {} violation rules",
                world.reactions.len(),
                world.violations.len()
            );
        }
        if let Some(digest) = &self.source_digest {
            let _ = write!(summary, "\nMinimized from: {digest}");
        }
        summary
    }

    fn check_version(self) -> Result<Self, TraceError> {
        if self.format_version != FORMAT_VERSION {
            return Err(TraceError::UnsupportedVersion {
                found: self.format_version,
                expected: FORMAT_VERSION,
            });
        }
        Ok(self)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors reading or writing trace bundles.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),

    #[error("unsupported trace file extension '{extension}' (expected json, bin or trace)")]
    UnsupportedExtension { extension: String },

    #[error("unsupported bundle format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

// ============================================================================
// Tests
// ============================================================================
