//! # culprit-types: Core types for `Culprit`
//!
//! This crate contains the event model shared by every Culprit crate:
//! - Identifiers ([`Label`], [`DpId`], [`ControllerId`], [`HostId`], [`LinkId`])
//! - Replay-clock time ([`Timestamp`], [`SimDuration`])
//! - Content fingerprints ([`Fingerprint`])
//! - Trace events ([`Event`], [`InputEvent`], [`InternalEvent`])
//! - The dependency-policy table ([`DependencyPolicy`], [`PairRole`])

use std::{
    fmt::{self, Display},
    ops::Add,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

mod event;

pub use event::{
    DependencyPolicy, Event, EventKind, InputEvent, InputKind, InternalEvent, InternalKind,
    PairRole,
};

// ============================================================================
// Identifiers - All Copy (cheap 8-byte values)
// ============================================================================

/// Process-unique identifier of a trace event.
///
/// Labels are assigned by the trace parser and stay stable across every view
/// derived from the same trace. Events inferred during replay receive fresh
/// labels from a [`LabelGenerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(u64);

impl Label {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

impl From<u64> for Label {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Label> for u64 {
    fn from(label: Label) -> Self {
        label.0
    }
}

/// Datapath identifier of a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DpId(u64);

impl DpId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl Display for DpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl From<u64> for DpId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Identifier of a controller process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControllerId(u64);

impl ControllerId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

impl From<u64> for ControllerId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Identifier of an end host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(u64);

impl HostId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

impl From<u64> for HostId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A directed link between two switch ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkId {
    pub start_dpid: DpId,
    pub start_port: u16,
    pub end_dpid: DpId,
    pub end_port: u16,
}

impl Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}-{}.{}",
            self.start_dpid, self.start_port, self.end_dpid, self.end_port
        )
    }
}

// ============================================================================
// Label Generator
// ============================================================================

/// Hands out fresh labels for events inferred during replay.
///
/// Shared by every view of one minimization run, so it is safe to call from
/// concurrent trials.
#[derive(Debug)]
pub struct LabelGenerator {
    next: AtomicU64,
}

impl LabelGenerator {
    /// Creates a generator whose first label is `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Creates a generator that never collides with `labels`.
    pub fn after<'a>(labels: impl IntoIterator<Item = &'a Label>) -> Self {
        let first = labels
            .into_iter()
            .map(|label| label.0.saturating_add(1))
            .max()
            .unwrap_or(0);
        Self::starting_at(first)
    }

    /// Returns the next unused label.
    pub fn next_label(&self) -> Label {
        Label(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the label the next call would hand out.
    pub fn peek_next(&self) -> Label {
        Label(self.next.load(Ordering::Relaxed))
    }
}

// ============================================================================
// Temporal Types
// ============================================================================

/// Point on the replay clock, in nanoseconds since the start of the recording.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Time elapsed since `earlier`, or zero if `earlier` is in the future.
    pub fn saturating_since(self, earlier: Timestamp) -> SimDuration {
        SimDuration(self.0.saturating_sub(earlier.0))
    }
}

impl Add<SimDuration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: SimDuration) -> Self::Output {
        Timestamp(self.0.saturating_add(rhs.0))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

/// Span of replay-clock time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct SimDuration(u64);

impl SimDuration {
    pub const ZERO: SimDuration = SimDuration(0);

    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }
}

impl Display for SimDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.as_millis())
    }
}

// ============================================================================
// Fingerprints
// ============================================================================

/// Content-derived identity of an event, used to match events across
/// independent replays.
///
/// Fingerprints are canonical strings such as `switch:s3` or
/// `link:s1.2-s4.1`. Failure and recovery events fingerprint their affected
/// entity, so a failure and its recovery share a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(canonical: impl Into<String>) -> Self {
        Self(canonical.into())
    }

    /// Builds a fingerprint from a class name and a content field.
    pub fn of(class: &str, content: impl Display) -> Self {
        Self(format!("{class}:{content}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn label_generator_skips_existing_labels() {
        let labels = [Label::new(3), Label::new(9), Label::new(1)];
        let generator = LabelGenerator::after(&labels);

        assert_eq!(generator.next_label(), Label::new(10));
        assert_eq!(generator.next_label(), Label::new(11));
        assert_eq!(generator.peek_next(), Label::new(12));
    }

    #[test]
    fn label_generator_empty_trace_starts_at_zero() {
        let generator = LabelGenerator::after(std::iter::empty());
        assert_eq!(generator.next_label(), Label::new(0));
    }

    #[test]
    fn timestamp_arithmetic_saturates() {
        let t = Timestamp::from_nanos(u64::MAX - 1);
        assert_eq!(
            (t + SimDuration::from_secs(3)).as_nanos(),
            u64::MAX,
            "addition should saturate"
        );
        assert_eq!(
            Timestamp::from_secs(1).saturating_since(Timestamp::from_secs(2)),
            SimDuration::ZERO
        );
    }

    #[test]
    fn timestamp_units() {
        assert_eq!(Timestamp::from_secs(2), Timestamp::from_millis(2_000));
        assert_eq!(
            Timestamp::from_secs(1) + SimDuration::from_millis(500),
            Timestamp::from_millis(1_500)
        );
        assert_eq!(Timestamp::from_millis(1_500).to_string(), "1.500s");
    }

    #[test]
    fn fingerprint_of_formats_class_and_content() {
        assert_eq!(Fingerprint::of("switch", DpId::new(3)).as_str(), "switch:s3");
        assert_eq!(Fingerprint::from("class:1"), Fingerprint::of("class", 1));
    }

    #[test]
    fn label_serializes_transparently() {
        let json = serde_json::to_string(&Label::new(42)).unwrap();
        assert_eq!(json, "42");
    }

    proptest! {
        #[test]
        fn timestamp_add_is_monotone_and_saturating(start in any::<u64>(), span in any::<u64>()) {
            let t = Timestamp::from_nanos(start);
            let later = t + SimDuration::from_nanos(span);

            prop_assert!(later >= t);
            prop_assert_eq!(later.as_nanos(), start.saturating_add(span));
        }

        #[test]
        fn saturating_since_undoes_addition(
            start in 0u64..u64::MAX / 2,
            span in 0u64..u64::MAX / 2,
        ) {
            let t = Timestamp::from_nanos(start);
            let d = SimDuration::from_nanos(span);

            prop_assert_eq!((t + d).saturating_since(t), d);
            prop_assert_eq!(t.saturating_since(t + d), SimDuration::ZERO);
        }

        #[test]
        fn generated_labels_never_collide(
            existing in prop::collection::vec(0u64..1_000, 0..20),
            draws in 1usize..10,
        ) {
            let labels: Vec<Label> = existing.iter().copied().map(Label::new).collect();
            let generator = LabelGenerator::after(&labels);

            for _ in 0..draws {
                let fresh = generator.next_label();
                prop_assert!(!labels.contains(&fresh));
            }
        }
    }
}
