//! Trace events and the per-kind dependency policy.
//!
//! A trace is an ordered list of [`Event`]s. Input events were injected from
//! outside the system under test (failures, recoveries, traffic, policy
//! changes); internal events were observed while it ran (controller message
//! receipts, state changes).

use serde::{Deserialize, Serialize};

use crate::{ControllerId, DpId, Fingerprint, HostId, Label, LinkId, SimDuration, Timestamp};

// ============================================================================
// Events
// ============================================================================

/// One entry of a recorded trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique label, stable across views of the same trace.
    pub label: Label,
    /// Time of occurrence in the original recording.
    pub time: Timestamp,
    /// Labels of events that must be removed whenever this one is.
    #[serde(default)]
    pub dependent_labels: Vec<Label>,
    /// Input or internal payload.
    pub kind: EventKind,
}

/// Whether an event was injected or observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Input(InputEvent),
    Internal(InternalEvent),
}

impl Event {
    /// Creates an input event with no dependents.
    pub fn input(label: Label, time: Timestamp, input: InputEvent) -> Self {
        Self {
            label,
            time,
            dependent_labels: Vec::new(),
            kind: EventKind::Input(input),
        }
    }

    /// Creates an internal event with no dependents.
    pub fn internal(label: Label, time: Timestamp, internal: InternalEvent) -> Self {
        Self {
            label,
            time,
            dependent_labels: Vec::new(),
            kind: EventKind::Internal(internal),
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self.kind, EventKind::Input(_))
    }

    pub fn as_input(&self) -> Option<&InputEvent> {
        match &self.kind {
            EventKind::Input(input) => Some(input),
            EventKind::Internal(_) => None,
        }
    }

    pub fn as_internal(&self) -> Option<&InternalEvent> {
        match &self.kind {
            EventKind::Internal(internal) => Some(internal),
            EventKind::Input(_) => None,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        match &self.kind {
            EventKind::Input(input) => &input.fingerprint,
            EventKind::Internal(internal) => &internal.fingerprint,
        }
    }

    /// Dependency policy of this event; internal events are always `NoOp`.
    pub fn dependency_policy(&self) -> DependencyPolicy {
        self.as_input()
            .map_or(DependencyPolicy::NoOp, |input| input.kind.dependency_policy())
    }

    /// Short kind name, e.g. `switch_failure` or `control_message_receive`.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            EventKind::Input(input) => input.kind.name(),
            EventKind::Internal(internal) => internal.kind.name(),
        }
    }

    /// Records `label` as a dependent, keeping the list duplicate-free.
    pub fn add_dependent(&mut self, label: Label) {
        if !self.dependent_labels.contains(&label) {
            self.dependent_labels.push(label);
        }
    }
}

// ============================================================================
// Input Events
// ============================================================================

/// An externally injected event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    pub kind: InputKind,
    pub fingerprint: Fingerprint,
}

impl InputEvent {
    /// Creates an input event whose fingerprint is derived from its content.
    pub fn new(kind: InputKind) -> Self {
        let fingerprint = kind.derive_fingerprint();
        Self { kind, fingerprint }
    }

    /// Creates an input event with a fingerprint supplied by the trace parser.
    pub fn with_fingerprint(kind: InputKind, fingerprint: Fingerprint) -> Self {
        Self { kind, fingerprint }
    }
}

/// Every input type the trace format knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    SwitchFailure {
        dpid: DpId,
    },
    SwitchRecovery {
        dpid: DpId,
    },
    LinkFailure {
        link: LinkId,
    },
    LinkRecovery {
        link: LinkId,
    },
    ControllerFailure {
        controller: ControllerId,
    },
    ControllerRecovery {
        controller: ControllerId,
    },
    ControlChannelBlock {
        dpid: DpId,
        controller: ControllerId,
    },
    ControlChannelUnblock {
        dpid: DpId,
        controller: ControllerId,
    },
    TrafficInjection {
        host: HostId,
        packet: String,
    },
    PolicyChange {
        request: String,
    },
    WaitTime {
        duration: SimDuration,
    },
    CheckInvariants {
        check: String,
    },
    DataplaneDrop {
        packet: String,
    },
    DataplanePermit {
        packet: String,
    },
    HostMigration {
        host: HostId,
        old_dpid: DpId,
        old_port: u16,
        new_dpid: DpId,
        new_port: u16,
    },
    /// Input defined outside this crate; fingerprint is usually supplied.
    Custom {
        class: String,
    },
}

impl InputKind {
    /// Looks up the dependency policy for this kind.
    ///
    /// | Kind | Policy |
    /// |---|---|
    /// | switch/link/controller failure, control-channel block | `AtomicPair(Failure)` |
    /// | the matching recoveries and unblock | `AtomicPair(Recovery)` |
    /// | dataplane drop/permit, host migration | `Unsupported` |
    /// | everything else | `NoOp` |
    pub fn dependency_policy(&self) -> DependencyPolicy {
        match self {
            InputKind::SwitchFailure { .. }
            | InputKind::LinkFailure { .. }
            | InputKind::ControllerFailure { .. }
            | InputKind::ControlChannelBlock { .. } => DependencyPolicy::AtomicPair(PairRole::Failure),
            InputKind::SwitchRecovery { .. }
            | InputKind::LinkRecovery { .. }
            | InputKind::ControllerRecovery { .. }
            | InputKind::ControlChannelUnblock { .. } => {
                DependencyPolicy::AtomicPair(PairRole::Recovery)
            }
            InputKind::DataplaneDrop { .. }
            | InputKind::DataplanePermit { .. }
            | InputKind::HostMigration { .. } => DependencyPolicy::Unsupported,
            InputKind::TrafficInjection { .. }
            | InputKind::PolicyChange { .. }
            | InputKind::WaitTime { .. }
            | InputKind::CheckInvariants { .. }
            | InputKind::Custom { .. } => DependencyPolicy::NoOp,
        }
    }

    pub fn is_recovery(&self) -> bool {
        self.dependency_policy() == DependencyPolicy::AtomicPair(PairRole::Recovery)
    }

    pub fn is_failure(&self) -> bool {
        self.dependency_policy() == DependencyPolicy::AtomicPair(PairRole::Failure)
    }

    pub fn is_unsupported(&self) -> bool {
        self.dependency_policy() == DependencyPolicy::Unsupported
    }

    pub fn name(&self) -> &'static str {
        match self {
            InputKind::SwitchFailure { .. } => "switch_failure",
            InputKind::SwitchRecovery { .. } => "switch_recovery",
            InputKind::LinkFailure { .. } => "link_failure",
            InputKind::LinkRecovery { .. } => "link_recovery",
            InputKind::ControllerFailure { .. } => "controller_failure",
            InputKind::ControllerRecovery { .. } => "controller_recovery",
            InputKind::ControlChannelBlock { .. } => "control_channel_block",
            InputKind::ControlChannelUnblock { .. } => "control_channel_unblock",
            InputKind::TrafficInjection { .. } => "traffic_injection",
            InputKind::PolicyChange { .. } => "policy_change",
            InputKind::WaitTime { .. } => "wait_time",
            InputKind::CheckInvariants { .. } => "check_invariants",
            InputKind::DataplaneDrop { .. } => "dataplane_drop",
            InputKind::DataplanePermit { .. } => "dataplane_permit",
            InputKind::HostMigration { .. } => "host_migration",
            InputKind::Custom { .. } => "custom",
        }
    }

    /// Fingerprint over the event's subject.
    ///
    /// Failure/recovery pairs fingerprint the affected entity only, so the two
    /// halves of a pair always match.
    pub fn derive_fingerprint(&self) -> Fingerprint {
        match self {
            InputKind::SwitchFailure { dpid } | InputKind::SwitchRecovery { dpid } => {
                Fingerprint::of("switch", dpid)
            }
            InputKind::LinkFailure { link } | InputKind::LinkRecovery { link } => {
                Fingerprint::of("link", link)
            }
            InputKind::ControllerFailure { controller }
            | InputKind::ControllerRecovery { controller } => {
                Fingerprint::of("controller", controller)
            }
            InputKind::ControlChannelBlock { dpid, controller }
            | InputKind::ControlChannelUnblock { dpid, controller } => {
                Fingerprint::of("channel", format!("{dpid}-{controller}"))
            }
            InputKind::TrafficInjection { host, packet } => {
                Fingerprint::of("traffic", format!("{host}/{packet}"))
            }
            InputKind::PolicyChange { request } => Fingerprint::of("policy", request),
            InputKind::WaitTime { duration } => Fingerprint::of("wait", duration.as_nanos()),
            InputKind::CheckInvariants { check } => Fingerprint::of("check", check),
            InputKind::DataplaneDrop { packet } | InputKind::DataplanePermit { packet } => {
                Fingerprint::of("dataplane", packet)
            }
            InputKind::HostMigration {
                host,
                old_dpid,
                old_port,
                new_dpid,
                new_port,
            } => Fingerprint::of(
                "migration",
                format!("{host}/{old_dpid}.{old_port}>{new_dpid}.{new_port}"),
            ),
            InputKind::Custom { class } => Fingerprint::of("custom", class),
        }
    }
}

// ============================================================================
// Internal Events
// ============================================================================

/// An event observed inside the system under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalEvent {
    pub kind: InternalKind,
    pub fingerprint: Fingerprint,
}

impl InternalEvent {
    pub fn new(kind: InternalKind, fingerprint: Fingerprint) -> Self {
        Self { kind, fingerprint }
    }
}

/// Internal event types the replay machinery can observe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalKind {
    /// A controller received an OpenFlow message from a switch.
    ControlMessageReceive {
        dpid: DpId,
        controller: ControllerId,
    },
    /// A controller changed a piece of its internal state.
    ControllerStateChange {
        controller: ControllerId,
        name: String,
        value: String,
    },
    /// A controller requested a nondeterministic value (clock, random).
    DeterministicValue {
        controller: ControllerId,
        name: String,
    },
}

impl InternalKind {
    pub fn name(&self) -> &'static str {
        match self {
            InternalKind::ControlMessageReceive { .. } => "control_message_receive",
            InternalKind::ControllerStateChange { .. } => "controller_state_change",
            InternalKind::DeterministicValue { .. } => "deterministic_value",
        }
    }
}

// ============================================================================
// Dependency Policy
// ============================================================================

/// How dependency marking treats an input kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyPolicy {
    /// No forced dependents.
    NoOp,
    /// Half of a failure/recovery pair keyed by fingerprint.
    AtomicPair(PairRole),
    /// Dependencies are too complex to model; marking fails fast.
    Unsupported,
}

/// Which half of an atomic failure/recovery pair a kind is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairRole {
    Failure,
    Recovery,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn link() -> LinkId {
        LinkId {
            start_dpid: DpId::new(1),
            start_port: 2,
            end_dpid: DpId::new(3),
            end_port: 4,
        }
    }

    #[test_case(InputKind::SwitchFailure { dpid: DpId::new(1) } => DependencyPolicy::AtomicPair(PairRole::Failure); "switch failure")]
    #[test_case(InputKind::SwitchRecovery { dpid: DpId::new(1) } => DependencyPolicy::AtomicPair(PairRole::Recovery); "switch recovery")]
    #[test_case(InputKind::LinkFailure { link: link() } => DependencyPolicy::AtomicPair(PairRole::Failure); "link failure")]
    #[test_case(InputKind::LinkRecovery { link: link() } => DependencyPolicy::AtomicPair(PairRole::Recovery); "link recovery")]
    #[test_case(InputKind::ControllerFailure { controller: ControllerId::new(1) } => DependencyPolicy::AtomicPair(PairRole::Failure); "controller failure")]
    #[test_case(InputKind::ControllerRecovery { controller: ControllerId::new(1) } => DependencyPolicy::AtomicPair(PairRole::Recovery); "controller recovery")]
    #[test_case(InputKind::ControlChannelBlock { dpid: DpId::new(1), controller: ControllerId::new(2) } => DependencyPolicy::AtomicPair(PairRole::Failure); "channel block")]
    #[test_case(InputKind::ControlChannelUnblock { dpid: DpId::new(1), controller: ControllerId::new(2) } => DependencyPolicy::AtomicPair(PairRole::Recovery); "channel unblock")]
    #[test_case(InputKind::DataplaneDrop { packet: "p".into() } => DependencyPolicy::Unsupported; "dataplane drop")]
    #[test_case(InputKind::DataplanePermit { packet: "p".into() } => DependencyPolicy::Unsupported; "dataplane permit")]
    #[test_case(InputKind::HostMigration { host: HostId::new(1), old_dpid: DpId::new(1), old_port: 1, new_dpid: DpId::new(2), new_port: 1 } => DependencyPolicy::Unsupported; "host migration")]
    #[test_case(InputKind::TrafficInjection { host: HostId::new(1), packet: "p".into() } => DependencyPolicy::NoOp; "traffic injection")]
    #[test_case(InputKind::PolicyChange { request: "r".into() } => DependencyPolicy::NoOp; "policy change")]
    #[test_case(InputKind::Custom { class: "x".into() } => DependencyPolicy::NoOp; "custom")]
    fn dependency_policy_table(kind: InputKind) -> DependencyPolicy {
        kind.dependency_policy()
    }

    #[test]
    fn failure_and_recovery_share_fingerprint() {
        let failure = InputEvent::new(InputKind::LinkFailure { link: link() });
        let recovery = InputEvent::new(InputKind::LinkRecovery { link: link() });
        assert_eq!(failure.fingerprint, recovery.fingerprint);

        let switch = InputEvent::new(InputKind::SwitchFailure { dpid: DpId::new(1) });
        let controller = InputEvent::new(InputKind::ControllerFailure {
            controller: ControllerId::new(1),
        });
        assert_ne!(switch.fingerprint, controller.fingerprint);
    }

    #[test]
    fn add_dependent_is_duplicate_free() {
        let mut event = Event::input(
            Label::new(1),
            Timestamp::ZERO,
            InputEvent::new(InputKind::SwitchFailure { dpid: DpId::new(1) }),
        );
        event.add_dependent(Label::new(2));
        event.add_dependent(Label::new(2));
        event.add_dependent(Label::new(3));
        assert_eq!(event.dependent_labels, vec![Label::new(2), Label::new(3)]);
    }

    #[test]
    fn internal_events_have_noop_policy() {
        let event = Event::internal(
            Label::new(7),
            Timestamp::from_secs(1),
            InternalEvent::new(
                InternalKind::ControlMessageReceive {
                    dpid: DpId::new(1),
                    controller: ControllerId::new(1),
                },
                Fingerprint::from("of:packet_in"),
            ),
        );
        assert_eq!(event.dependency_policy(), DependencyPolicy::NoOp);
        assert_eq!(event.kind_name(), "control_message_receive");
        assert!(!event.is_input());
    }

    #[test]
    fn event_survives_json_and_postcard() {
        let event = Event::input(
            Label::new(4),
            Timestamp::from_millis(250),
            InputEvent::new(InputKind::ControlChannelBlock {
                dpid: DpId::new(2),
                controller: ControllerId::new(1),
            }),
        );

        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(serde_json::from_str::<Event>(&json).unwrap(), event);

        let bytes = postcard::to_allocvec(&event).unwrap();
        assert_eq!(postcard::from_bytes::<Event>(&bytes).unwrap(), event);
    }
}
