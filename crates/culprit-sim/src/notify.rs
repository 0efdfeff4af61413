//! Notification streams and scoped listener subscriptions.
//!
//! A simulation publishes two streams of internally-generated events:
//! message receipts (a controller is about to receive an OpenFlow message)
//! and state changes (a controller reports a change to its internal state).
//! Without listeners, notifications are buffered until the replayer releases
//! them or the simulation is flushed. A listener decides whether each
//! notification is forwarded to its destination immediately.
//!
//! Registration returns a [`Subscription`]. Dropping it removes the listener,
//! so a listener can never outlive the scope that installed it.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use culprit_types::{
    ControllerId, DpId, Fingerprint, InternalEvent, InternalKind, Timestamp,
};

// ============================================================================
// Notifications
// ============================================================================

/// Which notification stream an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationStream {
    MessageReceipt,
    StateChange,
}

impl NotificationStream {
    /// Both streams, in flush order.
    pub const ALL: [NotificationStream; 2] = [
        NotificationStream::MessageReceipt,
        NotificationStream::StateChange,
    ];
}

/// An internally-generated event surfaced by the simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    MessageReceipt {
        dpid: DpId,
        controller: ControllerId,
        fingerprint: Fingerprint,
        time: Timestamp,
    },
    StateChange {
        controller: ControllerId,
        name: String,
        value: String,
        fingerprint: Fingerprint,
        time: Timestamp,
    },
}

impl Notification {
    pub fn stream(&self) -> NotificationStream {
        match self {
            Notification::MessageReceipt { .. } => NotificationStream::MessageReceipt,
            Notification::StateChange { .. } => NotificationStream::StateChange,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        match self {
            Notification::MessageReceipt { fingerprint, .. }
            | Notification::StateChange { fingerprint, .. } => fingerprint,
        }
    }

    pub fn time(&self) -> Timestamp {
        match self {
            Notification::MessageReceipt { time, .. } | Notification::StateChange { time, .. } => {
                *time
            }
        }
    }

    /// Converts the notification into the internal event a trace records.
    pub fn to_internal(&self) -> InternalEvent {
        match self {
            Notification::MessageReceipt {
                dpid,
                controller,
                fingerprint,
                ..
            } => InternalEvent::new(
                InternalKind::ControlMessageReceive {
                    dpid: *dpid,
                    controller: *controller,
                },
                fingerprint.clone(),
            ),
            Notification::StateChange {
                controller,
                name,
                value,
                fingerprint,
                ..
            } => InternalEvent::new(
                InternalKind::ControllerStateChange {
                    controller: *controller,
                    name: name.clone(),
                    value: value.clone(),
                },
                fingerprint.clone(),
            ),
        }
    }

    /// Returns true if this notification is the one `expected` recorded.
    pub fn matches(&self, expected: &InternalEvent) -> bool {
        if self.fingerprint() != &expected.fingerprint {
            return false;
        }
        matches!(
            (self, &expected.kind),
            (
                Notification::MessageReceipt { .. },
                InternalKind::ControlMessageReceive { .. }
            ) | (
                Notification::StateChange { .. },
                InternalKind::ControllerStateChange { .. }
            )
        )
    }
}

/// What the simulation should do with a notification after dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Deliver to the normal destination now.
    Forward,
    /// Keep buffered until released or flushed.
    Buffer,
}

// ============================================================================
// Notification Hub
// ============================================================================

type Listener = Box<dyn FnMut(&Notification) -> Disposition + Send>;

struct Registered {
    id: u64,
    streams: Vec<NotificationStream>,
    listener: Listener,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    listeners: Vec<Registered>,
}

/// Registry of listeners for a simulation's notification streams.
#[derive(Clone, Default)]
pub struct NotificationHub {
    state: Arc<Mutex<HubState>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `listener` on `streams` until the returned subscription is
    /// dropped.
    pub fn subscribe<F>(&self, streams: &[NotificationStream], listener: F) -> Subscription
    where
        F: FnMut(&Notification) -> Disposition + Send + 'static,
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.push(Registered {
            id,
            streams: streams.to_vec(),
            listener: Box::new(listener),
        });

        Subscription {
            id,
            hub: Arc::downgrade(&self.state),
        }
    }

    /// Hands `notification` to every listener on its stream.
    ///
    /// Returns [`Disposition::Buffer`] when nobody is listening, and
    /// [`Disposition::Forward`] if any listener forwards it.
    pub fn dispatch(&self, notification: &Notification) -> Disposition {
        let stream = notification.stream();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let mut disposition = Disposition::Buffer;
        for registered in state
            .listeners
            .iter_mut()
            .filter(|r| r.streams.contains(&stream))
        {
            if (registered.listener)(notification) == Disposition::Forward {
                disposition = Disposition::Forward;
            }
        }
        disposition
    }

    /// Number of installed listeners.
    pub fn listener_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .len()
    }
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHub")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Handle for an installed listener. Dropping it deregisters the listener.
#[must_use = "dropping a Subscription immediately removes its listener"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    hub: Weak<Mutex<HubState>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(state) = self.hub.upgrade() {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            state.listeners.retain(|r| r.id != self.id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn receipt(fp: &str) -> Notification {
        Notification::MessageReceipt {
            dpid: DpId::new(1),
            controller: ControllerId::new(1),
            fingerprint: Fingerprint::from(fp),
            time: Timestamp::from_secs(1),
        }
    }

    #[test]
    fn no_listeners_buffers() {
        let hub = NotificationHub::new();
        assert_eq!(hub.dispatch(&receipt("a")), Disposition::Buffer);
    }

    #[test]
    fn subscription_drop_removes_listener() {
        let hub = NotificationHub::new();
        let seen = Arc::new(AtomicUsize::new(0));

        {
            let seen = Arc::clone(&seen);
            let _subscription = hub.subscribe(&NotificationStream::ALL, move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Disposition::Forward
            });
            assert_eq!(hub.listener_count(), 1);
            assert_eq!(hub.dispatch(&receipt("a")), Disposition::Forward);
        }

        assert_eq!(hub.listener_count(), 0);
        assert_eq!(hub.dispatch(&receipt("b")), Disposition::Buffer);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_only_see_their_stream() {
        let hub = NotificationHub::new();
        let _subscription =
            hub.subscribe(&[NotificationStream::StateChange], |_| Disposition::Forward);

        assert_eq!(hub.dispatch(&receipt("a")), Disposition::Buffer);

        let change = Notification::StateChange {
            controller: ControllerId::new(1),
            name: "role".to_string(),
            value: "master".to_string(),
            fingerprint: Fingerprint::from("role:master"),
            time: Timestamp::ZERO,
        };
        assert_eq!(hub.dispatch(&change), Disposition::Forward);
    }

    #[test]
    fn subscription_outliving_hub_is_harmless() {
        let hub = NotificationHub::new();
        let subscription = hub.subscribe(&NotificationStream::ALL, |_| Disposition::Forward);
        drop(hub);
        drop(subscription);
    }

    #[test]
    fn notification_matches_recorded_internal_event() {
        let n = receipt("of:flow_mod");
        let internal = n.to_internal();
        assert!(n.matches(&internal));

        let other = receipt("of:packet_in").to_internal();
        assert!(!n.matches(&other));
    }
}
