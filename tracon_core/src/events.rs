//! Publish/subscribe bus for session lifecycle notifications.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// A lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    AddedAircraft { callsign: String },
    ModifiedAircraft { callsign: String },
    RemovedAircraft { callsign: String },
    InitiatedTrack { callsign: String, controller: String },
    DroppedTrack { callsign: String, controller: String },
    AcceptedHandoff { callsign: String, controller: String },
    RadioTransmission { callsign: String, message: String },
    TextMessage {
        from: String,
        to: Option<String>,
        contents: String,
    },
}

impl Event {
    /// The aircraft (or, for text messages, the sender) the event is about.
    pub fn callsign(&self) -> &str {
        match self {
            Event::AddedAircraft { callsign }
            | Event::ModifiedAircraft { callsign }
            | Event::RemovedAircraft { callsign }
            | Event::InitiatedTrack { callsign, .. }
            | Event::DroppedTrack { callsign, .. }
            | Event::AcceptedHandoff { callsign, .. }
            | Event::RadioTransmission { callsign, .. } => callsign,
            Event::TextMessage { from, .. } => from,
        }
    }
}

/// Handle identifying one subscriber's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

#[derive(Debug, Default)]
struct Subscribers {
    next_id: u64,
    queues: BTreeMap<SubscriberId, Vec<Event>>,
}

/// Cloneable handle to a shared event bus.
///
/// Each subscriber gets its own queue; `post` appends to all of them and
/// `get` drains one. Events posted with no subscribers are dropped.
#[derive(Debug, Clone, Default)]
pub struct EventStream {
    inner: Arc<Mutex<Subscribers>>,
}

impl EventStream {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn post(&self, event: Event) {
        let mut subs = self.lock();
        for queue in subs.queues.values_mut() {
            queue.push(event.clone());
        }
    }

    pub fn subscribe(&self) -> SubscriberId {
        let mut subs = self.lock();
        let id = SubscriberId(subs.next_id);
        subs.next_id += 1;
        subs.queues.insert(id, Vec::new());
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.lock().queues.remove(&id);
    }

    /// Returns and clears everything posted to `id` since its last `get`.
    pub fn get(&self, id: SubscriberId) -> Vec<Event> {
        self.lock()
            .queues
            .get_mut(&id)
            .map(std::mem::take)
            .unwrap_or_default()
    }
}
