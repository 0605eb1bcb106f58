//! Pending handoffs awaiting simulated acceptance.

use crate::clock::SimTime;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::time::Duration;

/// Simulated controllers take between these many seconds to accept.
pub const MIN_ACCEPT_DELAY_SECS: f64 = 2.0;
pub const MAX_ACCEPT_DELAY_SECS: f64 = 10.0;

/// Acceptance deadlines keyed by aircraft callsign.
#[derive(Debug, Clone)]
pub struct HandoffTracker {
    deadlines: BTreeMap<String, SimTime>,
    rng: ChaCha8Rng,
}

impl HandoffTracker {
    pub fn new(rng: ChaCha8Rng) -> Self {
        Self {
            deadlines: BTreeMap::new(),
            rng,
        }
    }

    /// Records a handoff offered at `now` and returns its deadline.
    ///
    /// Replaces any earlier pending record for the same aircraft.
    pub fn offer(&mut self, callsign: &str, now: SimTime) -> SimTime {
        let delay = self.rng.gen_range(MIN_ACCEPT_DELAY_SECS..MAX_ACCEPT_DELAY_SECS);
        let deadline = now + Duration::from_secs_f64(delay);
        self.deadlines.insert(callsign.to_string(), deadline);
        deadline
    }

    /// Drops the pending record, if any.
    pub fn cancel(&mut self, callsign: &str) -> bool {
        self.deadlines.remove(callsign).is_some()
    }

    pub fn deadline(&self, callsign: &str) -> Option<SimTime> {
        self.deadlines.get(callsign).copied()
    }

    /// Removes and returns every record whose deadline has passed.
    pub fn take_expired(&mut self, now: SimTime) -> Vec<String> {
        let expired: Vec<String> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| now > **deadline)
            .map(|(callsign, _)| callsign.clone())
            .collect();
        for callsign in &expired {
            self.deadlines.remove(callsign);
        }
        expired
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn tracker() -> HandoffTracker {
        HandoffTracker::new(ChaCha8Rng::seed_from_u64(7))
    }

    #[test]
    fn test_deadline_within_window() {
        let mut t = tracker();
        let start = SimTime::from_secs(100);
        for _ in 0..500 {
            let deadline = t.offer("ASA12", start);
            let delay = deadline.since(start).as_secs_f64();
            assert!((MIN_ACCEPT_DELAY_SECS..MAX_ACCEPT_DELAY_SECS).contains(&delay));
        }
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_expiry_only_after_deadline() {
        let mut t = tracker();
        let deadline = t.offer("ASA12", SimTime::ZERO);

        assert!(t.take_expired(SimTime::from_secs(1)).is_empty());
        assert!(t.take_expired(deadline).is_empty());
        assert_eq!(t.take_expired(SimTime::from_secs(11)), vec!["ASA12".to_string()]);
        assert!(t.is_empty());
    }

    #[test]
    fn test_reoffer_replaces_record() {
        let mut t = tracker();
        t.offer("ASA12", SimTime::ZERO);
        let second = t.offer("ASA12", SimTime::from_secs(60));

        assert_eq!(t.deadline("ASA12"), Some(second));
        assert!(t.take_expired(SimTime::from_secs(30)).is_empty());
    }

    #[test]
    fn test_cancel() {
        let mut t = tracker();
        t.offer("ASA12", SimTime::ZERO);
        assert!(t.cancel("ASA12"));
        assert!(!t.cancel("ASA12"));
        assert!(t.take_expired(SimTime::from_secs(60)).is_empty());
    }
}
