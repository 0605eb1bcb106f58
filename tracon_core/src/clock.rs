//! Virtual session time.
//!
//! Wall time (from the `SessionContext`) only ever enters the session as a
//! delta; every timer, deadline and staleness check compares `SimTime`s.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};
use std::time::Duration;

/// A point in virtual time, measured from session start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimTime(Duration);

impl SimTime {
    pub const ZERO: SimTime = SimTime(Duration::ZERO);

    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// Negative inputs saturate at session start.
    pub fn from_secs_f64(secs: f64) -> Self {
        Self(Duration::from_secs_f64(secs.max(0.0)))
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0.as_secs_f64()
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future.
    pub fn since(&self, earlier: SimTime) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> SimTime {
        SimTime(self.0.saturating_add(rhs))
    }
}

impl AddAssign<Duration> for SimTime {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 = self.0.saturating_add(rhs);
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        write!(f, "{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
    }
}

/// Fastest supported simulation rate.
pub const MAX_RATE: f64 = 100.0;

/// Clamps a requested rate into `[0, MAX_RATE]`; NaN stops the clock.
fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() {
        0.0
    } else {
        rate.clamp(0.0, MAX_RATE)
    }
}

/// Session clock: virtual time that advances at `rate` times wall time.
#[derive(Debug, Clone)]
pub struct Clock {
    /// Current virtual time
    now: SimTime,

    /// Virtual seconds per wall second
    rate: f64,

    /// Frozen while set
    paused: bool,

    /// Wall time of the last sync
    wall_reference: Duration,
}

impl Clock {
    /// Creates a running clock at virtual time zero.
    pub fn new(rate: f64, wall_now: Duration) -> Self {
        Self {
            now: SimTime::ZERO,
            rate: clamp_rate(rate),
            paused: false,
            wall_reference: wall_now,
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Advances virtual time by `wall_delta * rate` unless paused.
    pub fn advance(&mut self, wall_delta: Duration) {
        if self.paused {
            return;
        }
        self.now += wall_delta.mul_f64(self.rate);
    }

    /// Advances by the wall time elapsed since the previous sync.
    pub fn sync(&mut self, wall_now: Duration) {
        let delta = wall_now.saturating_sub(self.wall_reference);
        self.wall_reference = wall_now;
        self.advance(delta);
    }

    /// Changes the rate; wall time before this call is not replayed at it.
    pub fn set_rate(&mut self, rate: f64, wall_now: Duration) {
        self.rate = clamp_rate(rate);
        self.wall_reference = wall_now;
    }

    /// Flips the pause flag and returns the new state.
    pub fn toggle_pause(&mut self, wall_now: Duration) -> bool {
        self.paused = !self.paused;
        self.wall_reference = wall_now;
        self.paused
    }

    /// Advances virtual time directly, ignoring rate and pause.
    pub fn skip(&mut self, virtual_delta: Duration) {
        self.now += virtual_delta;
    }

    /// Moves the wall reference without advancing virtual time.
    pub fn rebase(&mut self, wall_now: Duration) {
        self.wall_reference = wall_now;
    }
}
