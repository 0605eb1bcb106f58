//! Manually driven context for deterministic runs and tests.

use crate::SessionContext;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Context whose wall clock only moves when told to.
///
/// This implements `SessionContext` using:
/// - A wall clock that is advanced explicitly (`advance_time`)
/// - A fixed master seed for every derived random stream
/// - A sleep that advances the clock instead of waiting
pub struct ManualContext {
    /// Master seed for this run
    seed: u64,

    /// Current wall time (nanoseconds since context creation)
    wall_time_ns: Arc<Mutex<u64>>,

    /// Epoch offset (wall time 0 maps to this system time)
    epoch: SystemTime,
}

impl ManualContext {
    /// Creates a new ManualContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            wall_time_ns: Arc::new(Mutex::new(0)),
            epoch: UNIX_EPOCH + Duration::from_secs(1704067200), // 2024-01-01 00:00:00 UTC
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    fn time(&self) -> MutexGuard<'_, u64> {
        self.wall_time_ns
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Advances wall time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        *self.time() += duration.as_nanos() as u64;
    }

    /// Sets the wall time to a specific value.
    pub fn set_time(&self, time_ns: u64) {
        *self.time() = time_ns;
    }

    /// Returns the current wall time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *self.time()
    }
}

impl Clone for ManualContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            wall_time_ns: Arc::clone(&self.wall_time_ns),
            epoch: self.epoch,
        }
    }
}

#[async_trait]
impl SessionContext for ManualContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance_time(duration);
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_context_time() {
        let ctx = ManualContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.advance_time(Duration::from_secs(1));
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.advance_time(Duration::from_millis(500));
        assert_eq!(ctx.now(), Duration::from_millis(1500));
    }

    #[test]
    fn test_manual_context_deterministic_streams() {
        let ctx1 = ManualContext::new(42);
        let ctx2 = ManualContext::new(42);

        assert_eq!(ctx1.derive_rng_seed(1), ctx2.derive_rng_seed(1));
        assert_ne!(ctx1.derive_rng_seed(1), ctx1.derive_rng_seed(2));
    }

    #[test]
    fn test_manual_context_clone_shares_time() {
        let ctx1 = ManualContext::new(42);
        let ctx2 = ctx1.clone();

        ctx1.advance_time(Duration::from_secs(5));

        assert_eq!(ctx1.now(), ctx2.now());
        assert_eq!(ctx2.system_time(), ctx2.epoch + Duration::from_secs(5));
    }
}
