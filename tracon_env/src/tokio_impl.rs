//! Production implementation of SessionContext using Tokio.

use crate::SessionContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Production context backed by the host clock and Tokio tasks.
///
/// The master seed is drawn from OS entropy at construction, so two
/// sessions never see the same traffic unless the seed is pinned with
/// `with_seed`.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,

    /// Master seed for all derived random streams
    seed: u64,
}

impl TokioContext {
    /// Creates a new TokioContext with a random master seed.
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// Creates a TokioContext with a fixed master seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            start: Instant::now(),
            seed,
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
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
