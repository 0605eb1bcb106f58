//! Core environment context trait for TRACON sessions.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" so that a session can run
/// against the host's wall clock or against a manually driven clock
/// in tests and in the deterministic harness.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `std::time::Instant`, random master seed
/// - **Deterministic**: `ManualContext` - explicit time advancement, fixed seed
///
/// # Determinism
///
/// Virtual simulation time is derived from the deltas of `now()`, and
/// every random stream is seeded through `derive_rng_seed`, so a manual
/// context with a fixed seed reproduces a session exactly.
#[async_trait]
pub trait SessionContext: Send + Sync + 'static {
    /// Returns the monotonic wall time since context creation.
    ///
    /// The session clock turns deltas of this value into virtual time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time, for log and export timestamps.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In the manual context: advances the clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task (transport reader/writer).
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Derives the seed for one named random stream.
    ///
    /// Each subsystem (spawning, handoff delays, squawk probing, weather)
    /// passes its own `stream` value so that adding draws in one subsystem
    /// does not shift the sequence seen by another.
    fn derive_rng_seed(&self, stream: u64) -> u64 {
        self.seed().wrapping_mul(0x517cc1b727220a95) ^ stream
    }

    /// Returns the context's master seed (for logging/debugging).
    fn seed(&self) -> u64;
}
