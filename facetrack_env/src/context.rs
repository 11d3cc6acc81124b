//! Core environment context trait for the tracker.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for environment interaction.
///
/// This trait abstracts the clock and task spawning so that the tracking
/// loop can run against the real world (tokio) or a test harness with a
/// virtual clock.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and `Instant`
/// - **Tests**: any implementation with a manually advanced clock
#[async_trait]
pub trait TrackerContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// All record arrival times, conflict-window timestamps, and prune
    /// deadlines are expressed on this clock, so ordering is immune to
    /// wall-clock adjustments.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time, used only for rendering audit rows.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`. This is the only place
    /// the tracking loop blocks besides the bounded feed poll.
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task (e.g. the ingestion producer).
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
