//! Core environment context trait for Dronefield components.

use async_trait::async_trait;
use std::time::Duration;

/// The central interface for time.
///
/// The supervisor and the arbiter measure elapsed time and pace their
/// loops through this trait so that their policies can be exercised
/// against a virtual clock.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`
/// - **Simulation**: `SimContext` - virtual clock advanced by `sleep()`
#[async_trait]
pub trait FleetContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Returns the context's seed (for jitter and map generation).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
