//! Process signalling abstraction.

use crate::error::EnvError;
use crate::types::{ControlSignal, WorkerPid};

/// Delivers control signals to worker processes.
///
/// Delivery is fire-and-forget: success only means the target still
/// exists and accepted the signal, not that it acted on it.
///
/// # Implementations
///
/// - **Production**: `NixProcessControl` - `kill(2)` via `nix`
/// - **Simulation**: `SimProcessControl` - an in-memory process table
pub trait ProcessControl: Send + Sync {
    /// Sends `signal` to `pid`.
    ///
    /// # Returns
    /// * `Ok(())` - The signal was delivered
    /// * `Err(EnvError::ProcessGone)` - No such process
    /// * `Err(EnvError::SignalFailed)` - Any other delivery failure
    fn deliver(&self, pid: WorkerPid, signal: ControlSignal) -> Result<(), EnvError>;

    /// Returns true while `pid` can still receive signals.
    fn is_present(&self, pid: WorkerPid) -> bool;
}
