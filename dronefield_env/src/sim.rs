//! Simulated environment for deterministic testing.
//!
//! `SimContext` is a virtual clock: `sleep()` advances time instantly, so a
//! supervisor loop that would take seconds in production completes in
//! microseconds and always observes the same timeline for a given config.
//! `SimProcessControl` is an in-memory process table that records every
//! signal it is asked to deliver.

use crate::error::EnvError;
use crate::types::{ControlSignal, WorkerPid};
use crate::{FleetContext, ProcessControl};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Simulation context backed by a virtual clock.
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let mut time = lock(&self.virtual_time_ns);
        *time += duration.as_nanos() as u64;
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *lock(&self.virtual_time_ns)
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
        }
    }
}

#[async_trait]
impl FleetContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    async fn sleep(&self, duration: Duration) {
        self.advance_time(duration);
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

/// One entry of the simulated process table.
#[derive(Debug, Default, Clone)]
struct SimProcess {
    /// Signals successfully delivered, in order
    delivered: Vec<(Duration, ControlSignal)>,
    /// Set once a shutdown or kill was delivered
    terminated: bool,
    /// Survives shutdown; only a kill removes it
    ignores_shutdown: bool,
}

/// In-memory process table implementing `ProcessControl`.
///
/// Processes are registered with `spawn()` and disappear with `crash()`.
/// Delivering `Kill` (or `Shutdown`, unless the process was registered with
/// `spawn_stubborn()`) marks a process terminated and removes it from the
/// table, so later deliveries fail with `ProcessGone`.
pub struct SimProcessControl {
    /// Clock used to timestamp deliveries
    ctx: SimContext,

    processes: Arc<Mutex<HashMap<WorkerPid, SimProcess>>>,

    /// Terminated or crashed processes, kept for inspection
    history: Arc<Mutex<HashMap<WorkerPid, SimProcess>>>,
}

impl SimProcessControl {
    /// Creates an empty process table timestamped by `ctx`.
    pub fn new(ctx: SimContext) -> Self {
        Self {
            ctx,
            processes: Arc::new(Mutex::new(HashMap::new())),
            history: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers a live process.
    pub fn spawn(&self, pid: WorkerPid) {
        lock(&self.processes).insert(pid, SimProcess::default());
    }

    /// Registers a live process that ignores shutdown requests.
    pub fn spawn_stubborn(&self, pid: WorkerPid) {
        let process = SimProcess {
            ignores_shutdown: true,
            ..SimProcess::default()
        };
        lock(&self.processes).insert(pid, process);
    }

    /// Makes a process vanish without any signal (crash + reap).
    pub fn crash(&self, pid: WorkerPid) {
        if let Some(process) = lock(&self.processes).remove(&pid) {
            lock(&self.history).insert(pid, process);
        }
    }

    /// Returns every signal delivered to `pid` with its virtual timestamp.
    pub fn delivered(&self, pid: WorkerPid) -> Vec<(Duration, ControlSignal)> {
        if let Some(process) = lock(&self.processes).get(&pid) {
            return process.delivered.clone();
        }
        lock(&self.history)
            .get(&pid)
            .map(|p| p.delivered.clone())
            .unwrap_or_default()
    }

    /// Returns true once a shutdown or kill reached `pid`.
    pub fn was_terminated(&self, pid: WorkerPid) -> bool {
        lock(&self.history)
            .get(&pid)
            .map(|p| p.terminated)
            .unwrap_or(false)
    }
}

impl Clone for SimProcessControl {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            processes: Arc::clone(&self.processes),
            history: Arc::clone(&self.history),
        }
    }
}

impl ProcessControl for SimProcessControl {
    fn deliver(&self, pid: WorkerPid, signal: ControlSignal) -> Result<(), EnvError> {
        let mut processes = lock(&self.processes);
        let process = processes.get_mut(&pid).ok_or_else(|| EnvError::gone(pid))?;
        process.delivered.push((self.ctx.now(), signal));

        let terminates = match signal {
            ControlSignal::Probe => false,
            ControlSignal::Shutdown => !process.ignores_shutdown,
            ControlSignal::Kill => true,
        };
        if terminates {
            if let Some(mut process) = processes.remove(&pid) {
                process.terminated = true;
                lock(&self.history).insert(pid, process);
            }
        }
        Ok(())
    }

    fn is_present(&self, pid: WorkerPid) -> bool {
        lock(&self.processes).contains_key(&pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_context_time() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.advance_time(Duration::from_secs(1));
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.advance_time(Duration::from_millis(500));
        assert_eq!(ctx.now(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_sim_sleep_advances_clock() {
        let ctx = SimContext::new(1);
        ctx.sleep(Duration::from_secs(3)).await;
        assert_eq!(ctx.now(), Duration::from_secs(3));
    }

    #[test]
    fn test_sim_context_clone_shares_time() {
        let ctx1 = SimContext::new(42);
        let ctx2 = ctx1.clone();

        ctx1.advance_time(Duration::from_secs(5));

        // Both should see the same time
        assert_eq!(ctx1.now(), ctx2.now());
    }

    #[test]
    fn test_sim_process_delivery_and_crash() {
        let ctx = SimContext::new(7);
        let ctl = SimProcessControl::new(ctx.clone());
        let pid = WorkerPid(100);
        ctl.spawn(pid);

        ctx.advance_time(Duration::from_secs(1));
        ctl.deliver(pid, ControlSignal::Probe).unwrap();
        assert_eq!(
            ctl.delivered(pid),
            vec![(Duration::from_secs(1), ControlSignal::Probe)]
        );

        ctl.crash(pid);
        assert!(!ctl.is_present(pid));
        assert!(matches!(
            ctl.deliver(pid, ControlSignal::Probe),
            Err(EnvError::ProcessGone(_))
        ));
        assert!(!ctl.was_terminated(pid));
    }

    #[test]
    fn test_sim_process_shutdown_removes_entry() {
        let ctl = SimProcessControl::new(SimContext::new(7));
        let pid = WorkerPid(200);
        ctl.spawn(pid);

        ctl.deliver(pid, ControlSignal::Shutdown).unwrap();
        assert!(!ctl.is_present(pid));
        assert!(ctl.was_terminated(pid));
        assert_eq!(ctl.delivered(pid).len(), 1);
    }

    #[test]
    fn test_sim_stubborn_process_needs_kill() {
        let ctl = SimProcessControl::new(SimContext::new(7));
        let pid = WorkerPid(300);
        ctl.spawn_stubborn(pid);

        ctl.deliver(pid, ControlSignal::Shutdown).unwrap();
        assert!(ctl.is_present(pid));
        ctl.deliver(pid, ControlSignal::Kill).unwrap();
        assert!(!ctl.is_present(pid));
        assert!(ctl.was_terminated(pid));
    }
}
