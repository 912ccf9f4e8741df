//! Production implementation of ProcessControl using `kill(2)`.

use crate::error::EnvError;
use crate::types::{ControlSignal, WorkerPid};
use crate::ProcessControl;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Signals real processes through `nix::sys::signal::kill`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NixProcessControl;

impl NixProcessControl {
    /// Creates a new NixProcessControl.
    pub fn new() -> Self {
        Self
    }

    fn to_signal(signal: ControlSignal) -> Signal {
        match signal {
            ControlSignal::Probe => Signal::SIGUSR1,
            ControlSignal::Shutdown => Signal::SIGTERM,
            ControlSignal::Kill => Signal::SIGKILL,
        }
    }
}

impl ProcessControl for NixProcessControl {
    fn deliver(&self, pid: WorkerPid, signal: ControlSignal) -> Result<(), EnvError> {
        match kill(Pid::from_raw(pid.as_raw()), Self::to_signal(signal)) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(EnvError::gone(pid)),
            Err(e) => Err(EnvError::signal(format!("{} to {}: {}", signal, pid, e))),
        }
    }

    fn is_present(&self, pid: WorkerPid) -> bool {
        // Signal 0 only performs the existence and permission checks
        match kill(Pid::from_raw(pid.as_raw()), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::Command;

    #[test]
    fn test_shutdown_terminates_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = WorkerPid::from(child.id());
        let ctl = NixProcessControl::new();

        assert!(ctl.is_present(pid));
        ctl.deliver(pid, ControlSignal::Shutdown).unwrap();

        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(libc_sigterm()));
    }

    #[test]
    fn test_reaped_child_is_gone() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = WorkerPid::from(child.id());
        child.wait().unwrap();

        let ctl = NixProcessControl::new();
        assert!(!ctl.is_present(pid));
        assert!(matches!(
            ctl.deliver(pid, ControlSignal::Probe),
            Err(EnvError::ProcessGone(_))
        ));
    }

    fn libc_sigterm() -> i32 {
        Signal::SIGTERM as i32
    }
}
