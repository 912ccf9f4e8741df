//! The shared log: one append-only file for the whole fleet.
//!
//! The orchestrator opens the file once and every child inherits the
//! descriptor. Each process installs its own `tracing` subscriber writing
//! to that descriptor, and each component logs inside a role-tagged span.

use dronefield_core::supervisor::ActivitySource;
use dronefield_core::FleetError;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::subscriber::DefaultGuard;
use tracing::{info, info_span, Level, Span};
use tracing_subscriber::EnvFilter;

/// The fleet's log file, opened in append mode.
#[derive(Debug)]
pub struct SharedLog {
    file: File,
}

impl SharedLog {
    /// Opens (creating if needed) the log and makes it inheritable.
    pub fn open(path: &Path) -> Result<Self, FleetError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| FleetError::setup(format!("cannot open log {}: {}", path.display(), e)))?;

        // std opens with O_CLOEXEC; children must keep the descriptor
        fcntl(file.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::empty()))
            .map_err(|e| FleetError::setup(format!("cannot share log descriptor: {}", e)))?;
        Ok(Self { file })
    }

    /// Adopts an inherited log descriptor.
    pub fn from_fd(fd: OwnedFd) -> Self {
        Self { file: File::from(fd) }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Last modification time of the log.
    pub fn modified(&self) -> Option<SystemTime> {
        self.file.metadata().and_then(|m| m.modified()).ok()
    }

    /// Installs a subscriber writing to this log for the current thread.
    ///
    /// The level is DEBUG with `verbose`, INFO otherwise; `RUST_LOG`
    /// overrides both when set.
    pub fn install(&self, verbose: bool) -> Result<DefaultGuard, FleetError> {
        let level = if verbose { Level::DEBUG } else { Level::INFO };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
        let writer = self.file.try_clone()?;

        let subscriber = tracing_subscriber::fmt()
            .with_writer(Mutex::new(writer))
            .with_ansi(false)
            .with_env_filter(filter)
            .finish();
        Ok(tracing::subscriber::set_default(subscriber))
    }

    /// An independent handle used by the supervisor to watch the log.
    pub fn activity(&self) -> Result<LogActivity, FleetError> {
        Ok(LogActivity {
            file: self.file.try_clone()?,
        })
    }
}

/// Reports the log's modification time as fleet activity.
#[derive(Debug)]
pub struct LogActivity {
    file: File,
}

impl ActivitySource for LogActivity {
    fn last_activity(&self) -> Option<SystemTime> {
        self.file.metadata().and_then(|m| m.modified()).ok()
    }
}

/// Role-tagged logging scope of one component.
#[derive(Debug, Clone)]
pub struct LogContext {
    role: &'static str,
    span: Span,
}

impl LogContext {
    pub fn new(role: &'static str) -> Self {
        let span = info_span!("fleet", role, pid = std::process::id());
        Self { role, span }
    }

    pub fn role(&self) -> &'static str {
        self.role
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Answers a liveness probe.
    pub fn active(&self) {
        info!(parent: &self.span, "{} is active", self.role);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_open_clears_cloexec() {
        let dir = tempfile::tempdir().unwrap();
        let log = SharedLog::open(&dir.path().join("fleet.log")).unwrap();
        let flags = fcntl(log.raw_fd(), FcntlArg::F_GETFD).unwrap();
        assert_eq!(FdFlag::from_bits_truncate(flags), FdFlag::empty());
    }

    #[test]
    fn test_open_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.log");
        std::fs::write(&path, "first\n").unwrap();

        let log = SharedLog::open(&path).unwrap();
        let mut handle = log.file.try_clone().unwrap();
        handle.write_all(b"second\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_active_is_written_through_subscriber() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.log");
        let log = SharedLog::open(&path).unwrap();
        {
            let _guard = log.install(false).unwrap();
            LogContext::new("dynamics").active();
        }
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("dynamics is active"), "{}", text);
        assert!(text.contains("role=\"dynamics\"") || text.contains("role=dynamics"), "{}", text);
    }

    #[test]
    fn test_activity_tracks_writes() {
        let dir = tempfile::tempdir().unwrap();
        let log = SharedLog::open(&dir.path().join("fleet.log")).unwrap();
        let activity = log.activity().unwrap();
        assert!(activity.last_activity().is_some());
        assert_eq!(activity.last_activity(), log.modified());
    }

    #[test]
    fn test_missing_directory_is_setup_error() {
        let err = SharedLog::open(Path::new("/nonexistent/dir/fleet.log")).unwrap_err();
        assert!(matches!(err, FleetError::Setup(_)));
    }
}
