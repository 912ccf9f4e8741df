//! Status telemetry over a named FIFO, and the inspector that reads it.

use dronefield_core::blackboard::StatusSink;
use dronefield_core::{FleetError, StatusRecord};
use nix::errno::Errno;
use nix::sys::stat::Mode;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::unix::pipe;
use tracing::{debug, info};

/// Creates the FIFO at `path` unless something already exists there.
pub fn ensure_fifo(path: &Path) -> Result<(), FleetError> {
    match nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o666)) {
        Ok(()) | Err(Errno::EEXIST) => Ok(()),
        Err(e) => Err(FleetError::setup(format!("cannot create FIFO {}: {}", path.display(), e))),
    }
}

/// Best-effort status publisher.
///
/// The FIFO is opened write-only and non-blocking for every record, so a
/// missing reader or a full pipe only drops that record.
pub struct FifoStatusSink {
    path: PathBuf,
    published: u64,
    dropped: u64,
}

impl FifoStatusSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            published: 0,
            dropped: 0,
        }
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn try_publish(&self, line: &str) -> std::io::Result<()> {
        let mut fifo = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)?;
        fifo.write_all(line.as_bytes())
    }
}

impl StatusSink for FifoStatusSink {
    fn publish(&mut self, record: &StatusRecord) {
        match self.try_publish(&record.to_line()) {
            Ok(()) => self.published += 1,
            Err(e) => {
                self.dropped += 1;
                debug!("Status record dropped: {}", e);
            }
        }
    }
}

/// One record as the inspector prints it.
pub fn describe(record: &StatusRecord) -> String {
    let key = record.key.map(|k| k.as_char().to_string()).unwrap_or_else(|| "-".to_string());
    format!(
        "force=({}, {}) position=({}, {}) velocity=({}, {}) key={}",
        record.force.x, record.force.y, record.position.x, record.position.y, record.velocity.x, record.velocity.y, key
    )
}

/// Prints every status record arriving on the FIFO.
///
/// The FIFO is opened read-write so the stream never ends between
/// writers; the caller stops the inspector by dropping this future.
pub async fn inspect<W: Write>(path: &Path, mut out: W) -> Result<(), FleetError> {
    ensure_fifo(path)?;
    let rx = pipe::OpenOptions::new().read_write(true).open_receiver(path)?;
    info!("Inspecting {}", path.display());

    let mut lines = BufReader::new(rx).lines();
    while let Some(line) = lines.next_line().await? {
        match StatusRecord::parse(&line) {
            Ok(record) => {
                writeln!(out, "{}", describe(&record))?;
                out.flush()?;
            }
            Err(e) => debug!("Skipping malformed status line {:?}: {}", line, e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dronefield_core::{Key, Position, Thrust};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn record() -> StatusRecord {
        StatusRecord {
            force: Thrust::new(1, -1),
            position: Position::new(51, 49),
            velocity: Position::new(1, -1),
            key: Some(Key::UpRight),
        }
    }

    #[test]
    fn test_ensure_fifo_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status");
        ensure_fifo(&path).unwrap();
        ensure_fifo(&path).unwrap();
        use std::os::unix::fs::FileTypeExt;
        assert!(std::fs::metadata(&path).unwrap().file_type().is_fifo());
    }

    #[test]
    fn test_publish_without_reader_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status");
        ensure_fifo(&path).unwrap();

        let mut sink = FifoStatusSink::new(&path);
        sink.publish(&record());
        assert_eq!(sink.published(), 0);
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn test_publish_to_missing_path_is_dropped() {
        let mut sink = FifoStatusSink::new("/nonexistent/dir/status");
        sink.publish(&record());
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn test_describe_labels_fields() {
        let text = describe(&record());
        assert_eq!(text, "force=(1, -1) position=(51, 49) velocity=(1, -1) key=r");

        let idle = StatusRecord { key: None, ..record() };
        assert!(describe(&idle).ends_with("key=-"));
    }

    /// Shared buffer the inspector can write into from another task.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_inspector_receives_published_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status");
        let captured = Captured::default();

        let reader_path = path.clone();
        let out = captured.clone();
        let inspector = tokio::spawn(async move { inspect(&reader_path, out).await });

        // Wait for the inspector to hold the FIFO open
        let mut sink = FifoStatusSink::new(&path);
        for _ in 0..100 {
            sink.publish(&record());
            if sink.published() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.published(), 1);

        for _ in 0..100 {
            if !captured.0.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        inspector.abort();

        let text = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.trim_end(), describe(&record()));
    }
}
