//! Control events delivered to a fleet process.
//!
//! Signals never run application code directly: tokio's signal driver
//! turns SIGUSR1 and SIGTERM into [`Control`] events on a channel, and
//! every main loop selects on that channel next to its real work.

use crate::logging::LogContext;
use std::future::Future;
use std::io;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

/// An external request to a fleet process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Liveness probe; answered by logging
    Probe,
    /// Leave the primary loop and exit
    Shutdown,
}

/// Receiving side of the control events.
pub struct ControlChannel {
    rx: mpsc::UnboundedReceiver<Control>,
}

impl ControlChannel {
    /// Registers SIGUSR1 and SIGTERM with the signal driver.
    ///
    /// Must be called from inside a tokio runtime. From this point on the
    /// default action of both signals (termination) no longer applies.
    pub fn install() -> io::Result<Self> {
        let mut probe = signal(SignalKind::user_defined1())?;
        let mut shutdown = signal(SignalKind::terminate())?;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let control = tokio::select! {
                    Some(()) = probe.recv() => Control::Probe,
                    Some(()) = shutdown.recv() => Control::Shutdown,
                    else => break,
                };
                if tx.send(control).is_err() {
                    break;
                }
            }
        });
        Ok(Self { rx })
    }

    /// A channel fed by hand instead of by signals.
    pub fn pair() -> (mpsc::UnboundedSender<Control>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Next control event. A closed channel reads as shutdown.
    pub async fn recv(&mut self) -> Control {
        self.rx.recv().await.unwrap_or(Control::Shutdown)
    }
}

/// Result of running work under control.
#[derive(Debug, PartialEq, Eq)]
pub enum Guarded<T> {
    Completed(T),
    Shutdown,
}

/// Drives `work` to completion while answering probes.
///
/// The work future is pinned outside the select, so a probe never cancels
/// a transfer in flight; only a shutdown abandons it.
pub async fn guarded<F: Future>(work: F, control: &mut ControlChannel, log: &LogContext) -> Guarded<F::Output> {
    tokio::pin!(work);
    loop {
        tokio::select! {
            output = &mut work => return Guarded::Completed(output),
            event = control.recv() => match event {
                Control::Probe => log.active(),
                Control::Shutdown => return Guarded::Shutdown,
            },
        }
    }
}

/// Answers probes until a shutdown arrives.
pub async fn idle_until_shutdown(control: &mut ControlChannel, log: &LogContext) {
    loop {
        match control.recv().await {
            Control::Probe => log.active(),
            Control::Shutdown => return,
        }
    }
}
