//! Dronefield Environment Abstraction Layer
//!
//! This crate isolates the two things the fleet's control logic needs from
//! the outside world so that it can run against the real operating system
//! in production and against a deterministic model in tests:
//! - Time (`now()`, `sleep()`)
//! - Process signalling (`deliver()` a probe, shutdown or kill to a pid)
//!
//! # Example
//!
//! ```ignore
//! use dronefield_env::{FleetContext, ProcessControl, ControlSignal};
//!
//! async fn probe_loop<Ctx: FleetContext, Ctl: ProcessControl>(
//!     ctx: &Ctx,
//!     ctl: &Ctl,
//!     pids: &[WorkerPid],
//! ) {
//!     loop {
//!         ctx.sleep(Duration::from_secs(1)).await;
//!         for pid in pids {
//!             let _ = ctl.deliver(*pid, ControlSignal::Probe);
//!         }
//!     }
//! }
//! ```

mod context;
mod control;
mod error;
mod nix_impl;
mod sim;
mod tokio_impl;
mod types;

pub use context::FleetContext;
pub use control::ProcessControl;
pub use error::EnvError;
pub use nix_impl::NixProcessControl;
pub use sim::{SimContext, SimProcessControl};
pub use tokio_impl::TokioContext;
pub use types::{ControlSignal, WorkerPid};
