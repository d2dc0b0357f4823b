//! Custodia runtime primitives.
//!
//! This crate provides the small set of process-level services the Custodia
//! governance layer is built on:
//!
//! - **[`clock`]** -- [`Clock`] abstraction with a system clock and a
//!   [`ManualClock`] for deterministic retention tests.
//! - **[`session`]** -- the per-process [`SessionId`].
//! - **[`guard`]** -- [`InFlight`], an atomic reentrancy guard so a sweep never
//!   overlaps a previous invocation of itself.
//! - **[`scheduler`]** -- periodic job [`Scheduler`] driven by tokio timers with
//!   explicit start/stop and per-job overlap protection.
//! - **[`error`]** -- Unified kernel error types via [`thiserror`].
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.

pub mod clock;
pub mod error;
pub mod guard;
pub mod scheduler;
pub mod session;

// Re-export the most commonly used types at the crate root for convenience.
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{KernelError, Result};
pub use guard::{InFlight, InFlightGuard, OwnedInFlightGuard};
pub use scheduler::{JobFn, Scheduler, TaskId, TaskInfo, TaskStatus, job};
pub use session::SessionId;
