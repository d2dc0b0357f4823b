//! Custodia runtime.
//!
//! Wires the vault, audit trail, privacy governor and credential authority
//! into one process-level container and drives their periodic jobs.
//!
//! # Modules
//!
//! - [`config`] — TOML configuration with `.env` and environment overrides.
//! - [`telemetry`] — tracing subscriber setup.
//! - [`runtime`] — the [`Runtime`] container and its scheduled jobs.
//! - [`error`] — Unified error types.

pub mod config;
pub mod error;
pub mod runtime;
pub mod telemetry;

// Re-export the most commonly used types at the crate root for convenience.
pub use config::{CustodiaConfig, LoggingConfig, SchedulerConfig, StorageBackend, VaultConfig};
pub use error::{Result, RuntimeError};
pub use runtime::{AUDIT_CLEANUP_TASK, AUDIT_FLUSH_TASK, PRIVACY_SWEEP_TASK, Runtime};
pub use telemetry::init_tracing;
