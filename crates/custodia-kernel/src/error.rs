//! Kernel error types.

use uuid::Uuid;

/// Unified error type for the Custodia runtime primitives.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // -- Scheduler errors ---------------------------------------------------
    #[error("no task with id {task_id}")]
    TaskNotFound { task_id: Uuid },

    /// Requested operation does not apply to the task's current status.
    #[error("task {task_id} cannot do that now: {reason}")]
    InvalidTaskState { task_id: Uuid, reason: String },

    /// A periodic task was scheduled with a zero interval.
    #[error("invalid interval for task `{name}`: interval must be non-zero")]
    InvalidInterval { name: String },

    /// Raised for any registration or start after `shutdown`.
    #[error("scheduler has been shut down")]
    SchedulerShutdown,
}

/// Result alias for kernel operations.
pub type Result<T> = std::result::Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = KernelError::InvalidInterval {
            name: "audit-flush".into(),
        };
        assert!(err.to_string().contains("audit-flush"));
        assert_eq!(KernelError::SchedulerShutdown.to_string(), "scheduler has been shut down");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KernelError>();
    }
}
