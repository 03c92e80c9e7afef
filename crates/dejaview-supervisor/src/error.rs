//! Supervisor errors.

#![allow(missing_docs)]

use std::time::Duration;

use smol_str::SmolStr;
use thiserror::Error;

use crate::process::ExitReport;

/// Errors raised while starting, running or configuring backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    /// No free port could be reserved for a backend.
    #[error("port allocation failed: {0}")]
    PortAllocation(SmolStr),

    /// The OS refused to create the backend process.
    #[error("failed to spawn '{program}': {reason}")]
    Spawn { program: SmolStr, reason: SmolStr },

    /// The backend exited before it reported readiness.
    #[error("backend exited before becoming ready ({0})")]
    PrematureExit(ExitReport),

    /// The backend exited after it had been ready.
    #[error("backend stopped unexpectedly ({0})")]
    PostReadyCrash(ExitReport),

    /// The backend did not report readiness in time.
    #[error("backend did not become ready within {}s", .0.as_secs())]
    StartupTimeout(Duration),

    /// A file watch could not be created.
    #[error("file watch failed: {0}")]
    Watch(SmolStr),

    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    InvalidConfig(SmolStr),

    /// Malformed client message.
    #[error("invalid client message: {0}")]
    InvalidMessage(SmolStr),

    /// The supervisor task is gone.
    #[error("supervisor stopped")]
    Stopped,
}

impl SupervisorError {
    /// Text shown to the user on the affected surfaces.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::PortAllocation(_) => {
                "Could not find an available port to start the backend service.".to_string()
            }
            Self::Spawn { reason, .. } => format!("Failed to start process: {reason}"),
            Self::PrematureExit(report) => format!(
                "Process exited unexpectedly with {report}. Check command path and file permissions."
            ),
            Self::PostReadyCrash(report) => format!(
                "The trace_processor_shell backend process stopped unexpectedly ({report}). You may need to reload the window."
            ),
            Self::StartupTimeout(timeout) => format!(
                "The trace_processor_shell backend did not become ready within {} seconds.",
                timeout.as_secs()
            ),
            other => other.to_string(),
        }
    }
}
