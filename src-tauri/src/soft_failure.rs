//! Best-effort failures.
//!
//! Dependency installation, port reclamation, tamper cleanup and similar steps are
//! allowed to fail without stopping the app. They all end up here, get logged once,
//! and are never propagated.

use std::path::PathBuf;

use thiserror::Error;

use crate::append_desktop_log;

#[derive(Debug, Error)]
pub(crate) enum SoftFailure {
    #[error("dependency step '{step}' failed: {detail}")]
    DependencyStep { step: &'static str, detail: String },

    #[error("failed to reclaim backend port {port}: {detail}")]
    PortReclaim { port: u16, detail: String },

    #[error("failed to stop backend process {pid}: {detail}")]
    ProcessKill { pid: u32, detail: String },

    #[error("failed to remove {}: {detail}", path.display())]
    SensitiveCleanup { path: PathBuf, detail: String },

    #[error("failed to persist tamper state {}: {detail}", path.display())]
    TamperStatePersist { path: PathBuf, detail: String },

    #[error("failed to watch {}: {detail}", path.display())]
    WatchSetup { path: PathBuf, detail: String },

    #[error("terminal session error: {0}")]
    Terminal(String),

    #[error("window operation '{action}' failed: {detail}")]
    Window { action: &'static str, detail: String },
}

pub(crate) fn report(failure: SoftFailure) {
    append_desktop_log(&format!("[soft-failure] {failure}"));
}

/// Logs the error of a best-effort step and discards it.
pub(crate) fn absorb<T>(result: Result<T, SoftFailure>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(failure) => {
            report(failure);
            None
        }
    }
}
