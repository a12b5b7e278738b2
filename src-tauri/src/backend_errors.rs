use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum InstallError {
    #[error("failed to spawn virtual environment creation with {interpreter}: {source}")]
    VenvSpawn {
        interpreter: String,
        #[source]
        source: io::Error,
    },

    #[error("virtual environment creation failed with code {}", describe_code(.code))]
    VenvExit { code: Option<i32> },
}

#[derive(Debug, Error)]
pub(crate) enum BackendStartError {
    #[error("backend sources not found at: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("backend entry script not found at: {}", .0.display())]
    EntryScriptNotFound(PathBuf),

    #[error(transparent)]
    VirtualEnv(#[from] InstallError),

    #[error("invalid backend command override: {0}")]
    InvalidCommand(String),

    #[error("failed to spawn backend process {command:?}: {source}")]
    Spawn {
        command: Vec<String>,
        #[source]
        source: io::Error,
    },

    #[error("backend failed to start: exited with code {}", describe_code(.0))]
    ExitedBeforeReady(Option<i32>),

    #[error("backend start was cancelled by a stop request")]
    Cancelled,

    #[error("backend start is already in progress")]
    AlreadyStarting,
}

impl BackendStartError {
    pub(crate) fn is_not_found(&self) -> bool {
        matches!(self, Self::SourceNotFound(_) | Self::EntryScriptNotFound(_))
    }
}

fn describe_code(code: &Option<i32>) -> String {
    code.map(|value| value.to_string())
        .unwrap_or_else(|| "none (terminated by signal)".to_string())
}
