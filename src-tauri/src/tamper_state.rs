use std::{fs, io::ErrorKind, path::Path};

use serde::{Deserialize, Serialize};

use crate::{append_security_log, soft_failure::SoftFailure};

/// Two-strike record. Fields only ever flip from `false` to `true`; deleting the
/// file is the only reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct TamperState {
    pub(crate) warned_once: bool,
    pub(crate) deleted_once: bool,
}

impl TamperState {
    pub(crate) fn is_exhausted(self) -> bool {
        self.warned_once && self.deleted_once
    }
}

pub(crate) fn load_tamper_state(state_path: &Path) -> TamperState {
    let raw = match fs::read_to_string(state_path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == ErrorKind::NotFound => return TamperState::default(),
        Err(error) => {
            append_security_log(&format!(
                "failed to read tamper state {}: {}. using defaults",
                state_path.display(),
                error
            ));
            return TamperState::default();
        }
    };

    match serde_json::from_str::<TamperState>(&raw) {
        Ok(state) => state,
        Err(error) => {
            append_security_log(&format!(
                "failed to parse tamper state {}: {}. using defaults",
                state_path.display(),
                error
            ));
            TamperState::default()
        }
    }
}

pub(crate) fn save_tamper_state(state_path: &Path, state: TamperState) -> Result<(), SoftFailure> {
    let persist_error = |detail: String| SoftFailure::TamperStatePersist {
        path: state_path.to_path_buf(),
        detail,
    };

    if let Some(parent_dir) = state_path.parent() {
        fs::create_dir_all(parent_dir).map_err(|error| {
            persist_error(format!(
                "failed to create directory {}: {}",
                parent_dir.display(),
                error
            ))
        })?;
    }

    let serialized = serde_json::to_string_pretty(&state)
        .map_err(|error| persist_error(format!("failed to serialize: {error}")))?;
    fs::write(state_path, serialized).map_err(|error| persist_error(error.to_string()))?;
    Ok(())
}
