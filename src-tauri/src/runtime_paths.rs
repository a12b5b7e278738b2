use std::{
    env,
    path::{Path, PathBuf},
};

use crate::{
    startup_mode::RuntimeMode, BACKEND_ENTRY_SCRIPT, BACKEND_PREBUILT_DIR,
    BACKEND_REQUIREMENTS_FILE, BACKEND_SOURCE_DIR, COMPILED_BACKEND_DEV_DIR,
    COMPILED_BACKEND_NAME, COMPILED_BACKEND_PACKAGED_DIR, NEXIFY_ROOT_ENV, TAMPER_STATE_FALLBACK_FILE,
    TAMPER_STATE_FILE, VIRTUAL_ENV_DIR,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HostOs {
    Windows,
    MacOs,
    Linux,
}

impl HostOs {
    pub(crate) fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }

    pub(crate) fn executable_name(self, stem: &str) -> String {
        match self {
            Self::Windows => format!("{stem}.exe"),
            Self::MacOs | Self::Linux => stem.to_string(),
        }
    }

    pub(crate) fn base_interpreter(self) -> &'static str {
        match self {
            Self::Windows => "python",
            Self::MacOs | Self::Linux => "python3",
        }
    }
}

/// Filesystem layout of the backend for one launch.
///
/// Nothing here is checked for existence; callers decide what a missing path means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BackendPaths {
    pub(crate) source_root: PathBuf,
    pub(crate) compiled_backend: PathBuf,
    pub(crate) venv_root: PathBuf,
    pub(crate) venv_interpreter: PathBuf,
    pub(crate) base_interpreter: String,
}

impl BackendPaths {
    pub(crate) fn entry_script(&self) -> PathBuf {
        self.source_root.join(BACKEND_ENTRY_SCRIPT)
    }

    pub(crate) fn requirements_file(&self) -> PathBuf {
        self.source_root.join(BACKEND_REQUIREMENTS_FILE)
    }

    pub(crate) fn prebuilt_dir(&self) -> PathBuf {
        self.source_root.join(BACKEND_PREBUILT_DIR)
    }

    /// Venv interpreter when the venv has one, otherwise the system interpreter.
    pub(crate) fn select_interpreter(&self) -> PathBuf {
        if self.venv_interpreter.is_file() {
            self.venv_interpreter.clone()
        } else {
            PathBuf::from(&self.base_interpreter)
        }
    }
}

pub(crate) fn resolve_backend_paths(
    mode: RuntimeMode,
    host: HostOs,
    dev_root: &Path,
    resource_dir: &Path,
) -> BackendPaths {
    let root = match mode {
        RuntimeMode::Development => dev_root,
        RuntimeMode::Packaged => resource_dir,
    };
    let compiled_dir = match mode {
        RuntimeMode::Development => COMPILED_BACKEND_DEV_DIR,
        RuntimeMode::Packaged => COMPILED_BACKEND_PACKAGED_DIR,
    };
    let venv_root = root.join(VIRTUAL_ENV_DIR);
    let venv_interpreter = match host {
        HostOs::Windows => venv_root.join("Scripts").join("python.exe"),
        HostOs::MacOs | HostOs::Linux => venv_root.join("bin").join("python"),
    };

    BackendPaths {
        source_root: root.join(BACKEND_SOURCE_DIR),
        compiled_backend: root
            .join(compiled_dir)
            .join(host.executable_name(COMPILED_BACKEND_NAME)),
        venv_root,
        venv_interpreter,
        base_interpreter: host.base_interpreter().to_string(),
    }
}

pub(crate) fn workspace_root_dir() -> PathBuf {
    let candidate = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..");
    candidate
        .canonicalize()
        .unwrap_or_else(|_| candidate.to_path_buf())
}

pub(crate) fn default_packaged_root_dir() -> Option<PathBuf> {
    if let Ok(root) = env::var(NEXIFY_ROOT_ENV) {
        let path = PathBuf::from(root.trim());
        if !path.as_os_str().is_empty() {
            return Some(path);
        }
    }
    home::home_dir().map(|home| home.join(".nexify"))
}

pub(crate) fn tamper_state_path(app_data_dir: Option<&Path>) -> PathBuf {
    match app_data_dir {
        Some(dir) => dir.join(TAMPER_STATE_FILE),
        None => env::temp_dir().join(TAMPER_STATE_FALLBACK_FILE),
    }
}
