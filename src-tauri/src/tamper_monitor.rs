use std::{
    env, fs,
    path::{Component, Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{
    append_security_log,
    soft_failure::{self, SoftFailure},
    tamper_state::{self, TamperState},
};

const DEBUG_ARG_PREFIXES: [&str; 2] = ["--inspect", "--remote-debugging-port"];
const WEBVIEW_DEBUG_FLAGS: [&str; 3] = [
    "--remote-debugging-port",
    "--remote-debugging-pipe",
    "--auto-open-devtools-for-tabs",
];
const WEBVIEW2_ARGS_ENV: &str = "WEBVIEW2_ADDITIONAL_BROWSER_ARGUMENTS";
const INSPECTOR_ENVS: [&str; 2] = ["WEBKIT_INSPECTOR_SERVER", "WEBKIT_INSPECTOR_HTTP_SERVER"];
const INJECTION_ENVS: [&str; 2] = ["LD_PRELOAD", "DYLD_INSERT_LIBRARIES"];

pub(crate) const WARNING_TITLE: &str = "Warning";
pub(crate) const WARNING_MESSAGE: &str =
    "Tamper attempt detected. Further attempts will lock and remove app data.";
pub(crate) const VIOLATION_TITLE: &str = "Security violation";
pub(crate) const VIOLATION_MESSAGE: &str =
    "Repeated tampering detected. Sensitive files will be removed and the app will close.";

/// Snapshot of the runtime signals tamper detection looks at.
#[derive(Debug, Clone, Default)]
pub(crate) struct TamperProbe {
    pub(crate) packaged: bool,
    pub(crate) exe_path: Option<PathBuf>,
    pub(crate) args: Vec<String>,
    pub(crate) env: Vec<(String, String)>,
}

impl TamperProbe {
    pub(crate) fn capture() -> Self {
        let watched_envs = INSPECTOR_ENVS
            .iter()
            .chain(INJECTION_ENVS.iter())
            .chain(std::iter::once(&WEBVIEW2_ARGS_ENV));
        let env = watched_envs
            .filter_map(|key| env::var(key).ok().map(|value| (key.to_string(), value)))
            .collect();

        Self {
            packaged: !cfg!(debug_assertions),
            exe_path: env::current_exe().ok(),
            args: env::args().skip(1).collect(),
            env,
        }
    }

    fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }
}

fn is_cargo_build_output(exe_path: &Path) -> bool {
    let components: Vec<&std::ffi::OsStr> = exe_path
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    components
        .windows(2)
        .any(|pair| pair[0] == "target" && (pair[1] == "debug" || pair[1] == "release"))
}

/// A signal that cannot be resolved counts as absent; the other signals are still checked.
pub(crate) fn detect_tamper(probe: &TamperProbe) -> bool {
    if !probe.packaged {
        append_security_log("tamper signal: running an unpackaged build");
        return true;
    }
    if let Some(exe_path) = probe
        .exe_path
        .as_deref()
        .filter(|exe_path| is_cargo_build_output(exe_path))
    {
        append_security_log(&format!(
            "tamper signal: running from build output {}",
            exe_path.display()
        ));
        return true;
    }
    if let Some(arg) = probe
        .args
        .iter()
        .find(|arg| DEBUG_ARG_PREFIXES.iter().any(|prefix| arg.starts_with(prefix)))
    {
        append_security_log(&format!("tamper signal: debug launch argument {arg}"));
        return true;
    }
    if let Some(webview_args) = probe.env_value(WEBVIEW2_ARGS_ENV) {
        if WEBVIEW_DEBUG_FLAGS.iter().any(|flag| webview_args.contains(flag)) {
            append_security_log("tamper signal: webview debugging flags in environment");
            return true;
        }
    }
    if let Some(key) = INSPECTOR_ENVS
        .iter()
        .chain(INJECTION_ENVS.iter())
        .find(|key| probe.env_value(key).is_some())
    {
        append_security_log(&format!("tamper signal: {key} is set"));
        return true;
    }
    false
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TamperAction {
    Warn,
    Destroy,
    Ignore,
}

pub(crate) fn decide_tamper_action(state: TamperState) -> TamperAction {
    if state.is_exhausted() {
        return TamperAction::Ignore;
    }
    if state.warned_once {
        TamperAction::Destroy
    } else {
        TamperAction::Warn
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TamperOutcome {
    Handled,
    NotHandled,
}

/// What the tamper response needs from the running app.
pub(crate) trait TamperHost {
    fn show_warning(&self, title: &str, message: &str);
    fn show_violation(&self, title: &str, message: &str);
    fn stop_backend(&self);
    fn quit(&self);
}

pub(crate) struct TamperMonitor {
    state_path: PathBuf,
    sensitive_paths: Vec<PathBuf>,
    triggered: AtomicBool,
}

impl TamperMonitor {
    pub(crate) fn new(state_path: PathBuf, sensitive_paths: Vec<PathBuf>) -> Self {
        Self {
            state_path,
            sensitive_paths,
            triggered: AtomicBool::new(false),
        }
    }

    /// Runs the two-strike response. Only the first trigger in a process acts.
    pub(crate) fn handle_tamper_and_exit(&self, host: &dyn TamperHost) -> TamperOutcome {
        if self.triggered.swap(true, Ordering::AcqRel) {
            append_security_log("tamper response already running, trigger ignored");
            return TamperOutcome::NotHandled;
        }

        let mut state = tamper_state::load_tamper_state(&self.state_path);
        match decide_tamper_action(state) {
            TamperAction::Destroy => {
                append_security_log("repeated tampering, removing sensitive files");
                host.show_violation(VIOLATION_TITLE, VIOLATION_MESSAGE);
                let removed = delete_sensitive_paths(&self.sensitive_paths);
                append_security_log(&format!("removed {removed} sensitive path(s)"));
                state.deleted_once = true;
                self.persist(state);
                host.stop_backend();
                host.quit();
                TamperOutcome::Handled
            }
            TamperAction::Warn => {
                append_security_log("first tamper detection, warning user");
                state.warned_once = true;
                self.persist(state);
                host.show_warning(WARNING_TITLE, WARNING_MESSAGE);
                host.stop_backend();
                host.quit();
                TamperOutcome::Handled
            }
            TamperAction::Ignore => {
                append_security_log("tamper strikes exhausted, no further action");
                TamperOutcome::NotHandled
            }
        }
    }

    /// Startup variant: with strikes exhausted the app still exits, just without a dialog.
    pub(crate) fn handle_startup_detection(&self, host: &dyn TamperHost) -> TamperOutcome {
        let outcome = self.handle_tamper_and_exit(host);
        if outcome == TamperOutcome::NotHandled {
            host.quit();
        }
        outcome
    }

    fn persist(&self, state: TamperState) {
        soft_failure::absorb(tamper_state::save_tamper_state(&self.state_path, state));
    }
}

/// Missing paths are skipped. Returns how many were removed.
pub(crate) fn delete_sensitive_paths(paths: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in paths {
        let Ok(metadata) = fs::symlink_metadata(path) else {
            continue;
        };
        let result = if metadata.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(error) => soft_failure::report(SoftFailure::SensitiveCleanup {
                path: path.clone(),
                detail: error.to_string(),
            }),
        }
    }
    removed
}
