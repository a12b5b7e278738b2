use std::{
    ffi::OsString,
    path::PathBuf,
    process::Child,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::{
    backend_supervisor::BackendSupervisor, resource_watch::ResourceWatchSet,
    startup_mode::RuntimeMode, tamper_monitor::TamperMonitor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BackendKind {
    Compiled,
    Interpreted,
    Custom,
}

impl BackendKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Compiled => "compiled",
            Self::Interpreted => "interpreted",
            Self::Custom => "custom",
        }
    }
}

/// Resolved launch configuration. Built fresh for every start.
#[derive(Debug, Clone)]
pub(crate) struct LaunchPlan {
    pub(crate) kind: BackendKind,
    pub(crate) cmd: PathBuf,
    pub(crate) args: Vec<String>,
    pub(crate) cwd: PathBuf,
    pub(crate) env: Vec<(String, OsString)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SupervisorState {
    NotStarted,
    Starting,
    Ready,
    Failed,
}

#[derive(Debug, serde::Serialize)]
pub(crate) struct BridgeResult {
    pub(crate) ok: bool,
    pub(crate) reason: Option<String>,
}

impl BridgeResult {
    pub(crate) fn ok() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    pub(crate) fn failed(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

/// App-wide state, managed once the resource paths are known.
pub(crate) struct DesktopState {
    pub(crate) mode: RuntimeMode,
    pub(crate) supervisor: Arc<BackendSupervisor>,
    pub(crate) tamper: Arc<TamperMonitor>,
    pub(crate) watch_targets: Vec<PathBuf>,
    pub(crate) navigation_grace: Duration,
    watch_set: Mutex<Option<ResourceWatchSet>>,
    is_shutting_down: AtomicBool,
}

impl DesktopState {
    pub(crate) fn new(
        mode: RuntimeMode,
        supervisor: BackendSupervisor,
        tamper: TamperMonitor,
        watch_targets: Vec<PathBuf>,
        navigation_grace: Duration,
    ) -> Self {
        Self {
            mode,
            supervisor: Arc::new(supervisor),
            tamper: Arc::new(tamper),
            watch_targets,
            navigation_grace,
            watch_set: Mutex::new(None),
            is_shutting_down: AtomicBool::new(false),
        }
    }

    pub(crate) fn replace_watch_set(&self, watch_set: ResourceWatchSet) {
        let previous = match self.watch_set.lock() {
            Ok(mut guard) => guard.replace(watch_set),
            Err(error) => error.into_inner().replace(watch_set),
        };
        if let Some(previous) = previous {
            previous.close();
        }
    }

    pub(crate) fn close_resource_watch(&self) {
        let current = match self.watch_set.lock() {
            Ok(mut guard) => guard.take(),
            Err(error) => error.into_inner().take(),
        };
        if let Some(watch_set) = current {
            watch_set.close();
        }
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::Acquire)
    }

    /// Closes watchers and disposes the backend. Runs once per process.
    pub(crate) fn shutdown(&self) -> bool {
        if self.is_shutting_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.close_resource_watch();
        self.supervisor.dispose();
        true
    }
}

#[derive(Debug, Default)]
pub(crate) struct TerminalState {
    pub(crate) session: Mutex<Option<Child>>,
}

pub(crate) struct AtomicFlagGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> AtomicFlagGuard<'a> {
    pub(crate) fn try_set(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Self { flag })
    }
}

impl Drop for AtomicFlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::{AtomicFlagGuard, BridgeResult};

    #[test]
    fn atomic_flag_guard_try_set_rejects_double_set_until_drop() {
        let flag = AtomicBool::new(false);

        let guard = AtomicFlagGuard::try_set(&flag).expect("first set should succeed");
        assert!(flag.load(Ordering::Acquire));
        assert!(AtomicFlagGuard::try_set(&flag).is_none());

        drop(guard);
        assert!(!flag.load(Ordering::Acquire));
        assert!(AtomicFlagGuard::try_set(&flag).is_some());
    }

    #[test]
    fn bridge_result_serializes_reason() {
        let value = serde_json::to_value(BridgeResult::failed("no terminal")).expect("serialize");
        assert_eq!(value["ok"], false);
        assert_eq!(value["reason"], "no terminal");
        assert!(serde_json::to_value(BridgeResult::ok()).expect("serialize")["reason"].is_null());
    }
}
