use std::{sync::Arc, thread, time::Duration};

use tauri::{AppHandle, Manager};

use crate::{
    append_startup_log, backend_errors::BackendStartError, backend_supervisor::BackendSupervisor,
    main_window::MainWindowView, tamper_host, DesktopState, SupervisorState,
};

/// The window as seen by the startup flow.
pub(crate) trait StartupView {
    fn show_error(&self, reason: &str) -> Result<(), String>;
    fn navigate_to_backend(&self) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartupOutcome {
    Navigated,
    BackendFailed,
    Cancelled,
}

/// Starts the backend and moves the window off the loading page. Navigation only
/// happens after the start resolved and the grace period passed.
pub(crate) fn run_startup<F>(
    supervisor: &BackendSupervisor,
    view: &dyn StartupView,
    navigation_grace: Duration,
    log: F,
) -> StartupOutcome
where
    F: Fn(&str),
{
    match supervisor.start() {
        Ok(()) => {
            log(&format!(
                "backend ready, navigating in {} ms",
                navigation_grace.as_millis()
            ));
            thread::sleep(navigation_grace);
            if supervisor.state() != SupervisorState::Ready {
                log("backend stopped during navigation grace period");
                return StartupOutcome::Cancelled;
            }
            if let Err(error) = view.navigate_to_backend() {
                log(&format!("failed to navigate to backend: {error}"));
            }
            StartupOutcome::Navigated
        }
        Err(BackendStartError::Cancelled) => {
            log("backend start cancelled before readiness");
            StartupOutcome::Cancelled
        }
        Err(error) => {
            log(&format!("backend failed to start: {error}"));
            if let Err(view_error) = view.show_error(&error.to_string()) {
                log(&format!("failed to show error page: {view_error}"));
            }
            StartupOutcome::BackendFailed
        }
    }
}

pub(crate) fn spawn_startup_task(app_handle: AppHandle) {
    let Some(state) = app_handle.try_state::<DesktopState>() else {
        append_startup_log("startup task skipped: desktop state is not managed");
        return;
    };
    let supervisor = Arc::clone(&state.supervisor);
    let navigation_grace = state.navigation_grace;
    let watch_after_start = !state.mode.is_development();

    let spawned = thread::Builder::new()
        .name("backend-startup".to_string())
        .spawn(move || {
            let view = MainWindowView::new(app_handle.clone());
            let outcome = run_startup(&supervisor, &view, navigation_grace, append_startup_log);
            append_startup_log(&format!("startup finished: {outcome:?}"));
            if watch_after_start && outcome != StartupOutcome::Cancelled {
                tamper_host::start_tamper_watch(&app_handle);
            }
        });
    if let Err(error) = spawned {
        append_startup_log(&format!("failed to spawn startup task: {error}"));
    }
}
