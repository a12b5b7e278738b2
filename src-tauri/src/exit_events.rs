use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use tauri::{AppHandle, ExitRequestApi, Manager};

use crate::{
    append_shutdown_log, backend_supervisor::BackendSupervisor, DesktopState, TerminalState,
};

/// A code of `None` means the last window closed rather than an explicit exit.
pub(crate) fn should_keep_running_without_windows(code: Option<i32>) -> bool {
    cfg!(target_os = "macos") && code.is_none()
}

pub(crate) fn handle_main_window_closed(app_handle: &AppHandle) {
    let Some(state) = app_handle.try_state::<DesktopState>() else {
        return;
    };
    if state.is_shutting_down() {
        return;
    }
    append_shutdown_log(&format!(
        "main window closed, stopping backend (pid: {:?})",
        state.supervisor.pid()
    ));
    spawn_backend_stop(Arc::clone(&state.supervisor));
}

/// Stops the backend on a worker thread. Killing and port reclamation block.
fn spawn_backend_stop(supervisor: Arc<BackendSupervisor>) -> Option<JoinHandle<()>> {
    let worker = Arc::clone(&supervisor);
    let spawned = thread::Builder::new()
        .name("backend-stop".to_string())
        .spawn(move || worker.stop());
    match spawned {
        Ok(handle) => Some(handle),
        Err(error) => {
            append_shutdown_log(&format!(
                "failed to spawn backend stop thread: {error}, stopping inline"
            ));
            supervisor.stop();
            None
        }
    }
}

pub(crate) fn handle_exit_requested(app_handle: &AppHandle, code: Option<i32>, api: &ExitRequestApi) {
    if should_keep_running_without_windows(code) {
        append_shutdown_log("last window closed, keeping app alive");
        api.prevent_exit();
        return;
    }
    append_shutdown_log(&format!("exit requested with code {code:?}"));
    shutdown_app_state(app_handle);
}

pub(crate) fn handle_exit_event(app_handle: &AppHandle) {
    shutdown_app_state(app_handle);
    append_shutdown_log("desktop process exiting");
}

fn shutdown_app_state(app_handle: &AppHandle) {
    if let Some(state) = app_handle.try_state::<TerminalState>() {
        crate::desktop_bridge_commands::close_terminal_session(&state);
    }
    if let Some(state) = app_handle.try_state::<DesktopState>() {
        if state.shutdown() {
            append_shutdown_log("backend and resource watchers released");
        }
    }
}
