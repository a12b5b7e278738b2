use std::thread;

use tauri::{AppHandle, Manager};
use tauri_plugin_dialog::{DialogExt, MessageDialogButtons, MessageDialogKind};

use crate::{
    append_security_log,
    resource_watch,
    tamper_monitor::{TamperHost, TamperOutcome},
    DesktopState,
};

/// Tamper responses against the running app. Dialogs block, so never use it on the main thread.
pub(crate) struct AppTamperHost {
    app_handle: AppHandle,
}

impl AppTamperHost {
    pub(crate) fn new(app_handle: AppHandle) -> Self {
        Self { app_handle }
    }

    fn show_dialog(&self, kind: MessageDialogKind, title: &str, message: &str) {
        self.app_handle
            .dialog()
            .message(message)
            .title(title)
            .kind(kind)
            .buttons(MessageDialogButtons::Ok)
            .blocking_show();
    }
}

impl TamperHost for AppTamperHost {
    fn show_warning(&self, title: &str, message: &str) {
        self.show_dialog(MessageDialogKind::Warning, title, message);
    }

    fn show_violation(&self, title: &str, message: &str) {
        self.show_dialog(MessageDialogKind::Error, title, message);
    }

    fn stop_backend(&self) {
        if let Some(state) = self.app_handle.try_state::<DesktopState>() {
            state.supervisor.stop();
        }
    }

    fn quit(&self) {
        append_security_log("exiting after tamper response");
        self.app_handle.exit(0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TamperTrigger {
    Startup,
    Runtime,
}

pub(crate) fn spawn_tamper_response(app_handle: AppHandle, trigger: TamperTrigger) {
    let spawned = thread::Builder::new()
        .name("tamper-response".to_string())
        .spawn(move || run_tamper_response(&app_handle, trigger));
    if let Err(error) = spawned {
        append_security_log(&format!("failed to spawn tamper response: {error}"));
    }
}

fn run_tamper_response(app_handle: &AppHandle, trigger: TamperTrigger) {
    let Some(state) = app_handle.try_state::<DesktopState>() else {
        append_security_log("tamper response skipped: desktop state is not managed");
        return;
    };
    let host = AppTamperHost::new(app_handle.clone());
    let outcome = match trigger {
        TamperTrigger::Startup => state.tamper.handle_startup_detection(&host),
        TamperTrigger::Runtime => state.tamper.handle_tamper_and_exit(&host),
    };
    if outcome == TamperOutcome::NotHandled {
        append_security_log(&format!("tamper trigger ({trigger:?}) was not handled"));
    }
}

/// Starts watching the shipped resources. A change runs the tamper response on the
/// watcher's dispatcher thread.
pub(crate) fn start_tamper_watch(app_handle: &AppHandle) {
    let Some(state) = app_handle.try_state::<DesktopState>() else {
        return;
    };
    let handler_app = app_handle.clone();
    let watch_set = resource_watch::start_resource_watchers(&state.watch_targets, move || {
        run_tamper_response(&handler_app, TamperTrigger::Runtime);
    });
    append_security_log(&format!(
        "resource watch active on {} target(s)",
        watch_set.watcher_count()
    ));
    state.replace_watch_set(watch_set);
}
