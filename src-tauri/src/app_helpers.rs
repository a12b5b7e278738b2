use std::sync::{Mutex, OnceLock};

use crate::{
    backend_readiness::OutputStream,
    logging::{self, DesktopLogCategory},
    runtime_paths, LaunchPlan, BACKEND_LOG_FILE, BACKEND_LOG_MAX_BYTES, DESKTOP_LOG_FILE,
    DESKTOP_LOG_MAX_BYTES, LOG_BACKUP_COUNT,
};

static DESKTOP_LOG_WRITE_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
static BACKEND_LOG_WRITE_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn append_desktop_log_with_category(category: DesktopLogCategory, message: &str) {
    logging::append_desktop_log(
        category,
        message,
        runtime_paths::default_packaged_root_dir(),
        DESKTOP_LOG_FILE,
        DESKTOP_LOG_MAX_BYTES,
        LOG_BACKUP_COUNT,
        &DESKTOP_LOG_WRITE_LOCK,
    );
}

pub(crate) fn append_desktop_log(message: &str) {
    append_desktop_log_with_category(DesktopLogCategory::Runtime, message);
}

pub(crate) fn append_startup_log(message: &str) {
    append_desktop_log_with_category(DesktopLogCategory::Startup, message);
}

pub(crate) fn append_shutdown_log(message: &str) {
    append_desktop_log_with_category(DesktopLogCategory::Shutdown, message);
}

pub(crate) fn append_security_log(message: &str) {
    append_desktop_log_with_category(DesktopLogCategory::Security, message);
}

/// Backend output goes to its own file so a chatty server cannot rotate the shell log away.
pub(crate) fn append_backend_log(stream: OutputStream, text: &str) {
    logging::append_desktop_log(
        DesktopLogCategory::Backend,
        &format!("[{}] {}", stream.as_str(), text),
        runtime_paths::default_packaged_root_dir(),
        BACKEND_LOG_FILE,
        BACKEND_LOG_MAX_BYTES,
        LOG_BACKUP_COUNT,
        &BACKEND_LOG_WRITE_LOCK,
    );
}

pub(crate) fn build_debug_command(plan: &LaunchPlan) -> Vec<String> {
    let mut parts = vec![plan.cmd.to_string_lossy().to_string()];
    parts.extend(plan.args.iter().cloned());
    parts
}
