#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod app_constants;
mod app_helpers;
mod app_runtime;
mod app_types;
mod backend_config;
mod backend_errors;
mod backend_launch;
mod backend_readiness;
mod backend_supervisor;
mod dependency_installer;
mod desktop_bridge;
mod desktop_bridge_commands;
mod exit_events;
mod logging;
mod main_window;
mod process_control;
mod resource_watch;
mod runtime_paths;
mod soft_failure;
mod startup_mode;
mod startup_task;
mod tamper_host;
mod tamper_monitor;
mod tamper_state;

pub(crate) use app_constants::*;
pub(crate) use app_helpers::{
    append_backend_log, append_desktop_log, append_security_log, append_shutdown_log,
    append_startup_log, build_debug_command,
};
pub(crate) use app_types::{
    AtomicFlagGuard, BackendKind, BridgeResult, DesktopState, LaunchPlan, SupervisorState,
    TerminalState,
};

fn main() {
    app_runtime::run();
}
