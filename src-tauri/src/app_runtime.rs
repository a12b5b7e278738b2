use std::path::PathBuf;

use tauri::{webview::PageLoadEvent, AppHandle, Manager, RunEvent, WindowEvent};

use crate::{
    append_desktop_log, append_security_log, append_startup_log,
    backend_config::{self, SupervisorConfig},
    backend_supervisor::BackendSupervisor,
    dependency_installer::VenvInstaller,
    desktop_bridge, exit_events, main_window,
    process_control::SystemPortReclaimer,
    runtime_paths::{self, HostOs},
    startup_mode::RuntimeMode,
    startup_task,
    tamper_host::{self, TamperTrigger},
    tamper_monitor::{self, TamperMonitor, TamperProbe},
    DesktopState, TerminalState, BACKEND_URL, DESKTOP_LOG_FILE, MAIN_WINDOW_LABEL,
};

fn build_desktop_state(app_handle: &AppHandle, mode: RuntimeMode) -> DesktopState {
    let workspace_root = runtime_paths::workspace_root_dir();
    let resource_dir = match app_handle.path().resource_dir() {
        Ok(dir) => dir,
        Err(error) => {
            append_startup_log(&format!(
                "failed to resolve resource directory: {error}. using workspace root"
            ));
            workspace_root.clone()
        }
    };
    let app_data_dir = match app_handle.path().app_data_dir() {
        Ok(dir) => Some(dir),
        Err(error) => {
            append_startup_log(&format!("failed to resolve app data directory: {error}"));
            None
        }
    };

    let paths =
        runtime_paths::resolve_backend_paths(mode, HostOs::current(), &workspace_root, &resource_dir);
    append_startup_log(&format!(
        "backend sources: {}, compiled backend: {}",
        paths.source_root.display(),
        paths.compiled_backend.display()
    ));

    let mut sensitive_paths = vec![paths.source_root.clone(), paths.venv_root.clone()];
    sensitive_paths.extend(app_data_dir.clone());
    let watch_targets: Vec<PathBuf> = vec![
        resource_dir,
        paths.source_root.clone(),
        paths.venv_root.clone(),
    ];
    let tamper = TamperMonitor::new(
        runtime_paths::tamper_state_path(app_data_dir.as_deref()),
        sensitive_paths,
    );
    let supervisor = BackendSupervisor::new(
        paths,
        SupervisorConfig::from_env(),
        Box::new(VenvInstaller),
        Box::new(SystemPortReclaimer),
    );

    DesktopState::new(
        mode,
        supervisor,
        tamper,
        watch_targets,
        backend_config::navigation_grace_from_env(),
    )
}

/// Packaged builds treat opened devtools as tampering.
fn guard_devtools(app_handle: &AppHandle) {
    let Some(state) = app_handle.try_state::<DesktopState>() else {
        return;
    };
    if state.mode.is_development() {
        return;
    }
    let Some(window) = app_handle.get_webview_window(MAIN_WINDOW_LABEL) else {
        return;
    };
    if main_window::close_devtools_if_open(&window) {
        append_security_log("devtools opened in packaged mode");
        tamper_host::spawn_tamper_response(app_handle.clone(), TamperTrigger::Runtime);
    }
}

fn open_main_window(app_handle: &AppHandle, mode: RuntimeMode) -> Result<(), String> {
    main_window::create_main_window(app_handle, !mode.is_development())?;
    startup_task::spawn_startup_task(app_handle.clone());
    Ok(())
}

#[cfg(target_os = "macos")]
fn reopen_main_window(app_handle: &AppHandle) {
    if app_handle.get_webview_window(MAIN_WINDOW_LABEL).is_some() {
        main_window::show_main_window(app_handle, append_desktop_log);
        return;
    }
    let Some(state) = app_handle.try_state::<DesktopState>() else {
        return;
    };
    if let Err(error) = open_main_window(app_handle, state.mode) {
        append_desktop_log(&format!("failed to reopen main window: {error}"));
    }
}

pub(crate) fn run() {
    let mode = RuntimeMode::detect();

    append_startup_log(&format!(
        "desktop process starting (development: {})",
        mode.is_development()
    ));
    append_startup_log(&format!(
        "desktop log path: {}",
        crate::logging::resolve_desktop_log_path(
            runtime_paths::default_packaged_root_dir(),
            DESKTOP_LOG_FILE,
        )
        .display()
    ));
    tauri::Builder::default()
        .plugin(tauri_plugin_single_instance::init(|app_handle, _args, _cwd| {
            append_desktop_log("second instance launched, focusing main window");
            main_window::show_main_window(app_handle, append_desktop_log);
        }))
        .plugin(tauri_plugin_dialog::init())
        .manage(TerminalState::default())
        .invoke_handler(tauri::generate_handler![
            crate::desktop_bridge_commands::open_terminal,
            crate::desktop_bridge_commands::close_terminal,
            crate::desktop_bridge_commands::open_external_url,
        ])
        .on_window_event(|window, event| {
            if window.label() != MAIN_WINDOW_LABEL {
                return;
            }

            match event {
                WindowEvent::Destroyed => {
                    exit_events::handle_main_window_closed(window.app_handle());
                }
                WindowEvent::Focused(true) => guard_devtools(window.app_handle()),
                _ => {}
            }
        })
        .on_page_load(|webview, payload| match payload.event() {
            PageLoadEvent::Started => {
                append_desktop_log(&format!("page-load started: {}", payload.url()));
                if desktop_bridge::should_inject_desktop_bridge(BACKEND_URL, payload.url()) {
                    desktop_bridge::inject_desktop_bridge(webview);
                }
            }
            PageLoadEvent::Finished => {
                append_desktop_log(&format!("page-load finished: {}", payload.url()));
                if desktop_bridge::should_inject_desktop_bridge(BACKEND_URL, payload.url()) {
                    desktop_bridge::inject_desktop_bridge(webview);
                }
                guard_devtools(webview.app_handle());
            }
        })
        .setup(move |app| {
            let app_handle = app.handle().clone();
            app.manage(build_desktop_state(&app_handle, mode));

            if !mode.is_development() && tamper_monitor::detect_tamper(&TamperProbe::capture()) {
                append_security_log("tamper detected at startup, main window suppressed");
                tamper_host::spawn_tamper_response(app_handle, TamperTrigger::Startup);
                return Ok(());
            }

            open_main_window(&app_handle, mode)?;
            Ok(())
        })
        .build(tauri::generate_context!())
        .expect("error while building tauri application")
        .run(|app_handle, event| match event {
            RunEvent::ExitRequested { code, api, .. } => {
                exit_events::handle_exit_requested(app_handle, code, &api);
            }
            RunEvent::Exit => {
                exit_events::handle_exit_event(app_handle);
            }
            #[cfg(target_os = "macos")]
            RunEvent::Reopen {
                has_visible_windows,
                ..
            } => {
                if !has_visible_windows {
                    reopen_main_window(app_handle);
                }
            }
            _ => {}
        });
}
