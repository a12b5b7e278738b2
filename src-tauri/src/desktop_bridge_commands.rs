use std::{
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
};

use serde::Deserialize;
use tauri::{AppHandle, Manager};
use url::Url;

use crate::{
    append_desktop_log, process_control,
    runtime_paths::HostOs,
    soft_failure::{self, SoftFailure},
    BridgeResult, DesktopState, TerminalState,
};

/// Terminal command from the page: a shell-style string or an argument list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub(crate) enum TerminalArgs {
    Line(String),
    List(Vec<String>),
}

fn parse_openable_url(raw_url: &str) -> Result<Url, String> {
    let trimmed = raw_url.trim();
    if trimmed.is_empty() {
        return Err("Missing external URL.".to_string());
    }

    let parsed = Url::parse(trimmed).map_err(|error| format!("Invalid URL: {error}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(format!(
            "Unsupported URL scheme '{scheme}', only http/https are allowed."
        )),
    }
}

#[cfg(target_os = "macos")]
pub(crate) fn open_url_with_system_browser(url: &str) -> Result<(), String> {
    Command::new("open")
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
        .map_err(|error| format!("Failed to run 'open': {error}"))
}

#[cfg(target_os = "windows")]
pub(crate) fn open_url_with_system_browser(url: &str) -> Result<(), String> {
    Command::new("rundll32")
        .args(["url.dll,FileProtocolHandler", url])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
        .map_err(|error| format!("Failed to run 'rundll32': {error}"))
}

#[cfg(all(unix, not(target_os = "macos")))]
pub(crate) fn open_url_with_system_browser(url: &str) -> Result<(), String> {
    Command::new("xdg-open")
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
        .map_err(|error| format!("Failed to run 'xdg-open': {error}"))
}

#[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
pub(crate) fn open_url_with_system_browser(_url: &str) -> Result<(), String> {
    Err("Opening external URLs is not supported on this platform.".to_string())
}

pub(crate) fn terminal_command_args(args: Option<TerminalArgs>) -> Result<Vec<String>, String> {
    match args {
        None => Ok(Vec::new()),
        Some(TerminalArgs::Line(line)) if line.trim().is_empty() => Ok(Vec::new()),
        Some(TerminalArgs::Line(line)) => {
            shlex::split(&line).ok_or_else(|| "Invalid terminal command quoting.".to_string())
        }
        Some(TerminalArgs::List(list)) => Ok(list
            .into_iter()
            .filter(|arg| !arg.is_empty())
            .collect()),
    }
}

fn applescript_quote(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Program and arguments that open a terminal window in `cwd`, optionally running `command`.
pub(crate) fn terminal_launch(
    host: HostOs,
    command: &[String],
    cwd: &Path,
) -> Result<(String, Vec<String>), String> {
    match host {
        HostOs::Windows => {
            let mut args: Vec<String> = ["/C", "start", "cmd"].map(str::to_string).to_vec();
            if !command.is_empty() {
                args.push("/K".to_string());
                args.extend(command.iter().cloned());
            }
            Ok(("cmd".to_string(), args))
        }
        HostOs::MacOs if command.is_empty() => Ok((
            "open".to_string(),
            vec![
                "-a".to_string(),
                "Terminal".to_string(),
                cwd.to_string_lossy().to_string(),
            ],
        )),
        HostOs::MacOs => {
            let joined = shlex::try_join(command.iter().map(String::as_str))
                .map_err(|error| format!("Invalid terminal command: {error}"))?;
            let cwd_quoted = shlex::try_quote(&cwd.to_string_lossy())
                .map_err(|error| format!("Invalid terminal directory: {error}"))?
                .to_string();
            let script = format!(
                "tell application \"Terminal\" to do script \"{}\"",
                applescript_quote(&format!("cd {cwd_quoted} && {joined}"))
            );
            Ok(("osascript".to_string(), vec!["-e".to_string(), script]))
        }
        HostOs::Linux => {
            let mut args = Vec::new();
            if !command.is_empty() {
                args.push("-e".to_string());
                args.extend(command.iter().cloned());
            }
            Ok(("x-terminal-emulator".to_string(), args))
        }
    }
}

fn end_session(mut child: Child) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    soft_failure::absorb(process_control::stop_child_process(&mut child));
}

/// Tracks `child` as the terminal session, ending any previous one.
pub(crate) fn replace_terminal_session(state: &TerminalState, child: Child) {
    let previous = match state.session.lock() {
        Ok(mut guard) => guard.replace(child),
        Err(error) => error.into_inner().replace(child),
    };
    if let Some(previous) = previous {
        append_desktop_log("replacing previous terminal session");
        end_session(previous);
    }
}

/// Returns whether a session was tracked.
pub(crate) fn close_terminal_session(state: &TerminalState) -> bool {
    let current = match state.session.lock() {
        Ok(mut guard) => guard.take(),
        Err(error) => error.into_inner().take(),
    };
    match current {
        Some(child) => {
            end_session(child);
            true
        }
        None => false,
    }
}

fn terminal_working_dir(app_handle: &AppHandle) -> PathBuf {
    app_handle
        .try_state::<DesktopState>()
        .map(|state| state.supervisor.paths().source_root.clone())
        .filter(|root| root.is_dir())
        .or_else(home::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn spawn_terminal(app_handle: &AppHandle, args: Option<TerminalArgs>) -> Result<Child, String> {
    let command = terminal_command_args(args)?;
    let cwd = terminal_working_dir(app_handle);
    let (program, program_args) = terminal_launch(HostOs::current(), &command, &cwd)?;
    append_desktop_log(&format!(
        "opening terminal: {program} {program_args:?} in {}",
        cwd.display()
    ));

    Command::new(&program)
        .args(&program_args)
        .current_dir(&cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|error| format!("Failed to run '{program}': {error}"))
}

#[tauri::command]
pub(crate) fn open_terminal(app_handle: AppHandle, args: Option<TerminalArgs>) -> BridgeResult {
    match spawn_terminal(&app_handle, args) {
        Ok(child) => {
            replace_terminal_session(&app_handle.state::<TerminalState>(), child);
            BridgeResult::ok()
        }
        Err(error) => {
            soft_failure::report(SoftFailure::Terminal(error.clone()));
            BridgeResult::failed(error)
        }
    }
}

#[tauri::command]
pub(crate) fn close_terminal(app_handle: AppHandle) -> BridgeResult {
    if !close_terminal_session(&app_handle.state::<TerminalState>()) {
        append_desktop_log("close_terminal: no terminal session is open");
    }
    BridgeResult::ok()
}

#[tauri::command]
pub(crate) fn open_external_url(url: String) -> BridgeResult {
    let parsed = match parse_openable_url(&url) {
        Ok(parsed) => parsed,
        Err(error) => return BridgeResult::failed(error),
    };

    match open_url_with_system_browser(parsed.as_ref()) {
        Ok(()) => BridgeResult::ok(),
        Err(error) => {
            append_desktop_log(&format!("failed to open external URL: {error}"));
            BridgeResult::failed(error)
        }
    }
}
