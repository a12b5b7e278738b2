use std::process::{Child, Command, Stdio};

use crate::{
    append_shutdown_log,
    runtime_paths::HostOs,
    soft_failure::SoftFailure,
};

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

/// Frees the backend port from whatever process still holds it.
pub(crate) trait PortReclaimer: Send + Sync {
    fn reclaim_port(&self, port: u16) -> Result<(), SoftFailure>;
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SystemPortReclaimer;

impl PortReclaimer for SystemPortReclaimer {
    fn reclaim_port(&self, port: u16) -> Result<(), SoftFailure> {
        let host = HostOs::current();
        let (program, args) = port_reclaim_command(host, port);
        append_shutdown_log(&format!(
            "reclaiming port {port}: {}",
            render_command_line(host, program, &args)
        ));
        let mut command = Command::new(program);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        // cmd.exe takes the script verbatim.
        #[cfg(target_os = "windows")]
        {
            for arg in &args {
                command.raw_arg(arg);
            }
            command.creation_flags(crate::CREATE_NO_WINDOW);
        }
        #[cfg(not(target_os = "windows"))]
        command.args(&args);

        let status = command.status().map_err(|error| SoftFailure::PortReclaim {
            port,
            detail: format!("failed to run {program}: {error}"),
        })?;
        if !status.success() {
            return Err(SoftFailure::PortReclaim {
                port,
                detail: format!("{program} exited with {status}"),
            });
        }

        append_shutdown_log(&format!("freed up port {port}"));
        Ok(())
    }
}

pub(crate) fn port_reclaim_command(host: HostOs, port: u16) -> (&'static str, Vec<String>) {
    match host {
        HostOs::Windows => (
            "cmd",
            vec![
                "/C".to_string(),
                format!(
                    "for /f \"tokens=5\" %a in ('netstat -nao ^| find \":{port}\"') do taskkill /F /PID %a"
                ),
            ],
        ),
        HostOs::MacOs | HostOs::Linux => (
            "sh",
            vec![
                "-c".to_string(),
                format!("pids=$(lsof -ti tcp:{port}); [ -z \"$pids\" ] || kill -9 $pids"),
            ],
        ),
    }
}

/// The command line as the target shell receives it. Windows arguments are passed raw.
pub(crate) fn render_command_line(host: HostOs, program: &str, args: &[String]) -> String {
    let rendered_args = match host {
        HostOs::Windows => args.to_vec(),
        HostOs::MacOs | HostOs::Linux => args
            .iter()
            .map(|arg| match shlex::try_quote(arg) {
                Ok(quoted) => quoted.into_owned(),
                Err(_) => arg.clone(),
            })
            .collect(),
    };
    std::iter::once(program.to_string())
        .chain(rendered_args)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Why `taskkill` did not end the process, if it did not.
#[cfg(any(target_os = "windows", test))]
fn taskkill_failure(status: std::io::Result<std::process::ExitStatus>) -> Option<String> {
    match status {
        Ok(status) if status.success() => None,
        Ok(status) => Some(format!("taskkill exited with {status}")),
        Err(error) => Some(format!("taskkill failed to run: {error}")),
    }
}

pub(crate) fn stop_child_process(child: &mut Child) -> Result<(), SoftFailure> {
    let pid = child.id();

    #[cfg(target_os = "windows")]
    {
        let status = Command::new("taskkill")
            .args(["/pid", &pid.to_string(), "/t", "/f"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .stdin(Stdio::null())
            .creation_flags(crate::CREATE_NO_WINDOW)
            .status();
        if let Some(reason) = taskkill_failure(status) {
            child.kill().map_err(|kill_error| SoftFailure::ProcessKill {
                pid,
                detail: format!("{reason}, kill failed ({kill_error})"),
            })?;
        }
    }

    #[cfg(not(target_os = "windows"))]
    child.kill().map_err(|error| SoftFailure::ProcessKill {
        pid,
        detail: error.to_string(),
    })?;

    child.wait().map_err(|error| SoftFailure::ProcessKill {
        pid,
        detail: format!("failed to reap process: {error}"),
    })?;
    Ok(())
}
