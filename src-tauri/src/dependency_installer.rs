use std::{
    path::Path,
    process::{Command, Output, Stdio},
};

use crate::{
    append_desktop_log, backend_errors::InstallError, runtime_paths::BackendPaths,
    soft_failure::{self, SoftFailure},
};

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

/// Prepares the interpreted backend's dependencies before launch.
pub(crate) trait DependencyInstaller: Send + Sync {
    fn install_requirements(&self, paths: &BackendPaths) -> Result<(), InstallError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct VenvInstaller;

impl VenvInstaller {
    pub(crate) fn ensure_virtual_env(&self, paths: &BackendPaths) -> Result<(), InstallError> {
        if paths.venv_root.exists() {
            append_desktop_log(&format!(
                "virtual environment already exists at: {}",
                paths.venv_root.display()
            ));
            return Ok(());
        }

        append_desktop_log(&format!(
            "creating virtual environment at: {}",
            paths.venv_root.display()
        ));
        let mut command = hidden_command(&paths.base_interpreter);
        command.arg("-m").arg("venv").arg(&paths.venv_root);
        if let Some(parent) = paths.venv_root.parent().filter(|parent| parent.is_dir()) {
            command.current_dir(parent);
        }

        let output = command.output().map_err(|source| InstallError::VenvSpawn {
            interpreter: paths.base_interpreter.clone(),
            source,
        })?;
        log_output("venv", &output);

        if output.status.success() {
            append_desktop_log("virtual environment created");
            Ok(())
        } else {
            Err(InstallError::VenvExit {
                code: output.status.code(),
            })
        }
    }

    fn run_pip_step(&self, step: &'static str, interpreter: &Path, cwd: &Path, pip_args: &[&str]) {
        let mut command = hidden_command(interpreter);
        command.arg("-m").arg("pip").args(pip_args).current_dir(cwd);

        let result = match command.output() {
            Ok(output) => {
                log_output(step, &output);
                if output.status.success() {
                    append_desktop_log(&format!("{step} finished"));
                    Ok(())
                } else {
                    Err(SoftFailure::DependencyStep {
                        step,
                        detail: format!("exit status {}", output.status),
                    })
                }
            }
            Err(error) => Err(SoftFailure::DependencyStep {
                step,
                detail: error.to_string(),
            }),
        };
        soft_failure::absorb(result);
    }
}

impl DependencyInstaller for VenvInstaller {
    /// Only venv creation can fail the launch. Pip steps are best-effort, a broken
    /// environment shows up as a failing backend instead.
    fn install_requirements(&self, paths: &BackendPaths) -> Result<(), InstallError> {
        self.ensure_virtual_env(paths)?;

        if !paths.requirements_file().is_file() {
            append_desktop_log("no requirements.txt found, skipping dependency installation");
            return Ok(());
        }

        let interpreter = paths.select_interpreter();
        self.run_pip_step(
            "pip upgrade",
            &interpreter,
            &paths.source_root,
            &["install", "--upgrade", "pip"],
        );
        self.run_pip_step(
            "pip install",
            &interpreter,
            &paths.source_root,
            &["install", "-r", crate::BACKEND_REQUIREMENTS_FILE],
        );
        Ok(())
    }
}

fn hidden_command<S: AsRef<std::ffi::OsStr>>(program: S) -> Command {
    let mut command = Command::new(program);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(target_os = "windows")]
    command.creation_flags(crate::CREATE_NO_WINDOW);
    command
}

fn log_output(step: &str, output: &Output) {
    for (stream, bytes) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
        let text = String::from_utf8_lossy(bytes);
        let text = text.trim();
        if !text.is_empty() {
            append_desktop_log(&format!("{step} {stream}: {text}"));
        }
    }
}
