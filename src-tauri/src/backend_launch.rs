use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
};

use crate::{
    append_startup_log, backend_config::SupervisorConfig, backend_errors::BackendStartError,
    dependency_installer::DependencyInstaller, runtime_paths::BackendPaths, BackendKind,
    LaunchPlan, BACKEND_ENTRY_SCRIPT, BACKEND_HOST,
};

const PYTHONPATH_ENV: &str = "PYTHONPATH";

pub(crate) fn resolve_launch_plan(
    paths: &BackendPaths,
    config: &SupervisorConfig,
    installer: &dyn DependencyInstaller,
) -> Result<LaunchPlan, BackendStartError> {
    if let Some(custom_cmd) = config.command_override.as_deref() {
        return resolve_custom_launch(custom_cmd, config, paths);
    }

    if paths.compiled_backend.is_file() {
        append_startup_log(&format!(
            "using compiled backend: {}",
            paths.compiled_backend.display()
        ));
        return Ok(compiled_launch(paths, config.backend_port));
    }

    append_startup_log("compiled backend not found, falling back to python sources");
    if !paths.source_root.is_dir() {
        return Err(BackendStartError::SourceNotFound(paths.source_root.clone()));
    }
    let entry_script = paths.entry_script();
    if !entry_script.is_file() {
        return Err(BackendStartError::EntryScriptNotFound(entry_script));
    }

    installer.install_requirements(paths)?;
    Ok(interpreted_launch(
        paths,
        config.backend_port,
        env::var_os(PYTHONPATH_ENV),
    ))
}

fn resolve_custom_launch(
    custom_cmd: &str,
    config: &SupervisorConfig,
    paths: &BackendPaths,
) -> Result<LaunchPlan, BackendStartError> {
    let mut pieces = shlex::split(custom_cmd)
        .ok_or_else(|| BackendStartError::InvalidCommand(custom_cmd.to_string()))?;
    if pieces.is_empty() {
        return Err(BackendStartError::InvalidCommand(
            "command is empty".to_string(),
        ));
    }

    let cmd = pieces.remove(0);
    let cwd = config
        .command_override_cwd
        .clone()
        .or_else(|| Some(paths.source_root.clone()).filter(|root| root.is_dir()))
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    Ok(LaunchPlan {
        kind: BackendKind::Custom,
        cmd: PathBuf::from(cmd),
        args: pieces,
        cwd,
        env: Vec::new(),
    })
}

fn compiled_launch(paths: &BackendPaths, port: u16) -> LaunchPlan {
    let cwd = paths
        .compiled_backend
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    LaunchPlan {
        kind: BackendKind::Compiled,
        cmd: paths.compiled_backend.clone(),
        args: vec!["runserver".to_string(), format!("{BACKEND_HOST}:{port}")],
        cwd,
        env: Vec::new(),
    }
}

fn interpreted_launch(paths: &BackendPaths, port: u16, inherited_path: Option<OsString>) -> LaunchPlan {
    let mut env = Vec::new();
    let prebuilt_dir = paths.prebuilt_dir();
    if prebuilt_dir.is_dir() {
        append_startup_log(&format!("using prebuilt modules at: {}", prebuilt_dir.display()));
        env.push((
            PYTHONPATH_ENV.to_string(),
            build_python_path(&prebuilt_dir, inherited_path),
        ));
    }

    LaunchPlan {
        kind: BackendKind::Interpreted,
        cmd: paths.select_interpreter(),
        args: vec![
            BACKEND_ENTRY_SCRIPT.to_string(),
            "runserver".to_string(),
            port.to_string(),
        ],
        cwd: paths.source_root.clone(),
        env,
    }
}

fn build_python_path(prebuilt_dir: &Path, inherited: Option<OsString>) -> OsString {
    let mut entries = vec![prebuilt_dir.to_path_buf()];
    if let Some(inherited) = inherited.filter(|value| !value.is_empty()) {
        entries.extend(env::split_paths(&inherited));
    }
    env::join_paths(entries).unwrap_or_else(|_| prebuilt_dir.as_os_str().to_os_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend_errors::InstallError,
        runtime_paths::{resolve_backend_paths, HostOs},
        startup_mode::RuntimeMode,
    };
    use std::{
        fs,
        sync::atomic::{AtomicUsize, Ordering},
    };

    #[derive(Default)]
    struct CountingInstaller {
        calls: AtomicUsize,
    }

    impl DependencyInstaller for CountingInstaller {
        fn install_requirements(&self, _paths: &BackendPaths) -> Result<(), InstallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingInstaller;

    impl DependencyInstaller for FailingInstaller {
        fn install_requirements(&self, _paths: &BackendPaths) -> Result<(), InstallError> {
            Err(InstallError::VenvExit { code: Some(1) })
        }
    }

    fn paths_in(root: &Path) -> BackendPaths {
        resolve_backend_paths(RuntimeMode::Development, HostOs::current(), root, root)
    }

    #[test]
    fn compiled_backend_skips_sources_and_installer() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = paths_in(temp.path());
        fs::create_dir_all(paths.compiled_backend.parent().expect("parent")).expect("mkdir");
        fs::write(&paths.compiled_backend, b"binary").expect("write backend");
        let installer = CountingInstaller::default();

        let plan = resolve_launch_plan(&paths, &SupervisorConfig::default(), &installer)
            .expect("plan should resolve");

        assert_eq!(plan.kind, BackendKind::Compiled);
        assert_eq!(plan.cmd, paths.compiled_backend);
        assert_eq!(plan.args, vec!["runserver", "127.0.0.1:8000"]);
        assert_eq!(plan.cwd, temp.path().join("backend_build"));
        assert_eq!(installer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_sources_fail_fast() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = paths_in(temp.path());
        let installer = CountingInstaller::default();

        let error = resolve_launch_plan(&paths, &SupervisorConfig::default(), &installer)
            .expect_err("sources are missing");
        assert!(matches!(error, BackendStartError::SourceNotFound(_)));
        assert!(error.to_string().contains("not found"));
        assert_eq!(installer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_entry_script_fails_fast() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = paths_in(temp.path());
        fs::create_dir_all(&paths.source_root).expect("mkdir source");
        let installer = CountingInstaller::default();

        let error = resolve_launch_plan(&paths, &SupervisorConfig::default(), &installer)
            .expect_err("manage.py is missing");
        assert!(matches!(error, BackendStartError::EntryScriptNotFound(_)));
        assert_eq!(installer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn interpreted_launch_runs_installer_and_manage_py() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = paths_in(temp.path());
        fs::create_dir_all(&paths.source_root).expect("mkdir source");
        fs::write(paths.entry_script(), b"").expect("write manage.py");
        let installer = CountingInstaller::default();

        let plan = resolve_launch_plan(&paths, &SupervisorConfig::default(), &installer)
            .expect("plan should resolve");

        assert_eq!(plan.kind, BackendKind::Interpreted);
        assert_eq!(plan.cmd, PathBuf::from(&paths.base_interpreter));
        assert_eq!(plan.args, vec!["manage.py", "runserver", "8000"]);
        assert_eq!(plan.cwd, paths.source_root);
        assert!(plan.env.is_empty());
        assert_eq!(installer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn venv_failure_fails_the_launch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = paths_in(temp.path());
        fs::create_dir_all(&paths.source_root).expect("mkdir source");
        fs::write(paths.entry_script(), b"").expect("write manage.py");

        let error = resolve_launch_plan(&paths, &SupervisorConfig::default(), &FailingInstaller)
            .expect_err("venv failure propagates");
        assert!(matches!(error, BackendStartError::VirtualEnv(_)));
    }

    #[test]
    fn prebuilt_dir_is_prepended_to_python_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = paths_in(temp.path());
        fs::create_dir_all(paths.prebuilt_dir()).expect("mkdir build");

        let plan = interpreted_launch(&paths, 8000, Some(OsString::from("/opt/site")));
        let (key, value) = plan.env.first().expect("PYTHONPATH entry");
        assert_eq!(key, "PYTHONPATH");
        let entries: Vec<PathBuf> = env::split_paths(value).collect();
        assert_eq!(entries, vec![paths.prebuilt_dir(), PathBuf::from("/opt/site")]);
    }

    #[test]
    fn custom_command_is_split_like_a_shell() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = paths_in(temp.path());
        let config = SupervisorConfig {
            command_override: Some("uv run 'manage.py' runserver 8000".to_string()),
            command_override_cwd: Some(PathBuf::from("/srv/backend")),
            ..SupervisorConfig::default()
        };

        let plan = resolve_launch_plan(&paths, &config, &CountingInstaller::default())
            .expect("plan should resolve");
        assert_eq!(plan.kind, BackendKind::Custom);
        assert_eq!(plan.cmd, PathBuf::from("uv"));
        assert_eq!(plan.args, vec!["run", "manage.py", "runserver", "8000"]);
        assert_eq!(plan.cwd, PathBuf::from("/srv/backend"));
    }

    #[test]
    fn unbalanced_custom_command_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = SupervisorConfig {
            command_override: Some("python 'manage.py".to_string()),
            ..SupervisorConfig::default()
        };

        let error = resolve_launch_plan(
            &paths_in(temp.path()),
            &config,
            &CountingInstaller::default(),
        )
        .expect_err("quoting is unbalanced");
        assert!(matches!(error, BackendStartError::InvalidCommand(_)));
    }
}
