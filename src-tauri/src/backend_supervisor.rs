use std::{
    io::{ErrorKind, Read},
    process::{Child, Command, Stdio},
    sync::{
        atomic::AtomicBool,
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Mutex, MutexGuard,
    },
    thread,
    time::{Duration, Instant},
};

use crate::{
    append_backend_log, append_shutdown_log, append_startup_log,
    backend_config::SupervisorConfig,
    backend_errors::BackendStartError,
    backend_launch,
    backend_readiness::{
        BackendEvent, MarkerWindow, OutputStream, ReadinessDecision, ReadinessReason,
        ReadinessTracker,
    },
    build_debug_command,
    dependency_installer::DependencyInstaller,
    process_control::{self, PortReclaimer},
    runtime_paths::BackendPaths,
    soft_failure,
    AtomicFlagGuard, LaunchPlan, SupervisorState, BACKEND_EXIT_POLL_INTERVAL,
};

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

const EXIT_DRAIN_WINDOW: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct BackendProcess {
    child: Child,
    pid: u32,
    ready: bool,
}

/// Owns the single backend subprocess and its start/stop lifecycle.
pub(crate) struct BackendSupervisor {
    paths: BackendPaths,
    config: SupervisorConfig,
    installer: Box<dyn DependencyInstaller>,
    reclaimer: Box<dyn PortReclaimer>,
    process: Mutex<Option<BackendProcess>>,
    state: Mutex<SupervisorState>,
    pending_start: Mutex<Option<Sender<BackendEvent>>>,
    is_starting: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(error) => error.into_inner(),
    }
}

impl BackendSupervisor {
    pub(crate) fn new(
        paths: BackendPaths,
        config: SupervisorConfig,
        installer: Box<dyn DependencyInstaller>,
        reclaimer: Box<dyn PortReclaimer>,
    ) -> Self {
        Self {
            paths,
            config,
            installer,
            reclaimer,
            process: Mutex::new(None),
            state: Mutex::new(SupervisorState::NotStarted),
            pending_start: Mutex::new(None),
            is_starting: AtomicBool::new(false),
        }
    }

    pub(crate) fn paths(&self) -> &BackendPaths {
        &self.paths
    }

    pub(crate) fn state(&self) -> SupervisorState {
        *lock(&self.state)
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        lock(&self.process).as_ref().map(|process| process.pid)
    }

    /// Blocks until the backend is ready, has failed, or the readiness timeout
    /// elapsed. Call it off the UI thread.
    pub(crate) fn start(&self) -> Result<(), BackendStartError> {
        self.run_start(|| {
            backend_launch::resolve_launch_plan(&self.paths, &self.config, self.installer.as_ref())
        })
    }

    #[cfg(test)]
    pub(crate) fn start_with_plan(&self, plan: LaunchPlan) -> Result<(), BackendStartError> {
        self.run_start(move || Ok(plan))
    }

    fn run_start<F>(&self, plan_source: F) -> Result<(), BackendStartError>
    where
        F: FnOnce() -> Result<LaunchPlan, BackendStartError>,
    {
        let Some(_starting) = AtomicFlagGuard::try_set(&self.is_starting) else {
            return Err(BackendStartError::AlreadyStarting);
        };
        if self.state() == SupervisorState::Ready && self.is_running() {
            append_startup_log("backend already running, start skipped");
            return Ok(());
        }

        let (event_tx, event_rx) = mpsc::channel();
        *lock(&self.pending_start) = Some(event_tx.clone());
        *lock(&self.state) = SupervisorState::Starting;

        let outcome = self.launch_and_wait(plan_source, event_tx, event_rx);
        lock(&self.pending_start).take();

        let mut state = lock(&self.state);
        match outcome {
            Ok(reason) if *state == SupervisorState::Starting => {
                *state = SupervisorState::Ready;
                if let Some(process) = lock(&self.process).as_mut() {
                    process.ready = true;
                }
                match reason {
                    ReadinessReason::Marker => append_startup_log("backend reported readiness"),
                    ReadinessReason::Timeout => {
                        append_startup_log("no readiness signal before timeout, assuming backend started")
                    }
                }
                Ok(())
            }
            Ok(_) | Err(BackendStartError::Cancelled) => {
                drop(state);
                self.release_process();
                append_startup_log("backend start cancelled");
                Err(BackendStartError::Cancelled)
            }
            Err(error) => {
                *state = SupervisorState::Failed;
                drop(state);
                self.release_process();
                append_startup_log(&format!("backend start failed: {error}"));
                Err(error)
            }
        }
    }

    fn launch_and_wait<F>(
        &self,
        plan_source: F,
        event_tx: Sender<BackendEvent>,
        event_rx: Receiver<BackendEvent>,
    ) -> Result<ReadinessReason, BackendStartError>
    where
        F: FnOnce() -> Result<LaunchPlan, BackendStartError>,
    {
        let plan = plan_source()?;
        if let Ok(BackendEvent::Cancelled) = event_rx.try_recv() {
            return Err(BackendStartError::Cancelled);
        }

        append_startup_log(&format!(
            "starting {} backend: {:?} in {}",
            plan.kind.as_str(),
            build_debug_command(&plan),
            plan.cwd.display()
        ));
        let mut command = Command::new(&plan.cmd);
        command
            .args(&plan.args)
            .current_dir(&plan.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("PYTHONUNBUFFERED", "1");
        for (key, value) in &plan.env {
            command.env(key, value);
        }
        #[cfg(target_os = "windows")]
        command.creation_flags(crate::CREATE_NO_WINDOW);

        let mut child = command.spawn().map_err(|source| BackendStartError::Spawn {
            command: build_debug_command(&plan),
            source,
        })?;
        let pid = child.id();
        if let Some(stdout) = child.stdout.take() {
            spawn_output_forwarder(OutputStream::Stdout, stdout, event_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_output_forwarder(OutputStream::Stderr, stderr, event_tx.clone());
        }
        drop(event_tx);

        *lock(&self.process) = Some(BackendProcess {
            child,
            pid,
            ready: false,
        });
        append_startup_log(&format!("backend process spawned with pid {pid}"));

        self.await_readiness(&event_rx)
    }

    fn await_readiness(
        &self,
        event_rx: &Receiver<BackendEvent>,
    ) -> Result<ReadinessReason, BackendStartError> {
        let deadline = Instant::now() + self.config.ready_timeout;
        let mut tracker = ReadinessTracker::new();

        loop {
            let now = Instant::now();
            let event = if now >= deadline {
                BackendEvent::TimedOut
            } else {
                let wait = (deadline - now).min(BACKEND_EXIT_POLL_INTERVAL);
                match event_rx.recv_timeout(wait) {
                    Ok(event) => event,
                    Err(timeout_or_disconnect) => match self.poll_exit() {
                        Some(code) => {
                            if let Some(decision) = drain_remaining_output(event_rx, &mut tracker) {
                                return decision;
                            }
                            BackendEvent::Exited(code)
                        }
                        None => {
                            if timeout_or_disconnect == RecvTimeoutError::Disconnected {
                                thread::sleep(wait);
                            }
                            continue;
                        }
                    },
                }
            };

            match tracker.on_event(event) {
                ReadinessDecision::Pending | ReadinessDecision::Settled => {}
                ReadinessDecision::Ready(reason) => return Ok(reason),
                ReadinessDecision::Failed(error) => return Err(error),
            }
        }
    }

    /// `Some(code)` once the process has exited.
    fn poll_exit(&self) -> Option<Option<i32>> {
        let mut guard = lock(&self.process);
        let process = guard.as_mut()?;
        match process.child.try_wait() {
            Ok(Some(status)) => {
                append_startup_log(&format!("backend process exited with {status}"));
                Some(status.code())
            }
            Ok(None) => None,
            Err(error) => {
                append_startup_log(&format!("failed to poll backend process status: {error}"));
                None
            }
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        let mut guard = lock(&self.process);
        let Some(process) = guard.as_mut() else {
            return false;
        };
        match process.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                log_backend_exit(process.pid, process.ready, &status.to_string());
                guard.take();
                drop(guard);
                *lock(&self.state) = SupervisorState::NotStarted;
                false
            }
            Err(error) => {
                append_startup_log(&format!("failed to poll backend process status: {error}"));
                true
            }
        }
    }

    fn release_process(&self) {
        let Some(mut process) = lock(&self.process).take() else {
            return;
        };
        if let Ok(Some(_)) = process.child.try_wait() {
            return;
        }
        soft_failure::absorb(process_control::stop_child_process(&mut process.child));
    }

    /// Kills the backend if it is running, then frees the backend port regardless.
    /// A start still waiting for readiness is rejected as cancelled.
    pub(crate) fn stop(&self) {
        if let Some(pending) = lock(&self.pending_start).take() {
            append_shutdown_log("cancelling pending backend start");
            let _ = pending.send(BackendEvent::Cancelled);
        }

        match lock(&self.process).take() {
            Some(mut process) => match process.child.try_wait() {
                Ok(Some(status)) => {
                    append_shutdown_log(&format!(
                        "backend process {} already exited with {status}",
                        process.pid
                    ));
                }
                _ => {
                    append_shutdown_log(&format!("killing backend process {}", process.pid));
                    soft_failure::absorb(process_control::stop_child_process(&mut process.child));
                }
            },
            None => append_shutdown_log("no backend process is running"),
        }

        soft_failure::absorb(self.reclaimer.reclaim_port(self.config.backend_port));
        *lock(&self.state) = SupervisorState::NotStarted;
    }

    pub(crate) fn dispose(&self) {
        self.stop();
        append_shutdown_log("backend supervisor disposed");
    }
}

fn log_backend_exit(pid: u32, ready: bool, status: &str) {
    append_startup_log(&format!(
        "backend process {pid} exited with {status} (ready: {ready})"
    ));
}

fn drain_remaining_output(
    event_rx: &Receiver<BackendEvent>,
    tracker: &mut ReadinessTracker,
) -> Option<Result<ReadinessReason, BackendStartError>> {
    while let Ok(event) = event_rx.recv_timeout(EXIT_DRAIN_WINDOW) {
        match tracker.on_event(event) {
            ReadinessDecision::Ready(reason) => return Some(Ok(reason)),
            ReadinessDecision::Failed(error) => return Some(Err(error)),
            ReadinessDecision::Pending | ReadinessDecision::Settled => {}
        }
    }
    None
}

fn spawn_output_forwarder<R>(stream: OutputStream, reader: R, event_tx: Sender<BackendEvent>)
where
    R: Read + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name(format!("backend-{}", stream.as_str()))
        .spawn(move || forward_output(stream, reader, event_tx));
    if let Err(error) = spawned {
        append_startup_log(&format!(
            "failed to start {} reader for backend: {error}",
            stream.as_str()
        ));
    }
}

const OUTPUT_CHUNK_SIZE: usize = 4096;

/// Chunks go to the readiness loop as soon as they are read; complete lines go to the log.
fn forward_output<R: Read>(stream: OutputStream, mut reader: R, event_tx: Sender<BackendEvent>) {
    let mut buffer = [0u8; OUTPUT_CHUNK_SIZE];
    let mut pending_line = Vec::new();
    let mut window = MarkerWindow::new();
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => {
                let chunk = &buffer[..read];
                pending_line.extend_from_slice(chunk);
                while let Some(newline) = pending_line.iter().position(|byte| *byte == b'\n') {
                    let line: Vec<u8> = pending_line.drain(..=newline).collect();
                    append_backend_log(stream, &String::from_utf8_lossy(&line));
                }
                let text = window.scan_text(&String::from_utf8_lossy(chunk));
                // The receiver is gone once the start resolved; output is still logged.
                let _ = event_tx.send(BackendEvent::Output { stream, text });
            }
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    if !pending_line.is_empty() {
        append_backend_log(stream, &String::from_utf8_lossy(&pending_line));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{
        backend_errors::InstallError,
        runtime_paths::{resolve_backend_paths, HostOs},
        soft_failure::SoftFailure,
        startup_mode::RuntimeMode,
        BackendKind,
    };
    use std::{
        path::{Path, PathBuf},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    struct NoopInstaller;

    impl DependencyInstaller for NoopInstaller {
        fn install_requirements(&self, _paths: &BackendPaths) -> Result<(), InstallError> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingReclaimer {
        calls: Arc<AtomicUsize>,
    }

    impl PortReclaimer for RecordingReclaimer {
        fn reclaim_port(&self, port: u16) -> Result<(), SoftFailure> {
            assert_eq!(port, 8000);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn supervisor_in(root: &Path, ready_timeout: Duration) -> (BackendSupervisor, RecordingReclaimer) {
        let reclaimer = RecordingReclaimer::default();
        let supervisor = BackendSupervisor::new(
            resolve_backend_paths(RuntimeMode::Development, HostOs::current(), root, root),
            SupervisorConfig {
                ready_timeout,
                ..SupervisorConfig::default()
            },
            Box::new(NoopInstaller),
            Box::new(reclaimer.clone()),
        );
        (supervisor, reclaimer)
    }

    fn shell_plan(script: &str) -> LaunchPlan {
        LaunchPlan {
            kind: BackendKind::Custom,
            cmd: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), script.to_string()],
            cwd: std::env::temp_dir(),
            env: Vec::new(),
        }
    }

    #[test]
    fn readiness_marker_resolves_start_before_timeout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (supervisor, reclaimer) = supervisor_in(temp.path(), Duration::from_secs(10));

        let started = Instant::now();
        supervisor
            .start_with_plan(shell_plan("echo 'Django version 5.0'; echo 'Django version 5.0'; sleep 30"))
            .expect("start should succeed");

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(supervisor.state(), SupervisorState::Ready);
        assert!(supervisor.pid().is_some());
        assert!(supervisor.is_running());

        supervisor.stop();
        assert_eq!(supervisor.state(), SupervisorState::NotStarted);
        assert!(supervisor.pid().is_none());
        assert_eq!(reclaimer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn readiness_marker_without_newline_resolves_start() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (supervisor, _reclaimer) = supervisor_in(temp.path(), Duration::from_secs(10));

        let started = Instant::now();
        supervisor
            .start_with_plan(shell_plan("printf 'Django version 5.0'; sleep 30"))
            .expect("start should succeed");

        assert!(
            started.elapsed() < Duration::from_secs(5),
            "resolved by timeout after {:?}",
            started.elapsed()
        );
        assert_eq!(supervisor.state(), SupervisorState::Ready);
        supervisor.stop();
    }

    #[test]
    fn readiness_marker_split_across_writes_resolves_start() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (supervisor, _reclaimer) = supervisor_in(temp.path(), Duration::from_secs(10));

        let started = Instant::now();
        supervisor
            .start_with_plan(shell_plan("printf 'Django ver'; sleep 1; printf 'sion 5.0'; sleep 30"))
            .expect("start should succeed");

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(supervisor.state(), SupervisorState::Ready);
        supervisor.stop();
    }

    #[test]
    fn readiness_marker_on_stderr_counts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (supervisor, _reclaimer) = supervisor_in(temp.path(), Duration::from_secs(10));

        supervisor
            .start_with_plan(shell_plan(
                "echo 'Watching for file changes with StatReloader' >&2; sleep 30",
            ))
            .expect("start should succeed");
        assert_eq!(supervisor.state(), SupervisorState::Ready);
        supervisor.stop();
    }

    #[test]
    fn early_exit_rejects_with_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (supervisor, _reclaimer) = supervisor_in(temp.path(), Duration::from_secs(10));

        let error = supervisor
            .start_with_plan(shell_plan("echo booting; exit 3"))
            .expect_err("backend exits early");

        assert!(matches!(error, BackendStartError::ExitedBeforeReady(Some(3))));
        assert_eq!(supervisor.state(), SupervisorState::Failed);
        assert!(supervisor.pid().is_none());
    }

    #[test]
    fn spawn_failure_rejects_start() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (supervisor, _reclaimer) = supervisor_in(temp.path(), Duration::from_secs(10));
        let mut plan = shell_plan("unused");
        plan.cmd = temp.path().join("missing-backend");

        let error = supervisor.start_with_plan(plan).expect_err("spawn fails");
        assert!(matches!(error, BackendStartError::Spawn { .. }));
        assert_eq!(supervisor.state(), SupervisorState::Failed);
    }

    #[test]
    fn silent_backend_is_assumed_ready_after_timeout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let timeout = Duration::from_millis(400);
        let (supervisor, _reclaimer) = supervisor_in(temp.path(), timeout);

        let started = Instant::now();
        supervisor
            .start_with_plan(shell_plan("sleep 30"))
            .expect("timeout resolves optimistically");
        let elapsed = started.elapsed();

        assert!(elapsed >= timeout, "resolved too early: {elapsed:?}");
        assert!(elapsed < timeout + Duration::from_secs(2), "resolved too late: {elapsed:?}");
        assert_eq!(supervisor.state(), SupervisorState::Ready);
        supervisor.stop();
    }

    #[test]
    fn stop_without_process_still_reclaims_port() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (supervisor, reclaimer) = supervisor_in(temp.path(), Duration::from_secs(10));

        supervisor.stop();
        supervisor.stop();

        assert_eq!(reclaimer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(supervisor.state(), SupervisorState::NotStarted);
    }

    #[test]
    fn stop_cancels_pending_start() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (supervisor, _reclaimer) = supervisor_in(temp.path(), Duration::from_secs(10));
        let supervisor = Arc::new(supervisor);

        let starter = {
            let supervisor = Arc::clone(&supervisor);
            thread::spawn(move || supervisor.start_with_plan(shell_plan("sleep 30")))
        };
        let waited = Instant::now();
        while supervisor.pid().is_none() && waited.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(20));
        }

        supervisor.stop();
        let result = starter.join().expect("start thread");

        assert!(matches!(result, Err(BackendStartError::Cancelled)));
        assert_eq!(supervisor.state(), SupervisorState::NotStarted);
        assert!(waited.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn concurrent_start_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (supervisor, _reclaimer) = supervisor_in(temp.path(), Duration::from_secs(10));
        let supervisor = Arc::new(supervisor);

        let starter = {
            let supervisor = Arc::clone(&supervisor);
            thread::spawn(move || supervisor.start_with_plan(shell_plan("sleep 30")))
        };
        let waited = Instant::now();
        while supervisor.state() != SupervisorState::Starting
            && waited.elapsed() < Duration::from_secs(5)
        {
            thread::sleep(Duration::from_millis(10));
        }

        let second = supervisor.start_with_plan(shell_plan("sleep 30"));
        assert!(matches!(second, Err(BackendStartError::AlreadyStarting)));

        supervisor.stop();
        let _ = starter.join().expect("start thread");
    }

    #[test]
    fn missing_entry_script_rejects_as_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(temp.path().join("django-backend")).expect("mkdir source");
        let (supervisor, _reclaimer) = supervisor_in(temp.path(), Duration::from_secs(10));

        let error = supervisor.start().expect_err("manage.py is missing");
        assert!(error.is_not_found());
        assert_eq!(supervisor.state(), SupervisorState::Failed);
    }
}
