use std::time::Duration;

pub(crate) const BACKEND_HOST: &str = "127.0.0.1";
pub(crate) const BACKEND_PORT: u16 = 8000;
pub(crate) const BACKEND_URL: &str = "http://127.0.0.1:8000/";

pub(crate) const DEFAULT_BACKEND_READY_TIMEOUT_MS: u64 = 10_000;
pub(crate) const BACKEND_READY_TIMEOUT_MIN_MS: u64 = 1_000;
pub(crate) const BACKEND_READY_TIMEOUT_MAX_MS: u64 = 120_000;
pub(crate) const BACKEND_READY_TIMEOUT_ENV: &str = "NEXIFY_BACKEND_READY_TIMEOUT_MS";
pub(crate) const BACKEND_EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) const DEFAULT_NAVIGATION_GRACE_MS: u64 = 3_000;
pub(crate) const NAVIGATION_GRACE_MAX_MS: u64 = 30_000;
pub(crate) const NAVIGATION_GRACE_ENV: &str = "NEXIFY_NAVIGATION_GRACE_MS";

pub(crate) const BACKEND_CMD_ENV: &str = "NEXIFY_BACKEND_CMD";
pub(crate) const BACKEND_CWD_ENV: &str = "NEXIFY_BACKEND_CWD";
pub(crate) const DESKTOP_DEV_ENV: &str = "NEXIFY_DESKTOP_DEV";
pub(crate) const DESKTOP_DEV_ARG: &str = "--dev";
pub(crate) const NEXIFY_ROOT_ENV: &str = "NEXIFY_ROOT";

pub(crate) const BACKEND_SOURCE_DIR: &str = "django-backend";
pub(crate) const BACKEND_ENTRY_SCRIPT: &str = "manage.py";
pub(crate) const BACKEND_REQUIREMENTS_FILE: &str = "requirements.txt";
pub(crate) const BACKEND_PREBUILT_DIR: &str = "build";
pub(crate) const COMPILED_BACKEND_DEV_DIR: &str = "backend_build";
pub(crate) const COMPILED_BACKEND_PACKAGED_DIR: &str = "backend";
pub(crate) const COMPILED_BACKEND_NAME: &str = "nexify_backend";
pub(crate) const VIRTUAL_ENV_DIR: &str = "nexify_env";

pub(crate) const TAMPER_STATE_FILE: &str = "tamper.json";
pub(crate) const TAMPER_STATE_FALLBACK_FILE: &str = "nexify_tamper.json";

pub(crate) const DESKTOP_LOG_FILE: &str = "desktop.log";
pub(crate) const BACKEND_LOG_FILE: &str = "backend.log";
pub(crate) const DESKTOP_LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;
pub(crate) const BACKEND_LOG_MAX_BYTES: u64 = 20 * 1024 * 1024;
pub(crate) const LOG_BACKUP_COUNT: usize = 5;

pub(crate) const MAIN_WINDOW_LABEL: &str = "main";
pub(crate) const MAIN_WINDOW_TITLE: &str = "Nexify";
pub(crate) const LOADING_PAGE: &str = "loading.html";
pub(crate) const ERROR_PAGE: &str = "error.html";

#[cfg(target_os = "windows")]
pub(crate) const CREATE_NO_WINDOW: u32 = 0x0800_0000;
