use std::{env, path::PathBuf, time::Duration};

use crate::{
    BACKEND_CMD_ENV, BACKEND_CWD_ENV, BACKEND_PORT, BACKEND_READY_TIMEOUT_ENV,
    BACKEND_READY_TIMEOUT_MAX_MS, BACKEND_READY_TIMEOUT_MIN_MS, DEFAULT_BACKEND_READY_TIMEOUT_MS,
    DEFAULT_NAVIGATION_GRACE_MS, NAVIGATION_GRACE_ENV, NAVIGATION_GRACE_MAX_MS,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SupervisorConfig {
    pub(crate) ready_timeout: Duration,
    pub(crate) backend_port: u16,
    pub(crate) command_override: Option<String>,
    pub(crate) command_override_cwd: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_millis(DEFAULT_BACKEND_READY_TIMEOUT_MS),
            backend_port: BACKEND_PORT,
            command_override: None,
            command_override_cwd: None,
        }
    }
}

impl SupervisorConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            ready_timeout: resolve_ready_timeout(env::var(BACKEND_READY_TIMEOUT_ENV).ok().as_deref()),
            backend_port: BACKEND_PORT,
            command_override: normalize_optional(env::var(BACKEND_CMD_ENV).ok()),
            command_override_cwd: normalize_optional(env::var(BACKEND_CWD_ENV).ok())
                .map(PathBuf::from),
        }
    }
}

fn normalize_optional(raw: Option<String>) -> Option<String> {
    raw.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn parse_clamped_ms(raw: Option<&str>, default_ms: u64, min_ms: u64, max_ms: u64) -> u64 {
    raw.and_then(|value| value.trim().parse::<u64>().ok())
        .map(|value| value.clamp(min_ms, max_ms))
        .unwrap_or(default_ms)
}

pub(crate) fn resolve_ready_timeout(raw: Option<&str>) -> Duration {
    Duration::from_millis(parse_clamped_ms(
        raw,
        DEFAULT_BACKEND_READY_TIMEOUT_MS,
        BACKEND_READY_TIMEOUT_MIN_MS,
        BACKEND_READY_TIMEOUT_MAX_MS,
    ))
}

pub(crate) fn resolve_navigation_grace(raw: Option<&str>) -> Duration {
    Duration::from_millis(parse_clamped_ms(
        raw,
        DEFAULT_NAVIGATION_GRACE_MS,
        0,
        NAVIGATION_GRACE_MAX_MS,
    ))
}

pub(crate) fn navigation_grace_from_env() -> Duration {
    resolve_navigation_grace(env::var(NAVIGATION_GRACE_ENV).ok().as_deref())
}
