use std::env;

use crate::{DESKTOP_DEV_ARG, DESKTOP_DEV_ENV};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RuntimeMode {
    Development,
    Packaged,
}

impl RuntimeMode {
    pub(crate) fn detect() -> Self {
        let args: Vec<String> = env::args().skip(1).collect();
        Self::from_launch(&args, env::var(DESKTOP_DEV_ENV).ok().as_deref())
    }

    pub(crate) fn from_launch(args: &[String], dev_env: Option<&str>) -> Self {
        if args.iter().any(|arg| arg == DESKTOP_DEV_ARG) {
            return Self::Development;
        }
        match dev_env.map(str::trim) {
            Some("1") | Some("true") => Self::Development,
            _ => Self::Packaged,
        }
    }

    pub(crate) fn is_development(self) -> bool {
        self == Self::Development
    }
}
