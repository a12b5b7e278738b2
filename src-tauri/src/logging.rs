use std::{
    env, fs,
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DesktopLogCategory {
    Runtime,
    Startup,
    Backend,
    Security,
    Shutdown,
}

impl DesktopLogCategory {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Runtime => "runtime",
            Self::Startup => "startup",
            Self::Backend => "backend",
            Self::Security => "security",
            Self::Shutdown => "shutdown",
        }
    }
}

pub(crate) fn resolve_desktop_log_path(root_dir: Option<PathBuf>, file_name: &str) -> PathBuf {
    let root = root_dir.unwrap_or_else(|| env::temp_dir().join("nexify"));
    root.join("logs").join(file_name)
}

pub(crate) fn format_log_line(category: DesktopLogCategory, message: &str) -> String {
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    format!("[{timestamp}] [{}] {}\n", category.as_str(), message.trim_end())
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(format!(".{index}"));
    PathBuf::from(raw)
}

pub(crate) fn rotate_if_needed(path: &Path, max_bytes: u64, backup_count: usize) {
    let Ok(metadata) = fs::metadata(path) else {
        return;
    };
    if metadata.len() < max_bytes {
        return;
    }

    if backup_count == 0 {
        let _ = fs::remove_file(path);
        return;
    }

    let _ = fs::remove_file(backup_path(path, backup_count));
    for index in (1..backup_count).rev() {
        let from = backup_path(path, index);
        if from.exists() {
            let _ = fs::rename(&from, backup_path(path, index + 1));
        }
    }
    let _ = fs::rename(path, backup_path(path, 1));
}

pub(crate) fn append_desktop_log(
    category: DesktopLogCategory,
    message: &str,
    root_dir: Option<PathBuf>,
    file_name: &str,
    max_bytes: u64,
    backup_count: usize,
    write_lock: &OnceLock<Mutex<()>>,
) {
    let line = format_log_line(category, message);
    if cfg!(debug_assertions) {
        eprint!("{line}");
    }

    let path = resolve_desktop_log_path(root_dir, file_name);
    let lock = write_lock.get_or_init(|| Mutex::new(()));
    let _guard = match lock.lock() {
        Ok(guard) => guard,
        Err(error) => error.into_inner(),
    };

    if let Some(parent) = path.parent() {
        if fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    rotate_if_needed(&path, max_bytes, backup_count);

    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) {
        let _ = file.write_all(line.as_bytes());
    }
}
