//! Build-time hook: stages the backend sources into the directory the bundle
//! ships from, then strips native executables and libraries from the staged copy.
//!
//! `nexify-prune-bundle <staging dir> [<source root>]`. Without a source root the
//! staging dir is pruned in place.

use std::{
    env, fs, io,
    path::{Path, PathBuf},
    process::ExitCode,
};

use thiserror::Error;
use walkdir::WalkDir;

const BACKEND_SOURCE_DIR: &str = "django-backend";
const STRIPPED_EXTENSIONS: [&str; 2] = ["exe", "dll"];

#[derive(Debug, Error)]
enum PruneError {
    #[error("usage: nexify-prune-bundle <staging dir> [<source root>]")]
    Usage,

    #[error("backend sources not found at {}", .0.display())]
    MissingSources(PathBuf),

    #[error("failed to stage {} into {}: {source}", from.display(), to.display())]
    Stage {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to walk {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to delete {}: {source}", path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn is_stripped_binary(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| {
            STRIPPED_EXTENSIONS
                .iter()
                .any(|stripped| extension.eq_ignore_ascii_case(stripped))
        })
}

fn walk_error(path: &Path) -> impl Fn(walkdir::Error) -> PruneError + '_ {
    move |source| PruneError::Walk {
        path: path.to_path_buf(),
        source,
    }
}

/// Replaces `<staging_dir>/django-backend` with a fresh copy of
/// `<source_root>/django-backend`. Returns how many files were copied.
fn stage_backend_sources(source_root: &Path, staging_dir: &Path) -> Result<usize, PruneError> {
    let from = source_root.join(BACKEND_SOURCE_DIR);
    let to = staging_dir.join(BACKEND_SOURCE_DIR);
    if !from.is_dir() {
        return Err(PruneError::MissingSources(from));
    }
    let stage_error = |from: &Path, to: &Path| {
        let (from, to) = (from.to_path_buf(), to.to_path_buf());
        move |source| PruneError::Stage { from, to, source }
    };
    if to.exists() {
        fs::remove_dir_all(&to).map_err(stage_error(&from, &to))?;
    }

    let mut copied = 0;
    for entry in WalkDir::new(&from) {
        let entry = entry.map_err(walk_error(&from))?;
        let Ok(relative) = entry.path().strip_prefix(&from) else {
            continue;
        };
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(stage_error(entry.path(), &target))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).map_err(stage_error(entry.path(), &target))?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Deletes every stripped binary under `<bundle_dir>/django-backend`.
/// A missing directory prunes nothing.
fn prune_backend_binaries(bundle_dir: &Path) -> Result<Vec<PathBuf>, PruneError> {
    let backend_dir = bundle_dir.join(BACKEND_SOURCE_DIR);
    if !backend_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut removed = Vec::new();
    for entry in WalkDir::new(&backend_dir) {
        let entry = entry.map_err(walk_error(&backend_dir))?;
        if !entry.file_type().is_file() || !is_stripped_binary(entry.path()) {
            continue;
        }
        fs::remove_file(entry.path()).map_err(|source| PruneError::Delete {
            path: entry.path().to_path_buf(),
            source,
        })?;
        removed.push(entry.into_path());
    }
    Ok(removed)
}

fn run() -> Result<usize, PruneError> {
    let mut args = env::args_os().skip(1).map(PathBuf::from);
    let staging_dir = args.next().ok_or(PruneError::Usage)?;
    if let Some(source_root) = args.next() {
        let copied = stage_backend_sources(&source_root, &staging_dir)?;
        println!(
            "[prune-bundle] staged {copied} file(s) into {}",
            staging_dir.join(BACKEND_SOURCE_DIR).display()
        );
    }
    let removed = prune_backend_binaries(&staging_dir)?;
    for path in &removed {
        println!("[prune-bundle] deleted {}", path.display());
    }
    Ok(removed.len())
}

fn main() -> ExitCode {
    match run() {
        Ok(count) => {
            println!("[prune-bundle] removed {count} file(s)");
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("[prune-bundle] {error}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_executables_and_libraries_case_insensitively() {
        let temp = tempfile::tempdir().expect("tempdir");
        let backend = temp.path().join(BACKEND_SOURCE_DIR);
        let nested = backend.join("venv").join("Scripts");
        fs::create_dir_all(&nested).expect("mkdir");
        for name in ["python.EXE", "helper.dll", "manage.py", "notes.exe.txt"] {
            fs::write(nested.join(name), b"x").expect("write");
        }
        fs::write(backend.join("tool.exe"), b"x").expect("write");

        let removed = prune_backend_binaries(temp.path()).expect("prune");

        assert_eq!(removed.len(), 3);
        assert!(!nested.join("python.EXE").exists());
        assert!(!nested.join("helper.dll").exists());
        assert!(!backend.join("tool.exe").exists());
        assert!(nested.join("manage.py").exists());
        assert!(nested.join("notes.exe.txt").exists());
    }

    #[test]
    fn staged_copy_is_pruned_and_sources_stay_intact() {
        let source_root = tempfile::tempdir().expect("source tempdir");
        let staging = tempfile::tempdir().expect("staging tempdir");
        let sources = source_root.path().join(BACKEND_SOURCE_DIR);
        fs::create_dir_all(sources.join("bin")).expect("mkdir");
        fs::write(sources.join("manage.py"), b"x").expect("write");
        fs::write(sources.join("bin").join("helper.exe"), b"x").expect("write");

        let copied = stage_backend_sources(source_root.path(), staging.path()).expect("stage");
        let removed = prune_backend_binaries(staging.path()).expect("prune");

        let staged = staging.path().join(BACKEND_SOURCE_DIR);
        assert_eq!(copied, 2);
        assert_eq!(removed, vec![staged.join("bin").join("helper.exe")]);
        assert!(staged.join("manage.py").exists());
        assert!(sources.join("bin").join("helper.exe").exists());
    }

    #[test]
    fn restaging_drops_stale_files() {
        let source_root = tempfile::tempdir().expect("source tempdir");
        let staging = tempfile::tempdir().expect("staging tempdir");
        fs::create_dir_all(source_root.path().join(BACKEND_SOURCE_DIR)).expect("mkdir");
        let stale = staging.path().join(BACKEND_SOURCE_DIR).join("old.py");
        fs::create_dir_all(stale.parent().expect("parent")).expect("mkdir");
        fs::write(&stale, b"x").expect("write");

        stage_backend_sources(source_root.path(), staging.path()).expect("stage");
        assert!(!stale.exists());
    }

    #[test]
    fn staging_without_sources_fails() {
        let source_root = tempfile::tempdir().expect("source tempdir");
        let staging = tempfile::tempdir().expect("staging tempdir");
        assert!(matches!(
            stage_backend_sources(source_root.path(), staging.path()),
            Err(PruneError::MissingSources(_))
        ));
    }

    #[test]
    fn missing_backend_dir_is_a_no_op() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(prune_backend_binaries(temp.path()).expect("prune").is_empty());
    }

    #[test]
    fn files_outside_backend_dir_are_kept() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join(BACKEND_SOURCE_DIR)).expect("mkdir");
        let launcher = temp.path().join("nexify-desktop.exe");
        fs::write(&launcher, b"x").expect("write");

        prune_backend_binaries(temp.path()).expect("prune");
        assert!(launcher.exists());
    }
}
