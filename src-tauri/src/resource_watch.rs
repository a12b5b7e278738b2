use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver},
        Arc, Mutex,
    },
    thread,
};

use notify::{
    event::{MetadataKind, ModifyKind},
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};

use crate::{
    append_security_log,
    soft_failure::{self, SoftFailure},
};

const IGNORED_DIR_NAMES: [&str; 1] = ["__pycache__"];

/// Live filesystem watchers over the shipped resources.
pub(crate) struct ResourceWatchSet {
    watchers: Arc<Mutex<Vec<RecommendedWatcher>>>,
    closed: Arc<AtomicBool>,
}

impl ResourceWatchSet {
    pub(crate) fn watcher_count(&self) -> usize {
        lock_watchers(&self.watchers).len()
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drops every watcher. Later events are ignored and the tamper callback never runs.
    pub(crate) fn close(&self) {
        close_watchers(&self.watchers, &self.closed);
    }
}

fn lock_watchers(
    watchers: &Mutex<Vec<RecommendedWatcher>>,
) -> std::sync::MutexGuard<'_, Vec<RecommendedWatcher>> {
    match watchers.lock() {
        Ok(guard) => guard,
        Err(error) => error.into_inner(),
    }
}

fn close_watchers(watchers: &Mutex<Vec<RecommendedWatcher>>, closed: &AtomicBool) -> bool {
    let already_closed = closed.swap(true, Ordering::AcqRel);
    lock_watchers(watchers).clear();
    !already_closed
}

/// Existing targets, minus any already covered by a recursive watch on an ancestor.
pub(crate) fn dedupe_watch_targets(targets: &[PathBuf]) -> Vec<PathBuf> {
    let mut existing: Vec<PathBuf> = targets.iter().filter(|path| path.exists()).cloned().collect();
    existing.sort_by_key(|path| path.components().count());

    let mut kept: Vec<PathBuf> = Vec::new();
    for target in existing {
        if kept.iter().any(|ancestor| target.starts_with(ancestor)) {
            continue;
        }
        kept.push(target);
    }
    kept
}

fn is_ignored_path(path: &Path) -> bool {
    path.components().any(|component| {
        IGNORED_DIR_NAMES
            .iter()
            .any(|name| component.as_os_str() == *name)
    })
}

pub(crate) fn is_tamper_event(event: &Event) -> bool {
    let relevant_kind = match event.kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)) => false,
        EventKind::Modify(_) => true,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => false,
    };
    relevant_kind && event.paths.iter().any(|path| !is_ignored_path(path))
}

/// Watches `targets` recursively. The first qualifying change closes all watchers,
/// then `on_tamper` runs on the dispatcher thread.
pub(crate) fn start_resource_watchers<F>(targets: &[PathBuf], on_tamper: F) -> ResourceWatchSet
where
    F: FnOnce() + Send + 'static,
{
    let watchers = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let (event_tx, event_rx) = mpsc::channel::<notify::Result<Event>>();

    for target in dedupe_watch_targets(targets) {
        let target_tx = event_tx.clone();
        let watcher = RecommendedWatcher::new(
            move |result| {
                let _ = target_tx.send(result);
            },
            Config::default(),
        )
        .and_then(|mut watcher| {
            watcher.watch(&target, RecursiveMode::Recursive)?;
            Ok(watcher)
        });

        match watcher {
            Ok(watcher) => {
                append_security_log(&format!("watching {}", target.display()));
                lock_watchers(&watchers).push(watcher);
            }
            Err(error) => soft_failure::report(SoftFailure::WatchSetup {
                path: target.clone(),
                detail: error.to_string(),
            }),
        }
    }
    drop(event_tx);

    let dispatcher_watchers = Arc::clone(&watchers);
    let dispatcher_closed = Arc::clone(&closed);
    let spawned = thread::Builder::new()
        .name("resource-watch".to_string())
        .spawn(move || {
            dispatch_first_change(event_rx, &dispatcher_watchers, &dispatcher_closed, on_tamper)
        });
    if let Err(error) = spawned {
        append_security_log(&format!("failed to start resource watch dispatcher: {error}"));
    }

    ResourceWatchSet { watchers, closed }
}

fn dispatch_first_change<F>(
    event_rx: Receiver<notify::Result<Event>>,
    watchers: &Mutex<Vec<RecommendedWatcher>>,
    closed: &AtomicBool,
    on_tamper: F,
) where
    F: FnOnce(),
{
    for result in event_rx {
        if closed.load(Ordering::Acquire) {
            return;
        }
        match result {
            Ok(event) if is_tamper_event(&event) => {
                if !close_watchers(watchers, closed) {
                    return;
                }
                append_security_log(&format!(
                    "resource change detected: {:?} {:?}",
                    event.kind, event.paths
                ));
                on_tamper();
                return;
            }
            Ok(_) => {}
            Err(error) => append_security_log(&format!("resource watcher error: {error}")),
        }
    }
}
