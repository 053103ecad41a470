/// Watches single files (the rules file, the config file) for changes.
///
/// Uses the `notify` crate. We watch the *parent directory* non-recursively
/// and filter on the file name, which is more reliable than watching the
/// file itself: editors often save by writing a temp file and renaming it
/// over the original, which drops a direct file watch.
///
/// When the parent directory does not exist yet (a fresh workspace without
/// `.vscode/`), the nearest existing ancestor is watched for the first
/// missing path component instead. Owners re-arm with `needs_rearm` on each
/// reload until the watch sits on the file's own directory.
///
/// The callback runs on notify's own thread, never on the async runtime.
use crate::config::{self, NotifierConfig};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Keeps the underlying OS watcher alive; dropping it stops the watch.
pub struct FileWatch {
    _watcher:    RecommendedWatcher,
    watched_dir: PathBuf,
    direct:      bool,
}

impl FileWatch {
    pub fn watched_dir(&self) -> &Path {
        &self.watched_dir
    }

    /// True while an ancestor stands in for the missing parent directory,
    /// or once the watched directory itself has been removed.
    pub fn needs_rearm(&self) -> bool {
        !self.direct || !self.watched_dir.is_dir()
    }
}

fn touches(event: &Event, file_name: &OsStr) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|p| p.file_name() == Some(file_name))
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

/// Closest directory at or above `dir` that exists right now.
fn nearest_existing_dir(dir: &Path) -> PathBuf {
    dir.ancestors()
        .filter(|d| !d.as_os_str().is_empty())
        .find(|d| d.is_dir())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn watch_file<F>(path: &Path, on_change: F) -> notify::Result<FileWatch>
where
    F: Fn() + Send + 'static,
{
    if path.file_name().is_none() {
        return Err(notify::Error::generic("watched path has no file name"));
    }
    let parent = parent_dir(path);
    let watched_dir = nearest_existing_dir(parent);
    let direct = watched_dir == parent;

    // Name of the entry inside `watched_dir` that leads to the file
    let name = path
        .strip_prefix(&watched_dir)
        .unwrap_or(path)
        .components()
        .next()
        .map(|c| c.as_os_str().to_os_string())
        .ok_or_else(|| notify::Error::generic("watched path has no file name"))?;

    // Small poll interval as fallback for platforms without native events
    let config = notify::Config::default().with_poll_interval(Duration::from_millis(500));

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) if touches(&event, &name) => on_change(),
            Ok(_) => {}
            Err(e) => tracing::error!("Watcher error: {}", e),
        },
        config,
    )?;
    watcher.watch(&watched_dir, RecursiveMode::NonRecursive)?;
    if direct {
        tracing::info!("Watching {:?}", path);
    } else {
        tracing::info!("Watching {:?} until {:?} exists", watched_dir, parent);
    }

    Ok(FileWatch {
        _watcher: watcher,
        watched_dir,
        direct,
    })
}

/// Watch `path` and ask for a reload over `tx` on every change. Failures
/// are logged; the caller simply runs without a watch.
pub fn watch_for_reload(path: &Path, tx: &mpsc::Sender<()>) -> Option<FileWatch> {
    let tx = tx.clone();
    match watch_file(path, move || {
        // A full channel already holds a pending reload
        let _ = tx.try_send(());
    }) {
        Ok(watch) => Some(watch),
        Err(e) => {
            tracing::warn!("Not watching {:?}: {}", path, e);
            None
        }
    }
}

/// Replace `slot` with a fresh watch when it is missing or needs re-arming.
pub fn rearm(slot: &mut Option<FileWatch>, path: &Path, tx: &mpsc::Sender<()>) {
    if slot.as_ref().map_or(true, FileWatch::needs_rearm) {
        *slot = watch_for_reload(path, tx);
    }
}

// ---------------------------------------------------------------------------
// Config task
// ---------------------------------------------------------------------------

/// Re-read the config file and publish it when it differs. A file that
/// fails to parse is logged and the previous config is kept.
pub fn reload_config(path: &Path, tx: &watch::Sender<NotifierConfig>) -> bool {
    match config::load_or_default(path) {
        Ok(cfg) => {
            let changed = tx.send_if_modified(|current| {
                if *current == cfg {
                    return false;
                }
                *current = cfg.clone();
                true
            });
            if changed {
                tracing::info!("Configuration reloaded from {:?}", path);
            }
            changed
        }
        Err(e) => {
            tracing::warn!("Keeping previous configuration: {}", e);
            false
        }
    }
}

/// Live config: reloads on every change to `path` until all receivers of
/// `tx` are gone.
pub async fn run_config(path: PathBuf, tx: watch::Sender<NotifierConfig>) {
    let (reload_tx, mut reload_rx) = mpsc::channel::<()>(1);
    let mut file_watch = watch_for_reload(&path, &reload_tx);

    loop {
        tokio::select! {
            _ = tx.closed() => break,
            Some(()) = reload_rx.recv() => {
                rearm(&mut file_watch, &path, &reload_tx);
                reload_config(&path, &tx);
            }
        }
    }
    tracing::debug!("Config watch for {:?} stopped", path);
}
