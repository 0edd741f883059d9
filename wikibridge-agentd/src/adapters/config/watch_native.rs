use crate::ports::config::{FileWatcher, WatchGuard, WatchSignal};
use anyhow::Context;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Watches the config file through the platform notification API.
///
/// The parent directory is watched rather than the file itself, so that the
/// atomic rename performed on every write does not orphan the watch.
#[derive(Debug, Default, Clone)]
pub struct NativeFileWatcher;

impl NativeFileWatcher {
    pub fn new() -> Self {
        Self
    }
}

impl FileWatcher for NativeFileWatcher {
    fn name(&self) -> &'static str {
        "native"
    }

    fn watch(
        &self,
        path: &Path,
        signals: mpsc::Sender<WatchSignal>,
    ) -> anyhow::Result<WatchGuard> {
        let file_name = path
            .file_name()
            .map(OsString::from)
            .with_context(|| format!("config path {} has no file name", path.display()))?;
        let dir = watch_dir(path);

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if !matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) {
                        return;
                    }
                    let touches_config = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()));
                    if touches_config {
                        // Queue full means a reload is already pending.
                        let _ = signals.try_send(WatchSignal::Changed);
                    }
                }
                Err(err) => {
                    error!(%err, "config watcher error");
                    let _ = signals.try_send(WatchSignal::Failed(err.to_string()));
                }
            },
            notify::Config::default(),
        )
        .context("initializing config watcher")?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watching config directory {}", dir.display()))?;
        debug!(directory = %dir.display(), "native config watch established");
        Ok(WatchGuard::new(watcher))
    }
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
