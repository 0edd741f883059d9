use super::manager::ConfigManager;
use crate::ports::config::{FileWatcher, WatchSignal};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SIGNAL_QUEUE: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatchOptions {
    /// Quiet period after a change signal before the file is re-read.
    pub debounce: Duration,
    /// Delay before re-establishing a watch that failed or could not start.
    pub retry_delay: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(200),
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Background task that keeps a file watch on the configuration file and
/// feeds changes back into the [`ConfigManager`].
pub struct ConfigWatchSupervisor {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConfigWatchSupervisor {
    pub fn spawn(
        manager: Arc<ConfigManager>,
        watcher: Arc<dyn FileWatcher>,
        options: WatchOptions,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let path = manager.path().to_path_buf();
        let task = tokio::spawn(supervise(manager, watcher, path, options, shutdown_rx));
        Self { shutdown, task }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            if !err.is_cancelled() {
                warn!(%err, "config watch task ended abnormally");
            }
        }
    }
}

async fn supervise(
    manager: Arc<ConfigManager>,
    watcher: Arc<dyn FileWatcher>,
    path: PathBuf,
    options: WatchOptions,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut first_attempt = true;
    loop {
        if *shutdown.borrow() {
            return;
        }
        let reconnecting = !std::mem::replace(&mut first_attempt, false);
        let (tx, mut rx) = mpsc::channel(SIGNAL_QUEUE);
        let guard = match watcher.watch(&path, tx) {
            Ok(guard) => guard,
            Err(err) => {
                warn!(
                    watcher = watcher.name(),
                    path = %path.display(),
                    "failed to watch config file: {err:#}"
                );
                if sleep_or_shutdown(&mut shutdown, options.retry_delay).await {
                    return;
                }
                continue;
            }
        };
        info!(watcher = watcher.name(), path = %path.display(), "watching config file");
        if reconnecting {
            // Edits made while the watch was down.
            manager.reload_from_store().await;
        }

        let reason = loop {
            let signal = tokio::select! {
                _ = shutdown.changed() => return,
                signal = rx.recv() => signal,
            };
            match signal {
                Some(WatchSignal::Changed) => {
                    if sleep_or_shutdown(&mut shutdown, options.debounce).await {
                        return;
                    }
                    let mut failure = None;
                    while let Ok(pending) = rx.try_recv() {
                        if let WatchSignal::Failed(reason) = pending {
                            failure = Some(reason);
                        }
                    }
                    let changed = manager.reload_from_store().await;
                    debug!(changed, "config file change handled");
                    if let Some(reason) = failure {
                        break reason;
                    }
                }
                Some(WatchSignal::Failed(reason)) => break reason,
                None => break "watch channel closed".to_string(),
            }
        };
        drop(guard);
        warn!(
            watcher = watcher.name(),
            reason = %reason,
            retry_in_ms = options.retry_delay.as_millis() as u64,
            "config watch lost, re-establishing"
        );
        if sleep_or_shutdown(&mut shutdown, options.retry_delay).await {
            return;
        }
    }
}

/// Returns true when shutdown was requested before `delay` elapsed.
async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(delay) => *shutdown.borrow(),
    }
}
