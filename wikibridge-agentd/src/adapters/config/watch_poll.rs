use crate::ports::config::{FileWatcher, WatchGuard, WatchSignal};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// Fallback watcher for filesystems without change notifications.
#[derive(Debug, Clone)]
pub struct PollingFileWatcher {
    interval: Duration,
}

impl PollingFileWatcher {
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval: interval.unwrap_or(DEFAULT_INTERVAL),
        }
    }
}

impl Default for PollingFileWatcher {
    fn default() -> Self {
        Self::new(None)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

async fn fingerprint(path: &Path) -> std::io::Result<Option<Fingerprint>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(Fingerprint {
            modified: meta.modified().ok(),
            len: meta.len(),
        })),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl FileWatcher for PollingFileWatcher {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn watch(
        &self,
        path: &Path,
        signals: mpsc::Sender<WatchSignal>,
    ) -> anyhow::Result<WatchGuard> {
        let path: PathBuf = path.to_path_buf();
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let task = tokio::spawn(async move {
            let mut last = match fingerprint(&path).await {
                Ok(fp) => fp,
                Err(err) => {
                    let _ = signals.send(WatchSignal::Failed(err.to_string())).await;
                    return;
                }
            };
            loop {
                ticker.tick().await;
                match fingerprint(&path).await {
                    Ok(current) if current != last => {
                        last = current;
                        if signals.send(WatchSignal::Changed).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        let _ = signals.send(WatchSignal::Failed(err.to_string())).await;
                        break;
                    }
                }
            }
        });
        Ok(WatchGuard::new(AbortOnDrop(task)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn detects_length_change() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.enc");
        std::fs::write(&path, "a").unwrap();
        let watcher = PollingFileWatcher::new(Some(Duration::from_millis(20)));
        let (tx, mut rx) = mpsc::channel(4);
        let _guard = watcher.watch(&path, tx).unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        std::fs::write(&path, "abc").unwrap();
        let signal = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("poll signal");
        assert_eq!(signal, Some(WatchSignal::Changed));
    }

    #[tokio::test]
    async fn dropping_guard_stops_polling() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.enc");
        let watcher = PollingFileWatcher::new(Some(Duration::from_millis(10)));
        let (tx, mut rx) = mpsc::channel(4);
        let guard = watcher.watch(&path, tx).unwrap();
        drop(guard);

        std::fs::write(&path, "created after drop").unwrap();
        // The aborted task drops its sender, closing the channel.
        let signal = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("channel closes");
        assert_eq!(signal, None);
    }
}
