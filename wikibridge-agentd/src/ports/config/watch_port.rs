use std::path::Path;
use tokio::sync::mpsc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchSignal {
    Changed,
    /// The watch is unusable; the supervisor tears it down and retries.
    Failed(String),
}

/// Keeps a watch alive. Dropping it stops the watch.
pub struct WatchGuard {
    _inner: Box<dyn Send>,
}

impl WatchGuard {
    pub fn new<T: Send + 'static>(inner: T) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

pub trait FileWatcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Starts watching `path`, delivering signals on `signals` until the
    /// returned guard is dropped.
    fn watch(&self, path: &Path, signals: mpsc::Sender<WatchSignal>)
        -> anyhow::Result<WatchGuard>;
}
