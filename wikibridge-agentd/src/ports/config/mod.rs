pub mod store_port;
pub mod watch_port;

pub use store_port::ConfigStore;
pub use watch_port::{FileWatcher, WatchGuard, WatchSignal};
