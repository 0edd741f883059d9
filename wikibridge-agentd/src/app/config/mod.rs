pub mod manager;
pub mod watch;

pub use manager::{ConfigManager, SetConfigOutcome};
pub use watch::{ConfigWatchSupervisor, WatchOptions};
