pub mod events;
pub mod record;

pub use events::{ChangeOrigin, ConfigChanged};
pub use record::{ConfigError, ConfigPatch, ConfigurationRecord, DEFAULT_PORT};
