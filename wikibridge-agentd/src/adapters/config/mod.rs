pub mod cipher;
pub mod encrypted_store;
pub mod watch_native;
pub mod watch_poll;

pub use encrypted_store::{EncryptedConfigStore, TemplateSource};
pub use watch_native::NativeFileWatcher;
pub use watch_poll::PollingFileWatcher;
