use crate::domain::config::ConfigurationRecord;
use async_trait::async_trait;
use std::path::Path;

/// Persistent home of the single configuration record.
///
/// Implementations recover from read failures by returning the supplied
/// default and report write failures as `false`; none of the methods fail.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    fn path(&self) -> &Path;

    async fn ensure_exists(&self) -> bool;

    async fn load_record(&self, default: ConfigurationRecord) -> ConfigurationRecord;

    async fn save_record(&self, record: &ConfigurationRecord) -> bool;
}
