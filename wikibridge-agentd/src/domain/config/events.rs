use super::record::ConfigurationRecord;
use chrono::{DateTime, Utc};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Written through `ConfigManager::set_config`.
    Programmatic,
    /// Picked up from the file after an edit outside this process.
    External,
}

impl ChangeOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOrigin::Programmatic => "programmatic",
            ChangeOrigin::External => "external",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConfigChanged {
    pub record: ConfigurationRecord,
    pub origin: ChangeOrigin,
    pub occurred_at: DateTime<Utc>,
}

impl ConfigChanged {
    pub fn new(record: ConfigurationRecord, origin: ChangeOrigin) -> Self {
        Self {
            record,
            origin,
            occurred_at: Utc::now(),
        }
    }
}
