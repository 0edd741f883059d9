use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_PORT: u16 = 1984;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("port must be between 1 and 65535")]
    InvalidPort,
}

/// Connection settings for the wiki backend plus the local listening port.
///
/// Always fully populated: fields missing from a stored record fall back to
/// their defaults when deserialized.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigurationRecord {
    pub host: String,
    pub username: String,
    pub password: String,
    pub port: u16,
}

impl Default for ConfigurationRecord {
    fn default() -> Self {
        Self {
            host: String::new(),
            username: String::new(),
            password: String::new(),
            port: DEFAULT_PORT,
        }
    }
}

impl ConfigurationRecord {
    /// A host is required before a wiki client can be built.
    pub fn is_configured(&self) -> bool {
        !self.host.trim().is_empty()
    }

    /// Replaces values a stored record may carry but the record never allows.
    pub fn normalized(mut self) -> Self {
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        self
    }

    /// Returns a new record with every field present in `patch` replaced.
    pub fn merge(&self, patch: &ConfigPatch) -> Result<Self, ConfigError> {
        if patch.port == Some(0) {
            return Err(ConfigError::InvalidPort);
        }
        Ok(Self {
            host: patch.host.clone().unwrap_or_else(|| self.host.clone()),
            username: patch
                .username
                .clone()
                .unwrap_or_else(|| self.username.clone()),
            password: patch
                .password
                .clone()
                .unwrap_or_else(|| self.password.clone()),
            port: patch.port.unwrap_or(self.port),
        })
    }
}

impl fmt::Debug for ConfigurationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationRecord")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("port", &self.port)
            .finish()
    }
}

/// Partial update applied by `ConfigManager::set_config`.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
}

impl ConfigPatch {
    pub fn port(port: u16) -> Self {
        Self {
            port: Some(port),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_none()
            && self.username.is_none()
            && self.password.is_none()
            && self.port.is_none()
    }
}

impl fmt::Debug for ConfigPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigPatch")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &self.password.as_deref().map(redact))
            .field("port", &self.port)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "********"
    }
}
