use super::cipher;
use crate::domain::config::ConfigurationRecord;
use crate::ports::config::ConfigStore;
use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const TMP_SUFFIX: &str = ".tmp";

/// Blob shipped with the binary; decrypts to an empty record on port 1984.
pub const EMBEDDED_TEMPLATE: &str = include_str!("../../../assets/empty-config.enc");

/// Where a missing configuration file is copied from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TemplateSource {
    Embedded,
    File(PathBuf),
}

/// Single-record store persisted as an encrypted `ivHex:cipherHex` file.
#[derive(Debug, Clone)]
pub struct EncryptedConfigStore {
    path: PathBuf,
    template: TemplateSource,
}

impl EncryptedConfigStore {
    pub fn new<P: AsRef<Path>>(path: P, template: TemplateSource) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            template,
        }
    }

    /// Reads and decrypts the file, falling back to `default` on any failure.
    pub async fn read<T: DeserializeOwned>(&self, default: T) -> T {
        match self.try_read().await {
            Ok(Some(value)) => value,
            Ok(None) => {
                debug!(path = %self.path.display(), "config file absent, using defaults");
                default
            }
            Err(err) => {
                warn!(path = %self.path.display(), "failed to read encrypted config: {err:#}");
                default
            }
        }
    }

    /// Encrypts and atomically replaces the file. Failures are logged.
    pub async fn write<T: Serialize>(&self, value: &T) -> bool {
        match self.try_write(value).await {
            Ok(()) => true,
            Err(err) => {
                error!(path = %self.path.display(), "failed to write encrypted config: {err:#}");
                false
            }
        }
    }

    async fn try_read<T: DeserializeOwned>(&self) -> anyhow::Result<Option<T>> {
        let blob = match fs::read_to_string(&self.path).await {
            Ok(blob) => blob,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(anyhow::Error::from(err)
                    .context(format!("reading config file {}", self.path.display())))
            }
        };
        let plaintext = cipher::decrypt(&blob)
            .with_context(|| format!("decrypting config file {}", self.path.display()))?;
        let value = serde_json::from_str(&plaintext)
            .with_context(|| format!("parsing config file {}", self.path.display()))?;
        Ok(Some(value))
    }

    async fn try_write<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        let json = serde_json::to_string(value).context("serializing config record")?;
        let blob = cipher::encrypt(&json);
        self.ensure_parent_dir().await?;
        let tmp_path = self.tmp_path();
        let written = write_then_rename(&tmp_path, &self.path, blob.as_bytes()).await;
        if written.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        written
    }

    async fn try_ensure_exists(&self) -> anyhow::Result<bool> {
        if fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(true);
        }
        info!(path = %self.path.display(), "config file does not exist, creating from template");
        self.ensure_parent_dir().await?;
        match &self.template {
            TemplateSource::Embedded => {
                fs::write(&self.path, EMBEDDED_TEMPLATE)
                    .await
                    .with_context(|| format!("writing config file {}", self.path.display()))?;
            }
            TemplateSource::File(template) => {
                if !fs::try_exists(template).await.unwrap_or(false) {
                    error!(template = %template.display(), "config template not found");
                    return Ok(false);
                }
                fs::copy(template, &self.path).await.with_context(|| {
                    format!(
                        "copying template {} to {}",
                        template.display(),
                        self.path.display()
                    )
                })?;
            }
        }
        info!(path = %self.path.display(), "created config file from template");
        Ok(true)
    }

    async fn ensure_parent_dir(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating config dir {}", parent.display()))?;
            }
        }
        Ok(())
    }

    /// Unique per write so concurrent writers never share a temp file.
    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "config.enc".into());
        let unique = format!("{}.{}", std::process::id(), Uuid::new_v4().simple());
        name.push(format!(".{unique}{TMP_SUFFIX}"));
        self.path.with_file_name(name)
    }
}

async fn write_then_rename(tmp_path: &Path, path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let mut file = fs::File::create(tmp_path)
        .await
        .with_context(|| format!("creating temp config file {}", tmp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp config file {}", tmp_path.display()))?;
    file.flush().await?;
    drop(file);
    fs::rename(tmp_path, path)
        .await
        .with_context(|| format!("replacing config file {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl ConfigStore for EncryptedConfigStore {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_exists(&self) -> bool {
        match self.try_ensure_exists().await {
            Ok(exists) => exists,
            Err(err) => {
                error!(path = %self.path.display(), "failed to ensure config file exists: {err:#}");
                false
            }
        }
    }

    async fn load_record(&self, default: ConfigurationRecord) -> ConfigurationRecord {
        self.read(default).await.normalized()
    }

    async fn save_record(&self, record: &ConfigurationRecord) -> bool {
        self.write(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::DEFAULT_PORT;
    use tempfile::tempdir;

    fn temp_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(TMP_SUFFIX))
            .collect()
    }

    fn sample() -> ConfigurationRecord {
        ConfigurationRecord {
            host: "https://wiki.example.com".into(),
            username: "alice".into(),
            password: "s3cret".into(),
            port: 2000,
        }
    }

    #[tokio::test]
    async fn read_returns_default_when_file_missing() {
        let dir = tempdir().unwrap();
        let store =
            EncryptedConfigStore::new(dir.path().join("config.enc"), TemplateSource::Embedded);
        let default = sample();
        assert_eq!(store.read(default.clone()).await, default);
    }

    #[tokio::test]
    async fn write_then_read_returns_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.enc");
        let store = EncryptedConfigStore::new(&path, TemplateSource::Embedded);
        assert!(store.save_record(&sample()).await);

        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert!(!on_disk.contains("s3cret"));
        assert!(on_disk.contains(':'));
        assert!(temp_files(&dir.path().join("nested")).is_empty());

        let loaded = store.load_record(ConfigurationRecord::default()).await;
        assert_eq!(loaded, sample());
    }

    #[tokio::test]
    async fn corrupted_file_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.enc");
        std::fs::write(&path, "not-a-blob").unwrap();
        let store = EncryptedConfigStore::new(&path, TemplateSource::Embedded);
        let loaded = store.load_record(ConfigurationRecord::default()).await;
        assert_eq!(loaded, ConfigurationRecord::default());
    }

    #[tokio::test]
    async fn decrypted_non_json_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.enc");
        std::fs::write(&path, cipher::encrypt("{ not json")).unwrap();
        let store = EncryptedConfigStore::new(&path, TemplateSource::Embedded);
        assert_eq!(store.read(sample()).await, sample());
    }

    #[tokio::test]
    async fn partial_record_is_filled_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.enc");
        std::fs::write(
            &path,
            cipher::encrypt(r#"{"host":"h","username":"u","password":"p"}"#),
        )
        .unwrap();
        let store = EncryptedConfigStore::new(&path, TemplateSource::Embedded);
        let loaded = store.load_record(sample()).await;
        assert_eq!(loaded.host, "h");
        assert_eq!(loaded.port, DEFAULT_PORT);
    }

    #[tokio::test]
    async fn ensure_exists_creates_from_embedded_template() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.enc");
        let store = EncryptedConfigStore::new(&path, TemplateSource::Embedded);
        assert!(store.ensure_exists().await);
        let loaded = store.load_record(sample()).await;
        assert_eq!(loaded, ConfigurationRecord::default());
    }

    #[tokio::test]
    async fn ensure_exists_copies_template_file() {
        let dir = tempdir().unwrap();
        let template = dir.path().join("empty-config.enc");
        std::fs::write(&template, cipher::encrypt(r#"{"host":"from-template"}"#)).unwrap();
        let store = EncryptedConfigStore::new(
            dir.path().join("config.enc"),
            TemplateSource::File(template),
        );
        assert!(store.ensure_exists().await);
        let loaded = store.load_record(ConfigurationRecord::default()).await;
        assert_eq!(loaded.host, "from-template");
    }

    #[tokio::test]
    async fn ensure_exists_reports_missing_template() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.enc");
        let store = EncryptedConfigStore::new(
            &path,
            TemplateSource::File(dir.path().join("missing.enc")),
        );
        assert!(!store.ensure_exists().await);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn ensure_exists_keeps_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.enc");
        let store = EncryptedConfigStore::new(&path, TemplateSource::Embedded);
        assert!(store.save_record(&sample()).await);
        assert!(store.ensure_exists().await);
        assert_eq!(
            store.load_record(ConfigurationRecord::default()).await,
            sample()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_never_leave_a_torn_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.enc");
        let daemon = EncryptedConfigStore::new(&path, TemplateSource::Embedded);
        let cli = EncryptedConfigStore::new(&path, TemplateSource::Embedded);
        let first = sample();
        let second = ConfigurationRecord {
            port: 3000,
            ..sample()
        };

        for _ in 0..100 {
            let (a, b) = tokio::join!(
                tokio::spawn({
                    let store = daemon.clone();
                    let record = first.clone();
                    async move { store.save_record(&record).await }
                }),
                tokio::spawn({
                    let store = cli.clone();
                    let record = second.clone();
                    async move { store.save_record(&record).await }
                }),
            );
            assert!(a.unwrap());
            assert!(b.unwrap());

            let blob = std::fs::read_to_string(&path).unwrap();
            let plaintext = cipher::decrypt(&blob).unwrap();
            let on_disk: ConfigurationRecord = serde_json::from_str(&plaintext).unwrap();
            assert!(on_disk == first || on_disk == second);
        }
        assert!(temp_files(dir.path()).is_empty());
    }
}
