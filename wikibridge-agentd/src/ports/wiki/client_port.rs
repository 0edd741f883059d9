use crate::domain::config::ConfigurationRecord;
use async_trait::async_trait;
use std::sync::Arc;

/// Page as returned by the wiki backend. `view_html` is the rendered body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WikiPage {
    pub id: String,
    pub title: Option<String>,
    pub view_html: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum WikiClientError {
    #[error("wiki returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("wiki request failed: {0}")]
    Transport(String),
    #[error("unexpected wiki response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait WikiClient: Send + Sync {
    fn host(&self) -> &str;

    async fn get_page_view(&self, page_id: &str) -> Result<WikiPage, WikiClientError>;
}

/// Builds a client for the connection settings of a record.
pub trait WikiClientFactory: Send + Sync {
    fn build(&self, record: &ConfigurationRecord) -> anyhow::Result<Arc<dyn WikiClient>>;
}
