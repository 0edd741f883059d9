use crate::app::config::ConfigManager;
use crate::domain::config::{ConfigChanged, ConfigurationRecord};
use crate::ports::wiki::{MarkdownConverter, WikiClient, WikiClientError, WikiClientFactory};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

pub const GET_WIKI_CONTENT: &str = "get-wiki-content";
const PAGE_ID_PARAM: &str = "pageId";
const CONTENT_UNAVAILABLE: &str = "Failed to retrieve page content";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid URL: {0}")]
    InvalidLocator(String),
    #[error("wiki client is not initialized, configure the wiki host first")]
    ClientUninitialized,
    #[error("page has no rendered body")]
    ContentUnavailable,
    #[error(transparent)]
    RemoteCallFailure(#[from] WikiClientError),
    #[error("markdown conversion failed: {0}")]
    Conversion(String),
}

/// Text payload handed back to the tool caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
}

impl ToolOutput {
    pub fn into_call_result(self) -> Value {
        json!({
            "content": [{"type": "text", "text": self.text}]
        })
    }
}

impl From<GatewayError> for ToolOutput {
    fn from(err: GatewayError) -> Self {
        let text = match err {
            GatewayError::ContentUnavailable => CONTENT_UNAVAILABLE.to_string(),
            other => format!(
                "{CONTENT_UNAVAILABLE}: {other}, Please check the URL and Extension Configuration."
            ),
        };
        Self { text }
    }
}

/// Resolves page locators against the wiki and renders the result as Markdown.
pub struct ToolGateway {
    factory: Arc<dyn WikiClientFactory>,
    converter: Arc<dyn MarkdownConverter>,
    client: RwLock<Option<Arc<dyn WikiClient>>>,
}

impl ToolGateway {
    pub fn new(factory: Arc<dyn WikiClientFactory>, converter: Arc<dyn MarkdownConverter>) -> Self {
        Self {
            factory,
            converter,
            client: RwLock::new(None),
        }
    }

    /// Replaces the client handle with one built for `record`.
    pub async fn apply_config(&self, record: &ConfigurationRecord) {
        let client = if record.is_configured() {
            match self.factory.build(record) {
                Ok(client) => {
                    info!(host = client.host(), "wiki client initialized");
                    Some(client)
                }
                Err(err) => {
                    warn!(host = %record.host, "failed to initialize wiki client: {err:#}");
                    None
                }
            }
        } else {
            debug!("wiki host not configured, client left uninitialized");
            None
        };
        *self.client.write().await = client;
    }

    pub async fn has_client(&self) -> bool {
        self.client.read().await.is_some()
    }

    /// Rebuilds the client on every configuration change until the channel closes.
    pub fn spawn_config_listener(
        self: Arc<Self>,
        manager: Arc<ConfigManager>,
        mut changes: broadcast::Receiver<ConfigChanged>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        debug!(
                            origin = change.origin.as_str(),
                            "config changed, rebuilding wiki client"
                        );
                        self.apply_config(&change.record).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "gateway missed config changes, resyncing");
                        let record = manager.get_config().await;
                        self.apply_config(&record).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn fetch_page_as_text(&self, locator: &str) -> Result<String, GatewayError> {
        let page_id = parse_page_id(locator)?;
        let client = self
            .client
            .read()
            .await
            .clone()
            .ok_or(GatewayError::ClientUninitialized)?;
        let page = client.get_page_view(&page_id).await?;
        let html = page
            .view_html
            .filter(|html| !html.trim().is_empty())
            .ok_or(GatewayError::ContentUnavailable)?;
        self.converter
            .convert(&html)
            .map_err(|err| GatewayError::Conversion(format!("{err:#}")))
    }

    /// Tool entry point. Failures are rendered into the returned text.
    pub async fn get_wiki_content(&self, url: &str) -> ToolOutput {
        match self.fetch_page_as_text(url).await {
            Ok(text) => ToolOutput { text },
            Err(err) => {
                warn!(url, error = %err, "failed to fetch wiki page");
                ToolOutput::from(err)
            }
        }
    }

    pub fn tool_descriptors() -> Value {
        json!({
            "tools": [
                {
                    "name": GET_WIKI_CONTENT,
                    "description": "Get Content of Confluence Wiki Page by URL",
                    "inputSchema": {
                        "type": "object",
                        "required": ["url"],
                        "properties": {
                            "url": {"type": "string", "description": "Wiki Page URL"}
                        }
                    }
                }
            ]
        })
    }
}

fn parse_page_id(locator: &str) -> Result<String, GatewayError> {
    let url = Url::parse(locator.trim())
        .map_err(|err| GatewayError::InvalidLocator(err.to_string()))?;
    url.query_pairs()
        .find(|(key, _)| key == PAGE_ID_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| GatewayError::InvalidLocator("missing pageId parameter".into()))
}
