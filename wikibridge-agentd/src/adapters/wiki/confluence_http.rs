use crate::domain::config::ConfigurationRecord;
use crate::ports::wiki::{WikiClient, WikiClientError, WikiClientFactory, WikiPage};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_BODY_PREVIEW: usize = 200;

/// Confluence REST client limited to the content-by-id call.
pub struct ConfluenceHttpClient {
    http: reqwest::Client,
    base: Url,
    host: String,
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    id: Option<String>,
    title: Option<String>,
    body: Option<ContentBody>,
}

#[derive(Debug, Deserialize)]
struct ContentBody {
    view: Option<ContentView>,
}

#[derive(Debug, Deserialize)]
struct ContentView {
    value: Option<String>,
}

impl ConfluenceHttpClient {
    pub fn new(record: &ConfigurationRecord, timeout: Duration) -> anyhow::Result<Self> {
        let host = record.host.trim().to_string();
        let base = Url::parse(&host).with_context(|| format!("invalid wiki host '{host}'"))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("wiki host '{host}' cannot be used as a base URL"));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building wiki HTTP client")?;
        Ok(Self {
            http,
            base,
            host,
            username: record.username.clone(),
            password: record.password.clone(),
        })
    }

    fn content_url(&self, page_id: &str) -> Result<Url, WikiClientError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| WikiClientError::Transport(format!("invalid wiki host '{}'", self.host)))?
            .pop_if_empty()
            .extend(["rest", "api", "content", page_id]);
        url.query_pairs_mut()
            .clear()
            .append_pair("expand", "body.view")
            .append_pair("status", "current");
        Ok(url)
    }
}

#[async_trait]
impl WikiClient for ConfluenceHttpClient {
    fn host(&self) -> &str {
        &self.host
    }

    async fn get_page_view(&self, page_id: &str) -> Result<WikiPage, WikiClientError> {
        let url = self.content_url(page_id)?;
        let response = self
            .http
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| WikiClientError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message: String = body.chars().take(ERROR_BODY_PREVIEW).collect();
            return Err(WikiClientError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let content: ContentResponse = response
            .json()
            .await
            .map_err(|err| WikiClientError::Decode(err.to_string()))?;
        Ok(WikiPage {
            id: content.id.unwrap_or_else(|| page_id.to_string()),
            title: content.title,
            view_html: content.body.and_then(|body| body.view?.value),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ConfluenceClientFactory {
    timeout: Duration,
}

impl ConfluenceClientFactory {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout: timeout.unwrap_or(DEFAULT_TIMEOUT),
        }
    }
}

impl Default for ConfluenceClientFactory {
    fn default() -> Self {
        Self::new(None)
    }
}

impl WikiClientFactory for ConfluenceClientFactory {
    fn build(&self, record: &ConfigurationRecord) -> anyhow::Result<Arc<dyn WikiClient>> {
        if !record.is_configured() {
            return Err(anyhow!("wiki host is not configured"));
        }
        let client = ConfluenceHttpClient::new(record, self.timeout)?;
        Ok(Arc::new(client))
    }
}
