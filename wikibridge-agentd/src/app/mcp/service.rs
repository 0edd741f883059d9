use super::protocol::{
    InitializeParams, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ToolCallParams,
    JSONRPC_VERSION,
};
use crate::app::gateway::{ToolGateway, GET_WIKI_CONTENT};
use crate::domain::mcp::{McpDomainEvent, McpEventEnvelope, McpSession, SessionStatus, ToolName};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub const SERVER_NAME: &str = "wiki";
pub const SERVER_VERSION: &str = "1.1.0";
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";
const SUPPORTED_PROTOCOL_VERSIONS: [&str; 2] = ["2024-11-05", "2025-03-26"];

#[derive(Debug, Error)]
pub enum McpBridgeError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("session not initialized")]
    NotInitialized,
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),
    #[error("unsupported tool: {0}")]
    UnsupportedTool(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<McpBridgeError> for JsonRpcError {
    fn from(err: McpBridgeError) -> Self {
        let code = match &err {
            McpBridgeError::InvalidRequest(_) => -32600,
            McpBridgeError::InvalidParams(_) => -32602,
            McpBridgeError::NotInitialized => -32002,
            McpBridgeError::UnsupportedMethod(_) | McpBridgeError::UnsupportedTool(_) => -32601,
            McpBridgeError::Internal(_) => -32603,
        };
        JsonRpcError {
            code,
            message: err.to_string(),
            data: None,
        }
    }
}

/// Dispatches JSON-RPC requests of one session to the tool gateway.
pub struct McpBridgeService {
    gateway: Arc<ToolGateway>,
}

impl McpBridgeService {
    pub fn new(gateway: Arc<ToolGateway>) -> Self {
        Self { gateway }
    }

    /// Handles one inbound message. Notifications produce no response.
    pub async fn handle_message(
        &self,
        session: &mut McpSession,
        request: JsonRpcRequest,
    ) -> Option<JsonRpcResponse> {
        session.touch();
        if request.jsonrpc != JSONRPC_VERSION {
            let id = request.id?;
            return Some(JsonRpcResponse::failure(
                id,
                McpBridgeError::InvalidRequest("jsonrpc must be \"2.0\"".into()).into(),
            ));
        }
        let params = request.params.unwrap_or(Value::Null);
        let outcome = self.dispatch(session, &request.method, params).await;
        let Some(id) = request.id else {
            if let Err(err) = outcome {
                debug!(method = %request.method, %err, "notification failed");
            }
            return None;
        };
        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => JsonRpcResponse::failure(id, err.into()),
        })
    }

    async fn dispatch(
        &self,
        session: &mut McpSession,
        method: &str,
        params: Value,
    ) -> Result<Value, McpBridgeError> {
        match method {
            "initialize" => self.initialize(session, params),
            "notifications/initialized" => Ok(Value::Null),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(ToolGateway::tool_descriptors()),
            "tools/call" => self.call_tool(session, params).await,
            other => Err(McpBridgeError::UnsupportedMethod(other.to_string())),
        }
    }

    fn initialize(&self, session: &mut McpSession, params: Value) -> Result<Value, McpBridgeError> {
        let params: InitializeParams = if params.is_null() {
            InitializeParams::default()
        } else {
            serde_json::from_value(params)
                .map_err(|err| McpBridgeError::InvalidParams(err.to_string()))?
        };
        let protocol_version = negotiate_version(params.protocol_version.as_deref());
        let client_name = params.client_info.and_then(|info| info.name);
        let envelope = session
            .complete_handshake(protocol_version.to_string(), client_name)
            .map_err(McpBridgeError::InvalidRequest)?;
        log_event(&envelope);
        Ok(json!({
            "protocolVersion": protocol_version,
            "capabilities": {
                "tools": {"listChanged": false}
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": SERVER_VERSION,
            }
        }))
    }

    async fn call_tool(
        &self,
        session: &mut McpSession,
        params: Value,
    ) -> Result<Value, McpBridgeError> {
        if session.status() != &SessionStatus::Active {
            return Err(McpBridgeError::NotInitialized);
        }
        let params: ToolCallParams = serde_json::from_value(params)
            .map_err(|err| McpBridgeError::InvalidParams(err.to_string()))?;
        if params.name != GET_WIKI_CONTENT {
            return Err(McpBridgeError::UnsupportedTool(params.name));
        }
        let url = params
            .arguments
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                McpBridgeError::InvalidParams("url is required and must be a string".into())
            })?
            .to_string();
        let tool = ToolName::new(params.name).map_err(McpBridgeError::Internal)?;
        let envelope = session
            .record_tool_invocation(tool)
            .map_err(McpBridgeError::InvalidRequest)?;
        log_event(&envelope);
        let output = self.gateway.get_wiki_content(&url).await;
        Ok(output.into_call_result())
    }

    /// Marks the session closed and logs the closing event.
    pub fn close_session(&self, session: &mut McpSession, reason: &str) {
        let now = Utc::now();
        let age_ms = (now - session.created_at()).num_milliseconds();
        let idle_ms = (now - session.last_active_at()).num_milliseconds();
        if let Ok(envelope) = session.close(Some(reason.to_string())) {
            log_event(&envelope);
            debug!(session_id = %envelope.session_id, age_ms, idle_ms, "MCP session lifetime");
        }
    }
}

fn negotiate_version(requested: Option<&str>) -> &str {
    match requested {
        Some(version) if SUPPORTED_PROTOCOL_VERSIONS.contains(&version) => version,
        _ => DEFAULT_PROTOCOL_VERSION,
    }
}

fn log_event(envelope: &McpEventEnvelope) {
    let session_id = &envelope.session_id;
    let kind = envelope.event.kind();
    match &envelope.event {
        McpDomainEvent::SessionEstablished {
            protocol_version,
            client_name,
        } => info!(
            kind,
            %session_id,
            protocol_version = %protocol_version,
            client = client_name.as_deref().unwrap_or("unknown"),
            "MCP session established"
        ),
        McpDomainEvent::ToolInvoked { tool } => {
            info!(kind, %session_id, tool = tool.as_str(), "MCP tool invoked")
        }
        McpDomainEvent::SessionClosed { reason } => info!(
            kind,
            %session_id,
            reason = reason.as_deref().unwrap_or(""),
            "MCP session closed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::ConfigurationRecord;
    use crate::ports::wiki::{
        MarkdownConverter, WikiClient, WikiClientError, WikiClientFactory, WikiPage,
    };
    use async_trait::async_trait;

    struct FixedClient;

    #[async_trait]
    impl WikiClient for FixedClient {
        fn host(&self) -> &str {
            "https://wiki.example.com"
        }

        async fn get_page_view(&self, page_id: &str) -> Result<WikiPage, WikiClientError> {
            Ok(WikiPage {
                id: page_id.to_string(),
                title: None,
                view_html: Some(format!("<p>page {page_id}</p>")),
            })
        }
    }

    struct FixedFactory;

    impl WikiClientFactory for FixedFactory {
        fn build(&self, _record: &ConfigurationRecord) -> anyhow::Result<Arc<dyn WikiClient>> {
            Ok(Arc::new(FixedClient))
        }
    }

    struct PassThrough;

    impl MarkdownConverter for PassThrough {
        fn convert(&self, html: &str) -> anyhow::Result<String> {
            Ok(html.replace("<p>", "").replace("</p>", ""))
        }
    }

    async fn bridge() -> McpBridgeService {
        let gateway = Arc::new(ToolGateway::new(
            Arc::new(FixedFactory),
            Arc::new(PassThrough),
        ));
        gateway
            .apply_config(&ConfigurationRecord {
                host: "https://wiki.example.com".into(),
                ..ConfigurationRecord::default()
            })
            .await;
        McpBridgeService::new(gateway)
    }

    fn request(id: Option<i64>, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: id.map(Value::from),
            method: method.into(),
            params: Some(params),
        }
    }

    async fn initialized(bridge: &McpBridgeService) -> McpSession {
        let mut session = McpSession::new();
        let response = bridge
            .handle_message(
                &mut session,
                request(
                    Some(1),
                    "initialize",
                    json!({"protocolVersion": "2024-11-05", "clientInfo": {"name": "inspector"}}),
                ),
            )
            .await
            .unwrap();
        assert!(response.error.is_none());
        session
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let bridge = bridge().await;
        let mut session = McpSession::new();
        let response = bridge
            .handle_message(&mut session, request(Some(1), "initialize", json!({})))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], "wiki");
        assert_eq!(result["serverInfo"]["version"], "1.1.0");
        assert_eq!(result["protocolVersion"], DEFAULT_PROTOCOL_VERSION);
        assert_eq!(session.status(), &SessionStatus::Active);
    }

    #[tokio::test]
    async fn second_initialize_is_rejected() {
        let bridge = bridge().await;
        let mut session = initialized(&bridge).await;
        let response = bridge
            .handle_message(&mut session, request(Some(2), "initialize", json!({})))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32600);
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let bridge = bridge().await;
        let mut session = initialized(&bridge).await;
        let response = bridge
            .handle_message(
                &mut session,
                request(None, "notifications/initialized", Value::Null),
            )
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn tools_list_exposes_wiki_tool() {
        let bridge = bridge().await;
        let mut session = initialized(&bridge).await;
        let response = bridge
            .handle_message(&mut session, request(Some(2), "tools/list", Value::Null))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["tools"][0]["name"], GET_WIKI_CONTENT);
        assert_eq!(
            result["tools"][0]["description"],
            "Get Content of Confluence Wiki Page by URL"
        );
    }

    #[tokio::test]
    async fn call_before_initialize_is_rejected() {
        let bridge = bridge().await;
        let mut session = McpSession::new();
        let url = "https://w/?pageId=1";
        let response = bridge
            .handle_message(
                &mut session,
                request(
                    Some(3),
                    "tools/call",
                    json!({"name": GET_WIKI_CONTENT, "arguments": {"url": url}}),
                ),
            )
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32002);
    }

    #[tokio::test]
    async fn call_returns_page_text() {
        let bridge = bridge().await;
        let mut session = initialized(&bridge).await;
        let url = "https://wiki.example.com/pages/viewpage.action?pageId=77";
        let response = bridge
            .handle_message(
                &mut session,
                request(
                    Some(4),
                    "tools/call",
                    json!({"name": GET_WIKI_CONTENT, "arguments": {"url": url}}),
                ),
            )
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["content"][0]["text"], "page 77");
    }

    #[tokio::test]
    async fn call_errors_map_to_codes() {
        let bridge = bridge().await;
        let mut session = initialized(&bridge).await;
        let missing_url = bridge
            .handle_message(
                &mut session,
                request(
                    Some(5),
                    "tools/call",
                    json!({"name": GET_WIKI_CONTENT, "arguments": {}}),
                ),
            )
            .await
            .unwrap();
        assert_eq!(missing_url.error.unwrap().code, -32602);

        let unknown_tool = bridge
            .handle_message(
                &mut session,
                request(
                    Some(6),
                    "tools/call",
                    json!({"name": "delete-wiki-page", "arguments": {}}),
                ),
            )
            .await
            .unwrap();
        assert_eq!(unknown_tool.error.unwrap().code, -32601);

        let unknown_method = bridge
            .handle_message(
                &mut session,
                request(Some(7), "resources/list", Value::Null),
            )
            .await
            .unwrap();
        assert_eq!(unknown_method.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn wrong_jsonrpc_version_is_invalid_request() {
        let bridge = bridge().await;
        let mut session = McpSession::new();
        let mut req = request(Some(8), "ping", Value::Null);
        req.jsonrpc = "1.0".into();
        let response = bridge.handle_message(&mut session, req).await.unwrap();
        assert_eq!(response.error.unwrap().code, -32600);
    }

    #[tokio::test]
    async fn closed_session_rejects_further_calls() {
        let bridge = bridge().await;
        let mut session = initialized(&bridge).await;
        bridge.close_session(&mut session, "stream dropped");
        assert_eq!(session.status(), &SessionStatus::Closed);
        bridge.close_session(&mut session, "again");

        let response = bridge
            .handle_message(
                &mut session,
                request(
                    Some(9),
                    "tools/call",
                    json!({"name": GET_WIKI_CONTENT, "arguments": {"url": "https://w/"}}),
                ),
            )
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32002);
    }

    #[test]
    fn unknown_protocol_version_falls_back() {
        assert_eq!(negotiate_version(Some("2025-03-26")), "2025-03-26");
        assert_eq!(
            negotiate_version(Some("1999-01-01")),
            DEFAULT_PROTOCOL_VERSION
        );
        assert_eq!(negotiate_version(None), DEFAULT_PROTOCOL_VERSION);
    }
}
