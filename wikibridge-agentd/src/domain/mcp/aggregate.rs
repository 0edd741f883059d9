use super::events::{McpDomainEvent, McpEventEnvelope};
use super::value_object::{SessionId, ToolName};
use chrono::{DateTime, Utc};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Negotiating,
    Active,
    Closed,
}

/// Aggregate capturing the lifecycle of one SSE-bound MCP session.
#[derive(Clone, Debug)]
pub struct McpSession {
    id: SessionId,
    protocol_version: Option<String>,
    client_name: Option<String>,
    status: SessionStatus,
    created_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
}

impl McpSession {
    pub fn new() -> Self {
        Self::with_id(SessionId::new())
    }

    pub fn with_id(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            protocol_version: None,
            client_name: None,
            status: SessionStatus::Negotiating,
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id.clone()
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    pub fn client_name(&self) -> Option<&str> {
        self.client_name.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_active_at(&self) -> DateTime<Utc> {
        self.last_active_at
    }

    /// Completes the handshake and transitions session into active state.
    pub fn complete_handshake(
        &mut self,
        protocol_version: String,
        client_name: Option<String>,
    ) -> Result<McpEventEnvelope, String> {
        if matches!(self.status, SessionStatus::Closed) {
            return Err("handshake attempted on closed session".into());
        }
        if self.protocol_version.is_some() {
            return Err("handshake already completed".into());
        }
        if protocol_version.trim().is_empty() {
            return Err("protocol version cannot be empty".into());
        }
        self.protocol_version = Some(protocol_version.clone());
        self.client_name = client_name.clone();
        self.status = SessionStatus::Active;
        self.last_active_at = Utc::now();
        Ok(McpEventEnvelope::new(
            self.id.clone(),
            McpDomainEvent::SessionEstablished {
                protocol_version,
                client_name,
            },
        ))
    }

    /// Records invocation of a tool, enforcing active session state.
    pub fn record_tool_invocation(&mut self, tool: ToolName) -> Result<McpEventEnvelope, String> {
        if !matches!(self.status, SessionStatus::Active) {
            return Err("tools can be invoked only on active sessions".into());
        }
        self.last_active_at = Utc::now();
        Ok(McpEventEnvelope::new(
            self.id.clone(),
            McpDomainEvent::ToolInvoked { tool },
        ))
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    pub fn close(&mut self, reason: Option<String>) -> Result<McpEventEnvelope, String> {
        if matches!(self.status, SessionStatus::Closed) {
            return Err("session already closed".into());
        }
        self.status = SessionStatus::Closed;
        self.last_active_at = Utc::now();
        Ok(McpEventEnvelope::new(
            self.id.clone(),
            McpDomainEvent::SessionClosed { reason },
        ))
    }
}

impl Default for McpSession {
    fn default() -> Self {
        Self::new()
    }
}
