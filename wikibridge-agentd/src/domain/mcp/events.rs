use super::value_object::{SessionId, ToolName};
use chrono::{DateTime, Utc};

#[derive(Clone, Debug, PartialEq)]
pub enum McpDomainEvent {
    SessionEstablished {
        protocol_version: String,
        client_name: Option<String>,
    },
    ToolInvoked {
        tool: ToolName,
    },
    SessionClosed {
        reason: Option<String>,
    },
}

impl McpDomainEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            McpDomainEvent::SessionEstablished { .. } => "mcp.session.established",
            McpDomainEvent::ToolInvoked { .. } => "mcp.tool.invoked",
            McpDomainEvent::SessionClosed { .. } => "mcp.session.closed",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct McpEventEnvelope {
    pub session_id: SessionId,
    pub occurred_at: DateTime<Utc>,
    pub event: McpDomainEvent,
}

impl McpEventEnvelope {
    pub fn new(session_id: SessionId, event: McpDomainEvent) -> Self {
        Self {
            session_id,
            occurred_at: Utc::now(),
            event,
        }
    }
}
