pub mod aggregate;
pub mod events;
pub mod value_object;

pub use aggregate::{McpSession, SessionStatus};
pub use events::{McpDomainEvent, McpEventEnvelope};
pub use value_object::{SessionId, ToolName};
