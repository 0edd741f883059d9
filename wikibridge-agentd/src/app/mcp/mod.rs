pub mod protocol;
pub mod service;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use service::{McpBridgeError, McpBridgeService};
