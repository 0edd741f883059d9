pub mod service;

pub use service::{GatewayError, ToolGateway, ToolOutput, GET_WIKI_CONTENT};
