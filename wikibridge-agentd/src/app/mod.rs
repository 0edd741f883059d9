pub mod config;
pub mod gateway;
pub mod mcp;
pub mod server;
