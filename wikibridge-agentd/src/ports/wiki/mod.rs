pub mod client_port;
pub mod converter_port;

pub use client_port::{WikiClient, WikiClientError, WikiClientFactory, WikiPage};
pub use converter_port::MarkdownConverter;
