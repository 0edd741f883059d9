pub mod confluence_http;
pub mod markdown;

pub use confluence_http::{ConfluenceClientFactory, ConfluenceHttpClient};
pub use markdown::HtmdMarkdownConverter;
