pub trait MarkdownConverter: Send + Sync {
    fn convert(&self, html: &str) -> anyhow::Result<String>;
}
