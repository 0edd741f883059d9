use crate::ports::wiki::MarkdownConverter;
use anyhow::Context;
use htmd::options::{BulletListMarker, CodeBlockStyle, HeadingStyle, HrStyle, Options};
use htmd::{Element, HtmlToMarkdown};

const DROPPED_CLASSES: [&str; 2] = ["confluence-metadata", "confluence-information-macro"];

/// HTML to Markdown conversion tuned for Confluence `body.view` markup.
#[derive(Debug, Default, Clone)]
pub struct HtmdMarkdownConverter;

impl HtmdMarkdownConverter {
    pub fn new() -> Self {
        Self
    }
}

fn options() -> Options {
    Options {
        heading_style: HeadingStyle::Atx,
        hr_style: HrStyle::Dashes,
        bullet_list_marker: BulletListMarker::Dash,
        code_block_style: CodeBlockStyle::Fenced,
        ..Default::default()
    }
}

fn is_confluence_chrome(element: &Element) -> bool {
    element.attrs.iter().any(|attr| {
        &*attr.name.local == "class"
            && attr
                .value
                .split_whitespace()
                .any(|class| DROPPED_CLASSES.contains(&class))
    })
}

fn build_converter() -> HtmlToMarkdown {
    HtmlToMarkdown::builder()
        .options(options())
        .add_handler(vec!["div", "span"], |element: Element| {
            if is_confluence_chrome(&element) {
                return None;
            }
            if element.tag == "div" {
                Some(format!("\n\n{}\n\n", element.content))
            } else {
                Some(element.content.to_string())
            }
        })
        .build()
}

impl MarkdownConverter for HtmdMarkdownConverter {
    fn convert(&self, html: &str) -> anyhow::Result<String> {
        let markdown = build_converter()
            .convert(html)
            .context("converting page HTML to markdown")?;
        Ok(markdown.trim().to_string())
    }
}
