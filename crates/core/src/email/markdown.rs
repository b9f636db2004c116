use async_trait::async_trait;
use pulldown_cmark::{Options, Parser, html};

use super::{EmailRenderer, RenderError};

/// Renders Markdown into HTML locally, without calling any service.
#[derive(Clone, Copy, Debug, Default)]
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    /// Renders `text` synchronously.
    pub fn render_html(&self, text: &str) -> String {
        let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
        let parser = Parser::new_ext(text, options);
        let mut body = String::with_capacity(text.len() * 3 / 2);
        html::push_html(&mut body, parser);
        body
    }
}

#[async_trait]
impl EmailRenderer for MarkdownRenderer {
    async fn render(&self, text: &str) -> Result<String, RenderError> {
        if text.trim().is_empty() {
            return Err(RenderError("nothing to render".to_owned()));
        }
        Ok(self.render_html(text))
    }
}
