//! Markup produced for revealed text.

use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, html};

/// Formats fully revealed text as rich markup.
///
/// Runs at most once per rich-render interval per node, so implementations
/// may be expensive.
pub trait RichFormatter: std::fmt::Debug {
    fn format(&self, text: &str) -> String;
}

/// CommonMark to HTML via pulldown-cmark.
///
/// Raw HTML in the source is emitted as escaped text and script-bearing
/// link or image destinations are replaced with `#`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownFormatter;

impl MarkdownFormatter {
    pub fn new() -> Self {
        Self
    }

    fn options() -> Options {
        Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS
    }
}

impl RichFormatter for MarkdownFormatter {
    fn format(&self, text: &str) -> String {
        let parser = Parser::new_ext(text, Self::options()).map(sanitize_event);
        let mut out = String::with_capacity(text.len() * 3 / 2);
        html::push_html(&mut out, parser);
        out
    }
}

fn sanitize_event(event: Event<'_>) -> Event<'_> {
    match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Link {
            link_type,
            dest_url: safe_url(dest_url),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Image {
            link_type,
            dest_url: safe_url(dest_url),
            title,
            id,
        }),
        other => other,
    }
}

fn safe_url(url: CowStr<'_>) -> CowStr<'_> {
    const BLOCKED: [&str; 3] = ["javascript:", "vbscript:", "data:"];
    let normalized: String = url
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    if BLOCKED.iter().any(|scheme| normalized.starts_with(scheme)) {
        CowStr::Borrowed("#")
    } else {
        url
    }
}

/// Cheap markup for text still being revealed: HTML-escaped, newlines as
/// `<br>`.
pub fn plain_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '\n' => out.push_str("<br>"),
            '\r' => {}
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_markup_escapes() {
        assert_eq!(
            plain_markup("a < b & \"c\"\nnext"),
            "a &lt; b &amp; &quot;c&quot;<br>next"
        );
        assert_eq!(plain_markup("line\r\nbreak"), "line<br>break");
    }

    #[test]
    fn test_markdown_basic() {
        let html = MarkdownFormatter::new().format("**bold** text");
        assert_eq!(html, "<p><strong>bold</strong> text</p>\n");
    }

    #[test]
    fn test_markdown_escapes_raw_html() {
        let html = MarkdownFormatter::new().format("hi <script>alert(1)</script>");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_markdown_neutralizes_script_links() {
        let html = MarkdownFormatter::new().format("[x](javascript:alert(1))");
        assert!(!html.contains("javascript:"));
        assert!(html.contains("href=\"#\""));

        let html = MarkdownFormatter::new().format("[ok](https://example.com)");
        assert!(html.contains("href=\"https://example.com\""));
    }
}
