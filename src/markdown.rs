//! Markdown rendering and HTML allowlist filtering.
//!
//! Body fields are stored as markdown. The `html*` conversions render them
//! with `pulldown-cmark` and then keep only the tags of one of three
//! allowlists. Disallowed tags are removed but their inner text is kept;
//! `<script>` and `<style>` elements are removed with their contents.
//!
//! Embeds use a pseudo-markdown link recognised only by
//! [`render_with_iframes`]:
//!
//! ```text
//! [iframe:640x360 "Interview"](https://video.example.org/embed/42)
//! ```

use pulldown_cmark::{html, Options, Parser};
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Tags kept by the `html` conversion.
pub const BASE_TAGS: &[&str] = &[
    "a", "p", "br", "hr", "strong", "em", "b", "i", "u", "s", "del", "sup", "sub", "span",
    "ul", "ol", "li", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "code", "pre",
    "table", "thead", "tbody", "tr", "th", "td", "img",
];

/// Tags kept by the `html_strict` conversion: no embedded media.
pub const STRICT_TAGS: &[&str] = &[
    "a", "p", "br", "hr", "strong", "em", "b", "i", "u", "s", "del", "sup", "sub", "span",
    "ul", "ol", "li", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "code", "pre",
    "table", "thead", "tbody", "tr", "th", "td",
];

/// Tags kept by the `html_iframe` conversion.
pub const IFRAME_TAGS: &[&str] = &[
    "a", "p", "br", "hr", "strong", "em", "b", "i", "u", "s", "del", "sup", "sub", "span",
    "ul", "ol", "li", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "code", "pre",
    "table", "thead", "tbody", "tr", "th", "td", "img", "iframe",
];

static IFRAME_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\[iframe:(\d+)x(\d+)(?:\s+"([^"]*)")?\]\(([^)\s]+)\)"#).expect("valid regex")
});
static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("valid regex"));
static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").expect("valid regex"));
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<(/?)([a-zA-Z][a-zA-Z0-9]*)([^>]*)>").expect("valid regex"));
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([a-zA-Z][a-zA-Z0-9_:-]*)\s*=\s*("[^"]*"|'[^']*'|[^\s"'>]+)"#).expect("valid regex")
});

/// Render markdown to HTML.
pub fn render(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(markdown, options);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Render markdown after expanding iframe pseudo-links into `<iframe>`s.
pub fn render_with_iframes(markdown: &str) -> String {
    let expanded = IFRAME_LINK.replace_all(markdown, |caps: &Captures| {
        let title = caps.get(3).map_or("", |m| m.as_str());
        format!(
            r#"<iframe width="{}" height="{}" title="{}" src="{}"></iframe>"#,
            &caps[1],
            &caps[2],
            escape_attribute(title),
            escape_attribute(&caps[4])
        )
    });
    render(&expanded)
}

/// Keep only the allowed tags of an HTML fragment.
///
/// Event handler attributes and `javascript:` URLs are dropped from the
/// tags that are kept.
pub fn sanitize(html: &str, allowed_tags: &[&str]) -> String {
    let without_scripts = SCRIPT_BLOCK.replace_all(html, "");
    let without_styles = STYLE_BLOCK.replace_all(&without_scripts, "");

    TAG.replace_all(&without_styles, |caps: &Captures| {
        let closing = &caps[1];
        let name = caps[2].to_ascii_lowercase();
        if !allowed_tags.contains(&name.as_str()) {
            return String::new();
        }
        if !closing.is_empty() {
            return format!("</{}>", name);
        }
        let raw = &caps[3];
        let self_closing = raw.trim_end().ends_with('/');
        let mut tag = format!("<{}", name);
        for attr in ATTRIBUTE.captures_iter(raw) {
            let key = attr[1].to_ascii_lowercase();
            let value = &attr[2];
            if key.starts_with("on") || value.to_ascii_lowercase().contains("javascript:") {
                continue;
            }
            tag.push_str(&format!(" {}={}", key, value));
        }
        if self_closing {
            tag.push_str(" /");
        }
        tag.push('>');
        tag
    })
    .into_owned()
}

fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;").replace('<', "&lt;")
}
