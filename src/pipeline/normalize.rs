//! Text normalization and footer composition for outgoing posts.
//!
//! Source posts are stripped of links, mentions and markup so that the
//! relayed copy carries only the target channel's own call-to-action.

use std::sync::LazyLock;

use regex::Regex;

/// Separator placed between the cleaned text and the footer.
pub const FOOTER_SEPARATOR: &str = "\n\n";

static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\[\]]*)\]\([^()\s]*\)").unwrap());

static HTML_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<a\s[^>]*>(.*?)</a\s*>").unwrap());

static RAW_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://\S+|\b(?:www\.)?(?:t|telegram)\.me/\S+").unwrap()
});

static MENTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\B@\w+").unwrap());

static HORIZONTAL_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\S\n]+").unwrap());

static SPACE_AROUND_NEWLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" ?\n ?").unwrap());

static EXCESS_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

static HTML_ANCHOR_WITH_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*href\s*=\s*"([^"]*)"[^>]*>(.*?)</a\s*>"#).unwrap()
});

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"</?[a-zA-Z][^<>]*>").unwrap());

/// Clean a raw post: drop link markup (keeping labels), URLs and mentions,
/// then tidy whitespace. Idempotent.
///
/// Removing a mention can expose a new link, so passes repeat until the text
/// stops changing. A pass never lengthens the text.
pub fn normalize(raw: &str) -> String {
    let mut current = normalize_once(raw);
    loop {
        let next = normalize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn normalize_once(text: &str) -> String {
    let text = replace_nested(&MARKDOWN_LINK, text);
    let text = replace_nested(&HTML_LINK, &text);
    let text = RAW_URL.replace_all(&text, "");
    let text = MENTION.replace_all(&text, "");
    let text = HORIZONTAL_SPACE.replace_all(&text, " ");
    let text = SPACE_AROUND_NEWLINE.replace_all(&text, "\n");
    let text = EXCESS_NEWLINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Replace link markup with its label until none is left (labels may
/// themselves contain link markup).
fn replace_nested(pattern: &Regex, text: &str) -> String {
    let mut current = text.to_string();
    while pattern.is_match(&current) {
        current = pattern.replace_all(&current, "$1").into_owned();
    }
    current
}

/// Convert HTML-formatted text into plain text for platforms that rejected
/// the markup. Anchors become `label (url)`.
pub fn strip_markup(html: &str) -> String {
    let text = HTML_ANCHOR_WITH_HREF.replace_all(html, "$2 ($1)");
    let text = HTML_TAG.replace_all(&text, "");
    html_escape::decode_html_entities(&text).into_owned()
}

/// Fixed call-to-action appended to every post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    pub label: String,
    pub link_text: String,
    pub url: String,
}

impl Footer {
    /// Render as HTML: `label <a href="url">link text</a>`.
    pub fn render(&self) -> String {
        let link = format!(
            "<a href=\"{}\">{}</a>",
            html_escape::encode_double_quoted_attribute(&self.url),
            html_escape::encode_text(&self.link_text),
        );
        let label = self.label.trim();
        if label.is_empty() {
            link
        } else {
            format!("{} {link}", html_escape::encode_text(label))
        }
    }
}

/// Normalizes text and composes the final post body.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    footer: String,
    /// How the footer reads once posted, with and without the plain-text URL.
    footer_as_posted: [String; 2],
}

impl TextNormalizer {
    pub fn new(footer: &Footer) -> Self {
        let rendered = footer.render();
        let as_plain = strip_markup(&rendered);
        let as_visible = strip_markup(&HTML_ANCHOR_WITH_HREF.replace_all(&rendered, "$2"));
        Self {
            footer: rendered,
            footer_as_posted: [as_plain, as_visible],
        }
    }

    /// See [`normalize`].
    pub fn normalize(&self, raw: &str) -> String {
        normalize(raw)
    }

    /// The rendered footer.
    pub fn footer(&self) -> &str {
        &self.footer
    }

    /// Append the footer to already-cleaned text.
    pub fn with_footer(&self, clean: &str) -> String {
        if clean.is_empty() {
            self.footer.clone()
        } else {
            format!("{clean}{FOOTER_SEPARATOR}{}", self.footer)
        }
    }

    /// Normalize raw text and append the footer.
    pub fn compose(&self, raw: &str) -> String {
        self.with_footer(&normalize(raw))
    }

    /// Remove a trailing footer from text read back from the target, so
    /// that it fingerprints like the source post it came from.
    pub fn without_footer<'a>(&self, posted: &'a str) -> &'a str {
        let trimmed = posted.trim_end();
        for footer in &self.footer_as_posted {
            if let Some(body) = trimmed.strip_suffix(footer.as_str()) {
                return body.trim_end();
            }
        }
        posted
    }
}
