//! HTML to markdown conversion for chat providers
//!
//! Handles the small tag set our notification templates use:
//! `a, p, ul, li, strong, small, br, pre`. Anything else is stripped.
//! Both dialects share one pipeline; a [`Dialect`] only decides the bullet
//! marker and which characters get backslash-escaped, and when.

use regex::{Captures, Regex};
use std::sync::LazyLock;

const ALLOWED_TAGS: [&str; 8] = ["a", "p", "ul", "li", "strong", "small", "br", "pre"];
const LINK_DECORATION: &str = " target='_blank' rel='noopener noreferrer'";

static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--.*?-->|</?([A-Za-z][A-Za-z0-9]*)[^>]*>").expect("Invalid tag regex pattern")
});
static WHITESPACE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex pattern"));
static ANCHOR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)<a(?:\s+(?:href=["'](?P<href>[^"'<>]+)["']|title=["'](?P<title>[^"'<>]+)["']|\w+=["'][^"'<>]+["']))+"#,
    )
    .expect("Invalid anchor regex pattern")
});
static ENTITY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(amp|lt|gt|quot|apos|nbsp|#0*39);").expect("Invalid entity regex pattern")
});

/// Escaping policy for one markdown flavour
#[derive(Debug, Clone, Copy)]
pub struct Dialect {
    /// Marker that replaces `<li>`
    pub bullet: &'static str,
    /// Escaped before links and structure are rewritten
    pub pre_escape: &'static [char],
    /// Escaped last, after structural markers exist
    pub post_escape: &'static [(&'static str, &'static str)],
}

impl Dialect {
    /// Plain markdown, as chat webhooks accept it
    pub const GENERAL: Dialect = Dialect {
        bullet: "- ",
        pre_escape: &[],
        post_escape: &[],
    };

    /// Bot API markdown, where every reserved character must be escaped
    pub const STRICT: Dialect = Dialect {
        bullet: "\\- ",
        pre_escape: &['(', ')', '[', ']', '-'],
        // ` * ` only, so the `**` emphasis markers survive
        post_escape: &[
            (".", "\\."),
            ("_", "\\_"),
            (">", "\\>"),
            ("<", "\\<"),
            (" * ", " \\* "),
        ],
    };
}

/// Convert the supported HTML subset to markdown.
pub fn transcode(html: &str, dialect: &Dialect) -> String {
    let stripped = strip_tags(html);
    let mut markdown = WHITESPACE_REGEX.replace_all(&stripped, " ").into_owned();

    if markdown.starts_with('#') {
        markdown.insert(0, '\\');
    }

    for ch in dialect.pre_escape {
        markdown = markdown.replace(*ch, &format!("\\{}", ch));
    }

    markdown = markdown.replace(LINK_DECORATION, "");
    markdown = rewrite_links(&markdown);
    markdown = rewrite_structure(&markdown, dialect.bullet);
    markdown = markdown.trim_start_matches('\n').to_string();
    // After structure, so escaped payload text is never read back as markup
    markdown = decode_entities(&markdown);

    for (from, to) in dialect.post_escape {
        markdown = markdown.replace(from, to);
    }

    markdown
}

pub fn to_markdown(html: &str) -> String {
    transcode(html, &Dialect::GENERAL)
}

pub fn to_strict_markdown(html: &str) -> String {
    transcode(html, &Dialect::STRICT)
}

/// Drops tags outside the allowed set and normalises the allowed ones.
/// Anchors keep their attributes for link extraction.
fn strip_tags(html: &str) -> String {
    TAG_REGEX
        .replace_all(html, |caps: &Captures| {
            let Some(name) = caps.get(1) else {
                return String::new();
            };
            let name = name.as_str().to_ascii_lowercase();
            if !ALLOWED_TAGS.contains(&name.as_str()) {
                return String::new();
            }

            let closing = caps[0].starts_with("</");
            match (name.as_str(), closing) {
                ("a", false) => caps[0].to_string(),
                ("br", _) => "<br>".to_string(),
                (_, true) => format!("</{}>", name),
                (_, false) => format!("<{}>", name),
            }
        })
        .into_owned()
}

/// Replaces every anchor with an inline `[title](href)` link.
///
/// Anchors are deduplicated by href; the first anchor seen for an href
/// decides the replacement applied to all of them.
fn rewrite_links(markdown: &str) -> String {
    let mut seen: Vec<String> = Vec::new();
    let mut anchors = Vec::new();

    for caps in ANCHOR_REGEX.captures_iter(markdown) {
        let Some(href) = caps.name("href").map(|m| m.as_str().to_string()) else {
            continue;
        };
        if seen.contains(&href) {
            continue;
        }
        seen.push(href.clone());
        anchors.push((
            caps[0].to_string(),
            href,
            caps.name("title").map(|m| m.as_str().to_string()),
        ));
    }

    let mut result = markdown.to_string();
    for (open, href, title) in anchors {
        result = replace_anchor(&result, &open, &href, title.as_deref());
    }
    result
}

fn replace_anchor(text: &str, open: &str, href: &str, title: Option<&str>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find(open) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + open.len()..];

        // swallow `...>link text</a>` when the tag is closed
        let element = after
            .find('>')
            .filter(|&gt| !after[..gt].contains('<'))
            .and_then(|gt| {
                let body = &after[gt + 1..];
                body.find("</a>").map(|end| (&body[..end], &body[end + "</a>".len()..]))
            });

        let (label, tail) = match element {
            Some((inner, tail)) => (title.unwrap_or(inner), tail),
            None => (title.unwrap_or(href), after),
        };
        out.push('[');
        out.push_str(label);
        out.push_str("](");
        out.push_str(href);
        out.push(')');
        rest = tail;
    }

    out.push_str(rest);
    out
}

/// Decodes the entities HTML escaping produces. Single pass, so `&amp;lt;`
/// becomes `&lt;` and not `<`.
fn decode_entities(text: &str) -> String {
    ENTITY_REGEX
        .replace_all(text, |caps: &Captures| {
            let decoded = match &caps[1] {
                "amp" => "&",
                "lt" => "<",
                "gt" => ">",
                "quot" => "\"",
                "nbsp" => " ",
                _ => "'",
            };
            decoded.to_string()
        })
        .into_owned()
}

fn rewrite_structure(markdown: &str, bullet: &str) -> String {
    let replacements: [(&str, &str); 13] = [
        ("<p>", ""),
        ("</p>", "\n"),
        ("<ul>", ""),
        ("</ul>", ""),
        ("<li>", bullet),
        ("</li>", "\n"),
        ("<strong>", "**"),
        ("</strong>", "**"),
        ("<small>", ""),
        ("</small>", ""),
        ("<br>", "\n"),
        ("<pre>", "\n"),
        ("</pre>", "\n"),
    ];

    let mut result = markdown.to_string();
    for (from, to) in replacements {
        result = result.replace(from, to);
    }
    result
}
