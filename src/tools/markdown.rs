//! HTML to Markdown conversion for fetched pages
//!
//! Regex based and deliberately lossy: keeps headings, links, emphasis, list
//! items and table cells, and drops everything a reader would not see.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref HIDDEN_BLOCKS: Vec<Regex> = ["script", "style", "head", "noscript", "svg", "iframe", "template"]
        .iter()
        .map(|tag| Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")).unwrap())
        .collect();
    static ref COMMENT: Regex = Regex::new(r"(?s)<!--.*?-->").unwrap();
    static ref HEADING: Regex = Regex::new(r"(?is)<h([1-6])\b[^>]*>(.*?)</h[1-6]\s*>").unwrap();
    static ref LINK: Regex =
        Regex::new(r#"(?is)<a\b[^>]*?href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a\s*>"#).unwrap();
    static ref BOLD: Regex = Regex::new(r"(?is)<(?:b|strong)\b[^>]*>(.*?)</(?:b|strong)\s*>").unwrap();
    static ref ITALIC: Regex = Regex::new(r"(?is)<(?:i|em)\b[^>]*>(.*?)</(?:i|em)\s*>").unwrap();
    static ref LIST_ITEM: Regex = Regex::new(r"(?i)<li\b[^>]*>").unwrap();
    static ref LINE_BREAK: Regex = Regex::new(r"(?i)<br\s*/?>").unwrap();
    static ref BLOCK: Regex = Regex::new(
        r"(?i)</?(?:p|div|section|article|header|footer|nav|main|aside|ul|ol|table|thead|tbody|tr|blockquote|pre|form|figure|figcaption|h[1-6])\b[^>]*>"
    )
    .unwrap();
    static ref CELL: Regex = Regex::new(r"(?i)<t[dh]\b[^>]*>").unwrap();
    static ref ANY_TAG: Regex = Regex::new(r"(?s)<[^>]*>").unwrap();
    static ref DECIMAL_ENTITY: Regex = Regex::new(r"&#(\d+);").unwrap();
    static ref HEX_ENTITY: Regex = Regex::new(r"(?i)&#x([0-9a-f]+);").unwrap();
    static ref INLINE_SPACE: Regex = Regex::new(r"[ \t\u{a0}]+").unwrap();
    static ref EXCESS_NEWLINES: Regex = Regex::new(r"\n{3,}").unwrap();
}

const NAMED_ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", " "),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&apos;", "'"),
    ("&ndash;", "-"),
    ("&mdash;", "-"),
    ("&deg;", "°"),
    ("&hellip;", "..."),
];

fn strip_tags(fragment: &str) -> String {
    ANY_TAG.replace_all(fragment, "").trim().to_string()
}

fn decode_entities(text: &str) -> String {
    let mut out = text.to_string();
    for (entity, replacement) in NAMED_ENTITIES {
        out = out.replace(entity, replacement);
    }
    let decode = |caps: &Captures, radix: u32| {
        u32::from_str_radix(&caps[1], radix)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    };
    out = DECIMAL_ENTITY
        .replace_all(&out, |caps: &Captures| decode(caps, 10))
        .to_string();
    out = HEX_ENTITY
        .replace_all(&out, |caps: &Captures| decode(caps, 16))
        .to_string();
    // Last, so "&amp;lt;" stays "&lt;"
    out.replace("&amp;", "&")
}

/// Convert an HTML document to Markdown-flavoured plain text
pub fn html_to_markdown(html: &str) -> String {
    let mut text = COMMENT.replace_all(html, "").to_string();
    for block in HIDDEN_BLOCKS.iter() {
        text = block.replace_all(&text, "").to_string();
    }

    text = BOLD.replace_all(&text, "**$1**").to_string();
    text = ITALIC.replace_all(&text, "*$1*").to_string();
    text = HEADING
        .replace_all(&text, |caps: &Captures| {
            let level: usize = caps[1].parse().unwrap_or(1);
            format!("\n\n{} {}\n\n", "#".repeat(level), strip_tags(&caps[2]))
        })
        .to_string();
    text = LINK
        .replace_all(&text, |caps: &Captures| {
            let label = strip_tags(&caps[2]);
            let href = caps[1].trim();
            if label.is_empty() || href.is_empty() || href.starts_with("javascript:") {
                label
            } else {
                format!("[{}]({})", label, href)
            }
        })
        .to_string();
    text = LIST_ITEM.replace_all(&text, "\n- ").to_string();
    text = LINE_BREAK.replace_all(&text, "\n").to_string();
    text = CELL.replace_all(&text, " | ").to_string();
    text = BLOCK.replace_all(&text, "\n\n").to_string();
    text = ANY_TAG.replace_all(&text, "").to_string();

    let text = decode_entities(&text);
    text.lines()
        .map(|line| INLINE_SPACE.replace_all(line, " ").trim().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_blank_lines(text: &str) -> String {
    EXCESS_NEWLINES.replace_all(text, "\n\n").to_string()
}

/// Bound `content` to at most `max_chars` characters, keeping the head and tail
/// around a visible truncation notice. The notice counts against the bound.
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_string();
    }

    let notice = format!(
        "\n..._This content has been truncated to stay below {} characters_...\n",
        max_chars
    );
    let notice_len = notice.chars().count();
    if max_chars <= notice_len {
        return content.chars().take(max_chars).collect();
    }

    let budget = max_chars - notice_len;
    let head_len = budget / 2;
    let tail_len = budget - head_len;

    let head: String = content.chars().take(head_len).collect();
    let tail: String = content.chars().skip(total - tail_len).collect();
    format!("{}{}{}", head, notice, tail)
}

/// Normalize converted page text: trim, collapse runs of blank lines and
/// bound the length.
pub fn prepare_page_text(markdown: &str, max_chars: usize) -> String {
    let trimmed = markdown
        .trim()
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    let collapsed = collapse_blank_lines(&trimmed);
    collapse_blank_lines(&truncate_content(&collapsed, max_chars))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headings_links_and_lists() {
        let html = r#"<html><head><title>x</title></head><body>
            <h2>Largest <em>cities</em></h2>
            <p>See <a href="https://example.com/tokyo">Tokyo</a> &amp; more.</p>
            <ul><li>Delhi</li><li>Shanghai</li></ul>
            <script>var hidden = 1;</script>
        </body></html>"#;
        let md = html_to_markdown(html);
        assert!(md.contains("## Largest *cities*"));
        assert!(md.contains("[Tokyo](https://example.com/tokyo) & more."));
        assert!(md.contains("- Delhi"));
        assert!(!md.contains("hidden"));
        assert!(!md.contains("<"));
    }

    #[test]
    fn test_entities_decoded_once() {
        assert_eq!(decode_entities("a &amp;lt; b &#176; &#x41;"), "a &lt; b ° A");
    }

    #[test]
    fn test_collapses_blank_runs() {
        let text = prepare_page_text("\n\n  first\n\n\n\n\nsecond  \n\n\n", 1000);
        assert_eq!(text, "first\n\nsecond");
    }

    #[test]
    fn test_truncation_respects_bound() {
        let content = "a".repeat(500) + &"z".repeat(500);
        let truncated = truncate_content(&content, 200);
        assert!(truncated.chars().count() <= 200);
        assert!(truncated.starts_with('a'));
        assert!(truncated.ends_with('z'));
        assert!(truncated.contains("truncated to stay below 200 characters"));
    }

    #[test]
    fn test_truncation_smaller_than_notice() {
        let truncated = truncate_content(&"x".repeat(100), 10);
        assert_eq!(truncated, "x".repeat(10));
    }

    #[test]
    fn test_short_content_untouched() {
        assert_eq!(truncate_content("short", 40000), "short");
    }
}
