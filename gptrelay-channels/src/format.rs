//! Rendering of answer text for Telegram

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Longest text Telegram accepts in one message
pub const MAX_MESSAGE_CHARS: usize = 4096;

static CODE_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[\w+-]*\n?([\s\S]*?)```").expect("valid regex"));
static INLINE_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`\n]+)`").expect("valid regex"));
static HEADER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}\s+(.+)$").expect("valid regex"));
static QUOTE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^>\s?(.*)$").expect("valid regex"));
static LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\((https?://[^)\s]+)\)").expect("valid regex"));
static BOLD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("valid regex"));
static BOLD_UNDERSCORE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"__(.+?)__").expect("valid regex"));
static ITALIC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[\s(])_([^_\n]+)_").expect("valid regex"));
static STRIKE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"~~(.+?)~~").expect("valid regex"));
static BULLET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[-*]\s+").expect("valid regex"));

fn escape(text: &str) -> String {
    html_escape::encode_text(text).into_owned()
}

/// Convert the Markdown subset ChatGPT answers use into Telegram HTML
pub fn markdown_to_html(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    // Code is stashed so nothing below rewrites it
    let mut code_blocks: Vec<String> = Vec::new();
    let result = CODE_BLOCK_RE.replace_all(text, |caps: &Captures| {
        code_blocks.push(caps[1].to_string());
        format!("\x00CB{}\x00", code_blocks.len() - 1)
    });

    let mut inline_codes: Vec<String> = Vec::new();
    let result = INLINE_CODE_RE.replace_all(&result, |caps: &Captures| {
        inline_codes.push(caps[1].to_string());
        format!("\x00IC{}\x00", inline_codes.len() - 1)
    });

    let result = HEADER_RE.replace_all(&result, "$1");
    let result = QUOTE_RE.replace_all(&result, "$1");
    let result = escape(&result);

    let result = LINK_RE.replace_all(&result, r#"<a href="$2">$1</a>"#);
    let result = BOLD_RE.replace_all(&result, "<b>$1</b>");
    let result = BOLD_UNDERSCORE_RE.replace_all(&result, "<b>$1</b>");
    let result = ITALIC_RE.replace_all(&result, "$1<i>$2</i>");
    let result = STRIKE_RE.replace_all(&result, "<s>$1</s>");
    let mut result = BULLET_RE.replace_all(&result, "• ").into_owned();

    for (i, code) in inline_codes.iter().enumerate() {
        result = result.replace(
            &format!("\x00IC{i}\x00"),
            &format!("<code>{}</code>", escape(code)),
        );
    }
    for (i, code) in code_blocks.iter().enumerate() {
        result = result.replace(
            &format!("\x00CB{i}\x00"),
            &format!("<pre><code>{}</code></pre>", escape(code)),
        );
    }

    result
}

/// Split text into chunks of at most `max_chars` characters, preferring line breaks
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.chars().count() > max_chars {
        let limit = rest
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..limit];
        let cut = match window.rfind('\n') {
            Some(i) if i > 0 => i,
            _ => limit,
        };
        chunks.push(rest[..cut].to_string());
        rest = rest[cut..].strip_prefix('\n').unwrap_or(&rest[cut..]);
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_basic() {
        assert_eq!(markdown_to_html("Hello **world**"), "Hello <b>world</b>");
        assert_eq!(markdown_to_html("Hello _world_"), "Hello <i>world</i>");
        assert_eq!(markdown_to_html("~~gone~~"), "<s>gone</s>");
    }

    #[test]
    fn test_markdown_code_is_escaped_not_formatted() {
        let output = markdown_to_html("Use `a<b> **x**` here");
        assert_eq!(output, "Use <code>a&lt;b&gt; **x**</code> here");

        let output = markdown_to_html("```rust\nfn main() { let _a = 1 & 2; }\n```");
        assert!(output.starts_with("<pre><code>fn main()"));
        assert!(output.contains("1 &amp; 2"));
        assert!(output.contains("_a"));
    }

    #[test]
    fn test_markdown_snake_case_is_not_italic() {
        assert_eq!(markdown_to_html("call my_func_name now"), "call my_func_name now");
    }

    #[test]
    fn test_markdown_headers_quotes_bullets() {
        let output = markdown_to_html("# Title\n> quoted\n- one\n* two");
        assert_eq!(output, "Title\nquoted\n• one\n• two");
    }

    #[test]
    fn test_markdown_link() {
        let output = markdown_to_html("[docs](https://doc.rust-lang.org)");
        assert_eq!(output, r#"<a href="https://doc.rust-lang.org">docs</a>"#);
    }

    #[test]
    fn test_markdown_escapes_html() {
        let output = markdown_to_html("<script>alert('xss')</script>");
        assert!(!output.contains("<script>"));
        assert!(output.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_split_short_message() {
        assert_eq!(split_message("hello", 10), vec!["hello"]);
    }

    #[test]
    fn test_split_prefers_newlines() {
        let chunks = split_message("aaaa\nbbbb\ncccc", 10);
        assert_eq!(chunks, vec!["aaaa\nbbbb", "cccc"]);
    }

    #[test]
    fn test_split_hard_cut_respects_chars() {
        let text = "é".repeat(25);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), text);
    }
}
