//! Rewrites `cid:` references in HTML bodies into part URLs.
//!
//! The scanner is deliberately forgiving: anything it cannot make sense of
//! (stray `<`, unterminated tags or comments, unbalanced quotes) is copied
//! through unchanged, so a broken document still renders.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::part_url;

/// `url(cid:…)` inside a stylesheet, optionally quoted.
static CSS_CID_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"url\(\s*(?:"(?P<dq>cid:(?P<c1>[^"\\)]+))"|'(?P<sq>cid:(?P<c2>[^'\\)]+))'|(?P<bare>cid:(?P<c3>[^"'\\)\s]+)))\s*\)"#,
    )
    .expect("CSS cid pattern is valid")
});

/// Rewrite every `cid:` reference in `html` to the URL of the matching part
/// of `message_id`.
///
/// Attribute values that start with `cid:` are replaced wherever they occur;
/// inside `<style>` elements, `url(cid:…)` references are replaced. Attribute
/// order, quoting and all other markup are preserved.
pub fn rewrite_cid_references(html: &str, message_id: i64) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let markup = &rest[start..];

        if let Some(comment) = markup.strip_prefix("<!--") {
            let end = comment.find("-->").map_or(markup.len(), |i| i + 4 + 3);
            out.push_str(&markup[..end]);
            rest = &markup[end..];
            continue;
        }

        if !markup[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
            // End tags, doctypes and stray brackets carry nothing to rewrite.
            out.push('<');
            rest = &markup[1..];
            continue;
        }

        let Some(close) = find_tag_end(markup) else {
            // Not a well-formed tag: keep the bracket and resume right after it.
            out.push('<');
            rest = &markup[1..];
            continue;
        };
        let tag = &markup[..=close];
        let name = tag_name(tag);
        out.push_str(&rewrite_tag(tag, message_id));
        rest = &markup[close + 1..];

        if name.eq_ignore_ascii_case("style") && !tag.ends_with("/>") {
            let end = find_ignore_case(rest, "</style").unwrap_or(rest.len());
            out.push_str(&rewrite_stylesheet(&rest[..end], message_id));
            rest = &rest[end..];
        }
    }

    out.push_str(rest);
    out
}

/// Replace `url(cid:…)` references in CSS text, keeping the original quoting.
pub fn rewrite_stylesheet(css: &str, message_id: i64) -> Cow<'_, str> {
    CSS_CID_URL.replace_all(css, |caps: &Captures<'_>| {
        let whole = &caps[0];
        let (replace, cid) = ["dq", "sq", "bare"]
            .iter()
            .zip(["c1", "c2", "c3"])
            .find_map(|(r, c)| Some((caps.name(r)?.as_str(), caps.name(c)?.as_str())))
            .unwrap_or((whole, whole));
        whole.replacen(replace, &part_url(message_id, cid), 1)
    })
}

/// Offset of the `>` that closes the tag starting at `markup[0]`, skipping
/// quoted attribute values.
fn find_tag_end(markup: &str) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, b) in markup.bytes().enumerate().skip(1) {
        match (quote, b) {
            (Some(q), _) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(b),
            (None, b'>') => return Some(i),
            (None, b'<') => return None,
            _ => {}
        }
    }
    None
}

fn tag_name(tag: &str) -> &str {
    let inner = &tag[1..];
    let end = inner
        .find(|c: char| c.is_ascii_whitespace() || c == '>' || c == '/')
        .unwrap_or(inner.len());
    &inner[..end]
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
}

/// Rewrite the attribute values of one complete start tag.
///
/// Quotes open and close exactly where [`find_tag_end`] saw them; a quote
/// that never closes leaves the remainder of the tag untouched.
fn rewrite_tag(tag: &str, message_id: i64) -> String {
    let bytes = tag.as_bytes();
    let mut out = String::with_capacity(tag.len());
    let name_end = 1 + tag_name(tag).len();
    out.push_str(&tag[..name_end]);

    let mut i = name_end;
    while i < bytes.len() {
        match bytes[i] {
            b'=' => {}
            q @ (b'"' | b'\'') => {
                // A quote not preceded by `=` is part of a malformed name.
                let end = closing_quote(tag, i, q).map_or(tag.len(), |close| close + 1);
                out.push_str(&tag[i..end]);
                i = end;
                continue;
            }
            _ => {
                let next = tag[i..]
                    .find(['=', '"', '\''])
                    .map_or(tag.len(), |offset| i + offset);
                out.push_str(&tag[i..next]);
                i = next;
                continue;
            }
        }

        out.push('=');
        i += 1;
        let ws = tag[i..]
            .find(|c: char| !c.is_ascii_whitespace())
            .unwrap_or(tag.len() - i);
        out.push_str(&tag[i..i + ws]);
        i += ws;

        match bytes.get(i) {
            Some(&q @ (b'"' | b'\'')) => {
                let Some(close) = closing_quote(tag, i, q) else {
                    out.push_str(&tag[i..]);
                    break;
                };
                out.push(q as char);
                out.push_str(&rewrite_attribute_value(&tag[i + 1..close], message_id));
                out.push(q as char);
                i = close + 1;
            }
            _ => {
                let end = tag[i..]
                    .find(|c: char| c.is_ascii_whitespace() || c == '>')
                    .map_or(tag.len(), |o| i + o);
                out.push_str(&rewrite_attribute_value(&tag[i..end], message_id));
                i = end;
            }
        }
    }
    out
}

/// Offset of the quote matching the one at `tag[open]`.
fn closing_quote(tag: &str, open: usize, quote: u8) -> Option<usize> {
    tag[open + 1..]
        .find(quote as char)
        .map(|offset| open + 1 + offset)
}

fn rewrite_attribute_value(value: &str, message_id: i64) -> Cow<'_, str> {
    match value.strip_prefix("cid:") {
        Some(cid) if !cid.is_empty() => Cow::Owned(part_url(message_id, cid)),
        _ => Cow::Borrowed(value),
    }
}
