//! Rewrites embedded media references to their uploaded URLs.
//!
//! Handles standard markdown images `![alt](target)` and wiki-style embeds
//! `![[target]]` / `![[target|alt]]`. Replacement is purely textual: only
//! references whose target exactly matches a mapped source are touched.

use std::collections::HashMap;

/// How a replaced reference is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStyle {
    /// The whole image construct becomes the bare uploaded URL.
    PlainUrl,
    /// A markdown image pointing at the uploaded URL, alt text preserved.
    MarkdownImage,
}

/// Replace every mapped reference in `text` and collapse excess blank lines.
///
/// Unmapped references are left byte-identical. Applying the same mapping to
/// the output again is a no-op.
pub fn rewrite(text: &str, mapping: &HashMap<String, String>, style: LinkStyle) -> String {
    let mut out = text.to_string();
    let mut replaced = false;
    for (source, url) in mapping {
        let (next, count) = replace_refs(&out, source, url, style);
        out = next;
        replaced |= count > 0;
    }
    if replaced {
        collapse_blank_lines(&out)
    } else {
        out
    }
}

/// Replace every image construct whose target is exactly `source`.
fn replace_refs(text: &str, source: &str, url: &str, style: LinkStyle) -> (String, usize) {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut count = 0;
    while let Some(pos) = rest.find("![") {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some((len, alt, target)) = parse_image(tail) {
            if target == source {
                match style {
                    LinkStyle::MarkdownImage => {
                        out.push_str("![");
                        out.push_str(alt);
                        out.push_str("](");
                        out.push_str(url);
                        out.push(')');
                    }
                    LinkStyle::PlainUrl => out.push_str(url),
                }
                count += 1;
                rest = &tail[len..];
                continue;
            }
        }
        out.push_str("![");
        rest = &tail[2..];
    }
    out.push_str(rest);
    (out, count)
}

/// Parse an image construct at the start of `tail` (which begins with `![`).
/// Returns the construct's byte length, its alt text, and its target.
fn parse_image(tail: &str) -> Option<(usize, &str, &str)> {
    if let Some(inner_start) = tail.strip_prefix("![[") {
        let end = inner_start.find("]]")?;
        let inner = &inner_start[..end];
        let (target, alt) = match inner.split_once('|') {
            Some((t, a)) => (t, a),
            None => (inner, ""),
        };
        return Some((3 + end + 2, alt, target));
    }
    let alt_end = tail[2..].find(']')? + 2;
    if !tail[alt_end..].starts_with("](") {
        return None;
    }
    let target_start = alt_end + 2;
    let target_end = tail[target_start..].find(')')? + target_start;
    Some((
        target_end + 1,
        &tail[2..alt_end],
        &tail[target_start..target_end],
    ))
}

/// Collapse runs of blank lines so no more than two consecutive newlines
/// remain. Whitespace-only lines inside a run are dropped with it.
fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0usize;
    let mut pending_ws = String::new();
    for c in text.chars() {
        match c {
            '\n' => {
                newlines += 1;
                pending_ws.clear();
                if newlines <= 2 {
                    out.push('\n');
                }
            }
            ' ' | '\t' if newlines > 0 => pending_ws.push(c),
            _ => {
                if newlines > 0 {
                    out.push_str(&pending_ws);
                    pending_ws.clear();
                    newlines = 0;
                }
                out.push(c);
            }
        }
    }
    out
}
