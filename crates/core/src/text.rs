use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

pub const SNIPPET_RADIUS: usize = 80;

/// Decodes raw bytes as UTF-8, falling back to Latin-1 when the bytes are not
/// valid UTF-8.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|byte| char::from(*byte)).collect(),
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Accent-folded ASCII lookup key: `"Grafotécnica  (Doc.)"` becomes
/// `"grafotecnica doc"`.
pub fn fold_key(value: &str) -> String {
    let ascii: String = value
        .nfd()
        .filter(char::is_ascii)
        .collect::<String>()
        .to_ascii_lowercase();

    ascii
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercased name without combining marks, used to compare person names.
pub fn fold_name(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect()
}

pub fn digits_only(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

/// Trimmed, non-empty lines.
pub fn prepare_lines(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// First `limit` characters of `text`.
pub fn head_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

pub fn floor_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

pub fn ceil_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// Slice of `text` between two byte offsets, widened to char boundaries.
pub fn window(text: &str, start: usize, end: usize) -> &str {
    let start = floor_boundary(text, start);
    let end = ceil_boundary(text, end.max(start));
    &text[start..end]
}

/// Byte offsets of the first case-insensitive occurrence of `value`.
pub fn locate(text: &str, value: &str) -> Option<(usize, usize)> {
    if text.is_empty() || value.is_empty() {
        return None;
    }

    if let Some(start) = text.find(value) {
        return Some((start, start + value.len()));
    }

    let lowered = text.to_lowercase();
    let needle = value.to_lowercase();
    // offsets are only transferable when lowercasing kept the byte layout
    if lowered.len() != text.len() || needle.len() != value.len() {
        return None;
    }
    lowered
        .find(&needle)
        .filter(|start| text.is_char_boundary(*start) && text.is_char_boundary(start + needle.len()))
        .map(|start| (start, start + needle.len()))
}

/// Text around `[start, end)` with `radius` bytes of context on both sides,
/// newlines flattened.
pub fn snippet_around(text: &str, start: usize, end: usize, radius: usize) -> String {
    window(text, start.saturating_sub(radius), end.saturating_add(radius))
        .replace('\n', " ")
        .trim()
        .to_string()
}

/// Strips characters in `set` from both ends.
pub fn trim_set<'a>(value: &'a str, set: &str) -> &'a str {
    value.trim_matches(|c: char| set.contains(c))
}
