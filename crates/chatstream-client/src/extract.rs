//! Reads one string field out of a JSON document that is still arriving.
//!
//! The document is invalid JSON until the stream ends, so there is no full parse. A regex finds
//! the opening `"field": "` and a small scanner decodes the string body up to the closing quote
//! or the end of the input, whichever comes first. Decoding stops before an escape sequence that
//! is not complete yet, which keeps the decoded value of a prefix a prefix of the decoded value.

use regex::Regex;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct FieldExtractor {
    field: String,
    opening: Regex,
}

impl FieldExtractor {
    pub fn new(field: impl Into<String>) -> Result<Self, regex::Error> {
        let field = field.into();
        let opening = Regex::new(&format!(r#""{}"\s*:\s*""#, regex::escape(&field)))?;
        Ok(Self { field, opening })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Decoded field value as far as `document` reaches, or `None` if the field has not started.
    pub fn value(&self, document: &str) -> Option<String> {
        let found = self.opening.find(document)?;
        Some(scan_string(&document[found.end()..]))
    }

    /// New characters of the field contributed by `fragment`, the tail of `accumulated`.
    ///
    /// Returns `None` when nothing new is visible, when the value shrank or was replaced, or when
    /// `fragment` is not actually the tail of `accumulated`.
    pub fn delta(&self, accumulated: &str, fragment: &str) -> Option<String> {
        let current = self.value(accumulated)?;
        let Some(previous_doc) = accumulated.strip_suffix(fragment) else {
            trace!(field = %self.field, "fragment is not the tail of the document");
            return None;
        };
        let previous = self.value(previous_doc).unwrap_or_default();
        if current.len() > previous.len() && current.starts_with(&previous) {
            return Some(current[previous.len()..].to_string());
        }
        if !current.starts_with(&previous) {
            trace!(field = %self.field, "field value diverged; delta suppressed");
        }
        None
    }
}

fn scan_string(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(c) = rest.chars().next() {
        match c {
            '"' => break,
            '\\' => match decode_escape(rest) {
                Some((decoded, used)) => {
                    out.push(decoded);
                    rest = &rest[used..];
                }
                None => break,
            },
            _ => {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    out
}

/// Decodes the escape at the start of `input` (which begins with `\`). Returns the character and
/// the number of bytes consumed, or `None` if the escape is cut off.
fn decode_escape(input: &str) -> Option<(char, usize)> {
    let kind = input[1..].chars().next()?;
    let simple = match kind {
        'n' => Some('\n'),
        't' => Some('\t'),
        'r' => Some('\r'),
        'b' => Some('\u{0008}'),
        'f' => Some('\u{000c}'),
        '"' | '\\' | '/' => Some(kind),
        'u' => None,
        other => return Some((other, 1 + other.len_utf8())),
    };
    if let Some(c) = simple {
        return Some((c, 2));
    }

    let high = hex4(input.get(2..6)?)?;
    if !(0xD800..0xDC00).contains(&high) {
        return Some((char::from_u32(high).unwrap_or(char::REPLACEMENT_CHARACTER), 6));
    }
    let tail = &input[6..];
    if tail.len() < 6 && ("\\u".starts_with(tail) || tail.starts_with("\\u")) {
        return None;
    }
    if let Some(low) = tail
        .strip_prefix("\\u")
        .and_then(|t| t.get(..4))
        .and_then(hex4)
        .filter(|low| (0xDC00..0xE000).contains(low))
    {
        let combined = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
        return Some((char::from_u32(combined).unwrap_or(char::REPLACEMENT_CHARACTER), 12));
    }
    Some((char::REPLACEMENT_CHARACTER, 6))
}

fn hex4(digits: &str) -> Option<u32> {
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}
