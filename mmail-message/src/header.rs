//! Header storage, address formatting and line folding.

use std::collections::BTreeMap;

use crate::encoder::WordEncoder;

/// Header field name to its already-encoded values.
pub type Headers = BTreeMap<String, Vec<String>>;

/// Soft limit for a header line, as recommended by RFC 2047.
const MAX_LINE_LEN: usize = 76;

/// Set `field` to `values`, replacing any entry whose name differs only in
/// ASCII case.
pub fn set_field(headers: &mut Headers, field: impl Into<String>, values: Vec<String>) {
    let field = field.into();
    headers.retain(|name, _| !name.eq_ignore_ascii_case(&field));
    headers.insert(field, values);
}

/// Look up `field` ignoring ASCII case, as header names are compared.
#[must_use]
pub fn get_field<'h>(headers: &'h Headers, field: &str) -> Option<&'h [String]> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(field))
        .map(|(_, values)| values.as_slice())
}

/// Whether `text` contains one of the RFC 5322 specials `()<>[]:;@\,."`.
#[must_use]
pub fn has_specials(text: &str) -> bool {
    text.bytes().any(|b| {
        matches!(
            b,
            b'(' | b')' | b'<' | b'>' | b'[' | b']' | b':' | b';' | b'@' | b'\\' | b',' | b'.' | b'"'
        )
    })
}

/// Format `address` with an optional display name as an RFC 5322 mailbox.
///
/// An empty name yields the bare address. A name the encoder leaves alone is
/// quoted, unless it contains specials, in which case it is always B-encoded
/// regardless of `encoder`. Anything else uses the encoder's output.
#[must_use]
pub fn format_address(encoder: WordEncoder, charset: &str, address: &str, name: &str) -> String {
    if name.is_empty() {
        return address.to_string();
    }

    let mut formatted = String::with_capacity(name.len() + address.len() + 5);
    let encoded = encoder.encode(charset, name);
    if encoded == name && !has_specials(name) {
        quote_into(&mut formatted, name);
    } else if has_specials(name) {
        if encoded == name {
            formatted.push_str(&force_encode(charset, name));
        } else {
            formatted.push_str(&WordEncoder::B.encode(charset, name));
        }
    } else {
        formatted.push_str(&encoded);
    }

    formatted.push_str(" <");
    formatted.push_str(address);
    formatted.push('>');
    formatted
}

/// B-encode a value even when it is plain ASCII.
fn force_encode(charset: &str, name: &str) -> String {
    use base64::Engine;

    let bytes = crate::encoder::transcode(charset, name);
    format!(
        "=?{charset}?b?{}?=",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// `value` as an RFC 5322 quoted string.
pub(crate) fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    quote_into(&mut out, value);
    out
}

fn quote_into(out: &mut String, name: &str) {
    out.push('"');
    for c in name.chars() {
        if c == '\\' || c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

/// Render `key: v1, v2, ...\r\n`, folding so that lines stay within 76
/// columns wherever the value leaves room to break.
///
/// Between list values the fold goes after the `", "` separator, so removing
/// every `"\r\n "` gives back the comma-joined list. Inside a value (and
/// before the first one) a `CRLF` is inserted in front of an existing space,
/// which is how split encoded words end up on their own lines. A single word
/// longer than a line is left whole.
#[must_use]
pub fn fold_header(key: &str, values: &[String]) -> Vec<u8> {
    let mut out = String::with_capacity(key.len() + 2 + values.iter().map(|v| v.len() + 4).sum::<usize>());
    out.push_str(key);
    out.push(':');

    if values.is_empty() {
        out.push_str("\r\n");
        return out.into_bytes();
    }

    let mut column = key.len() + 1;

    for (index, value) in values.iter().enumerate() {
        let mut words = value.split(' ');
        let first = words.next().unwrap_or_default();

        if index == 0 {
            column = push_word(&mut out, column, first);
        } else {
            out.push_str(", ");
            column += 2;
            if column + first.len() > MAX_LINE_LEN {
                out.push_str("\r\n ");
                column = 1;
            }
            out.push_str(first);
            column += first.len();
        }

        for word in words {
            column = push_word(&mut out, column, word);
        }
    }

    out.push_str("\r\n");
    out.into_bytes()
}

/// Append `" word"`, breaking the line in front of the space when the word
/// would not fit. Returns the new column.
fn push_word(out: &mut String, column: usize, word: &str) -> usize {
    let column = if !word.is_empty() && column + 1 + word.len() > MAX_LINE_LEN {
        out.push_str("\r\n");
        0
    } else {
        column
    };
    out.push(' ');
    out.push_str(word);
    column + 1 + word.len()
}
