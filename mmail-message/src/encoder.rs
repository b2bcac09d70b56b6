//! RFC 2047 encoded-word support for header values.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use encoding_rs::Encoding;

/// Longest encoded word allowed by RFC 2047.
const MAX_ENCODED_WORD_LEN: usize = 75;

/// Room left for the encoded text once `=?UTF-8?q?` and `?=` are accounted for.
const MAX_CONTENT_LEN: usize = MAX_ENCODED_WORD_LEN - "=?UTF-8?q?".len() - "?=".len();

/// How many raw bytes fit into [`MAX_CONTENT_LEN`] base64 characters.
const MAX_BASE64_LEN: usize = MAX_CONTENT_LEN / 4 * 3;

const UPPER_HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Encoded-word flavour: `B` (base64) or `Q` (quoted-printable like).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WordEncoder {
    B,
    Q,
}

impl WordEncoder {
    const fn tag(self) -> char {
        match self {
            Self::B => 'b',
            Self::Q => 'q',
        }
    }

    /// Encode `value` as one or more encoded words in `charset`.
    ///
    /// Values made only of printable ASCII (and tabs) are returned unchanged,
    /// so encoding is idempotent for plain text. UTF-8 values are split on
    /// character boundaries so no word exceeds 75 characters; words are
    /// separated by a single space. Other charsets are transcoded and emitted
    /// as a single word.
    #[must_use]
    pub fn encode(self, charset: &str, value: &str) -> String {
        if !needs_encoding(value) {
            return value.to_string();
        }

        let mut buf = String::with_capacity(48);
        self.open_word(&mut buf, charset);

        if is_utf8(charset) {
            match self {
                Self::B => self.b_encode_utf8(&mut buf, charset, value),
                Self::Q => self.q_encode_utf8(&mut buf, charset, value),
            }
        } else {
            let bytes = transcode(charset, value);
            match self {
                Self::B => buf.push_str(&STANDARD.encode(&bytes)),
                Self::Q => write_q(&mut buf, &bytes),
            }
        }

        close_word(&mut buf);
        buf
    }

    fn b_encode_utf8(self, buf: &mut String, charset: &str, value: &str) {
        if base64_len(value.len()) <= MAX_CONTENT_LEN {
            buf.push_str(&STANDARD.encode(value));
            return;
        }

        let mut current = 0;
        let mut last = 0;
        for (index, ch) in value.char_indices() {
            let len = ch.len_utf8();
            if current + len <= MAX_BASE64_LEN {
                current += len;
            } else {
                buf.push_str(&STANDARD.encode(&value[last..index]));
                self.split_word(buf, charset);
                last = index;
                current = len;
            }
        }
        buf.push_str(&STANDARD.encode(&value[last..]));
    }

    fn q_encode_utf8(self, buf: &mut String, charset: &str, value: &str) {
        let mut current = 0;
        for ch in value.chars() {
            let mut scratch = [0u8; 4];
            let raw = ch.encode_utf8(&mut scratch).as_bytes();
            let encoded_len = match raw {
                [b] if *b == b' ' || is_q_literal(*b) => 1,
                _ => 3 * raw.len(),
            };

            if current + encoded_len > MAX_CONTENT_LEN {
                self.split_word(buf, charset);
                current = 0;
            }
            write_q(buf, raw);
            current += encoded_len;
        }
    }

    fn open_word(self, buf: &mut String, charset: &str) {
        buf.push_str("=?");
        buf.push_str(charset);
        buf.push('?');
        buf.push(self.tag());
        buf.push('?');
    }

    fn split_word(self, buf: &mut String, charset: &str) {
        close_word(buf);
        buf.push(' ');
        self.open_word(buf, charset);
    }
}

fn close_word(buf: &mut String) {
    buf.push_str("?=");
}

const fn base64_len(n: usize) -> usize {
    n.div_ceil(3) * 4
}

const fn is_q_literal(b: u8) -> bool {
    b >= b'!' && b <= b'~' && b != b'=' && b != b'?' && b != b'_'
}

fn write_q(buf: &mut String, bytes: &[u8]) {
    for &b in bytes {
        if b == b' ' {
            buf.push('_');
        } else if is_q_literal(b) {
            buf.push(char::from(b));
        } else {
            buf.push('=');
            buf.push(char::from(UPPER_HEX[usize::from(b >> 4)]));
            buf.push(char::from(UPPER_HEX[usize::from(b & 0x0f)]));
        }
    }
}

/// Whether `value` contains anything outside printable ASCII other than tab.
#[must_use]
pub fn needs_encoding(value: &str) -> bool {
    value.chars().any(|c| (c < ' ' || c > '~') && c != '\t')
}

#[must_use]
pub fn is_utf8(charset: &str) -> bool {
    charset.eq_ignore_ascii_case("UTF-8")
}

/// Convert `value` into the bytes of `charset`.
///
/// Unknown labels keep the UTF-8 bytes; unmappable characters are replaced
/// with numeric character references by `encoding_rs`.
#[must_use]
pub fn transcode(charset: &str, value: &str) -> Vec<u8> {
    match Encoding::for_label(charset.as_bytes()) {
        Some(encoding) => {
            let (bytes, _, _) = encoding.encode(value);
            bytes.into_owned()
        }
        None => value.as_bytes().to_vec(),
    }
}
