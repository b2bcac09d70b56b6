//! Body transfer encodings (RFC 2045).

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::SerializationError;

/// Base64 bodies are wrapped at this many characters per line.
const BASE64_LINE_LEN: usize = 76;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferEncoding {
    #[default]
    #[serde(rename = "quoted-printable")]
    QuotedPrintable,
    #[serde(rename = "base64")]
    Base64,
    /// Leave the body alone. Headers are still word encoded.
    #[serde(rename = "8bit")]
    EightBit,
}

impl TransferEncoding {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QuotedPrintable => "quoted-printable",
            Self::Base64 => "base64",
            Self::EightBit => "8bit",
        }
    }

    /// Apply this encoding to `raw`. `location` names the entity in errors.
    ///
    /// # Errors
    ///
    /// [`SerializationError::InvalidContent`] when an `8bit` body holds NUL,
    /// a bare CR or a bare LF.
    pub fn encode_body(self, location: &str, raw: &[u8]) -> Result<Vec<u8>, SerializationError> {
        match self {
            Self::QuotedPrintable => Ok(quoted_printable::encode(raw)),
            Self::Base64 => Ok(wrap_base64(raw)),
            Self::EightBit => {
                check_eight_bit(location, raw)?;
                Ok(raw.to_vec())
            }
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn wrap_base64(raw: &[u8]) -> Vec<u8> {
    let encoded = STANDARD.encode(raw);
    let mut out = Vec::with_capacity(encoded.len() + encoded.len() / BASE64_LINE_LEN * 2);
    for (index, line) in encoded.as_bytes().chunks(BASE64_LINE_LEN).enumerate() {
        if index > 0 {
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(line);
    }
    out
}

/// 8bit data must be CRLF delimited lines without NUL.
fn check_eight_bit(location: &str, raw: &[u8]) -> Result<(), SerializationError> {
    let invalid = |reason| SerializationError::InvalidContent {
        location: location.to_string(),
        reason,
    };

    for (index, &b) in raw.iter().enumerate() {
        match b {
            0 => return Err(invalid("NUL byte in 8bit body")),
            b'\r' if raw.get(index + 1) != Some(&b'\n') => {
                return Err(invalid("bare CR in 8bit body"));
            }
            b'\n' if index == 0 || raw[index - 1] != b'\r' => {
                return Err(invalid("bare LF in 8bit body"));
            }
            _ => {}
        }
    }

    Ok(())
}
