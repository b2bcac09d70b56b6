//! SMTP reply parsing and representation.

use std::fmt;

use crate::error::SmtpError;

/// A single line of a (possibly multi-line) reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    pub code: u16,
    /// `false` for `250-` continuation lines.
    pub is_last: bool,
    pub text: String,
}

/// A complete SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// The first line, which carries the challenge for AUTH replies.
    #[must_use]
    pub fn first_line(&self) -> &str {
        self.lines.first().map_or("", String::as_str)
    }

    /// 2xx
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// 4xx
    #[must_use]
    pub const fn is_transient_negative(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    /// 5xx
    #[must_use]
    pub const fn is_permanent_negative(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    /// Parse a single reply line (without the line ending).
    ///
    /// # Errors
    ///
    /// [`SmtpError::Parse`] when the line has no three digit code or a
    /// separator other than space or `-`.
    pub fn parse_line(line: &str) -> Result<ReplyLine, SmtpError> {
        let Some(code) = line.get(..3) else {
            return Err(SmtpError::Parse(format!("Response line too short: '{line}'")));
        };
        let code = code
            .parse::<u16>()
            .map_err(|_| SmtpError::Parse(format!("Invalid status code: '{code}'")))?;

        let is_last = match line.as_bytes().get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(c) => {
                return Err(SmtpError::Parse(format!(
                    "Invalid separator character: '{}'",
                    char::from(*c)
                )));
            }
        };

        Ok(ReplyLine {
            code,
            is_last,
            text: line.get(4..).unwrap_or_default().to_string(),
        })
    }

    /// Parse a complete reply from the start of `buffer`.
    ///
    /// Returns the reply and the number of bytes it used, or `None` when more
    /// data is needed.
    ///
    /// # Errors
    ///
    /// [`SmtpError::Parse`] for invalid lines, non UTF-8 text or lines whose
    /// codes disagree.
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>, SmtpError> {
        let mut consumed = 0;
        let mut lines = Vec::new();
        let mut first_code = None;

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let text = std::str::from_utf8(raw)
                .map_err(|err| SmtpError::Parse(format!("Response is not UTF-8: {err}")))?;
            let line = Self::parse_line(text)?;

            match first_code {
                Some(code) if code != line.code => {
                    return Err(SmtpError::Parse(format!(
                        "Status code mismatch in multi-line response: expected {code}, got {}",
                        line.code
                    )));
                }
                Some(_) => {}
                None => first_code = Some(line.code),
            }

            lines.push(line.text);

            if line.is_last {
                return Ok(Some((Self::new(line.code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.lines.join(" "))
    }
}
