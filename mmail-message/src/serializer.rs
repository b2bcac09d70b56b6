//! Rendering a [`Message`] into RFC 5322 / MIME bytes.

use std::{fmt, sync::Arc};

use chrono::{DateTime, FixedOffset, Local};
use mmail_common::internal;

use crate::{
    encoder::transcode,
    encoding::TransferEncoding,
    error::SerializationError,
    header::{Headers, fold_header, get_field, quote, set_field},
    message::{Content, File, Message},
};

/// Boundary id used unless another one is configured.
pub const DEFAULT_BOUNDARY_ID: &str = "1234567892";

/// Headers the serializer writes itself, or never writes.
const RESERVED_HEADERS: [&str; 7] = [
    "To",
    "Bcc",
    "Subject",
    "Date",
    "Mime-Version",
    "Content-Type",
    "Content-Transfer-Encoding",
];

fn is_reserved(field: &str) -> bool {
    RESERVED_HEADERS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(field))
}

/// RFC 5322 date with a numeric zone, e.g. `Tue, 05 Mar 2024 09:08:07 +1000`.
#[must_use]
pub fn format_date(date: &DateTime<FixedOffset>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S %z").to_string()
}

/// Source of the `Date` header when the message does not set one.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<FixedOffset>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MultipartKind {
    Mixed,
    Related,
    Alternative,
}

impl MultipartKind {
    const fn subtype(self) -> &'static str {
        match self {
            Self::Mixed => "mixed",
            Self::Related => "related",
            Self::Alternative => "alternative",
        }
    }

    const fn suffix(self) -> &'static str {
        match self {
            Self::Mixed => "mixed",
            Self::Related => "related",
            Self::Alternative => "alt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Attachment,
    Inline,
}

enum Entity<'m> {
    Body,
    Part {
        index: usize,
        content_type: &'m str,
        encoding: TransferEncoding,
        content: &'m Content,
    },
    File {
        file: &'m File,
        disposition: Disposition,
    },
    Multipart {
        kind: MultipartKind,
        children: Vec<Entity<'m>>,
    },
}

/// Turns messages into bytes.
///
/// Output is fully determined by the message, the clock and the boundary id.
#[derive(Clone)]
pub struct Serializer {
    clock: Arc<dyn Clock>,
    boundary_id: String,
}

impl Default for Serializer {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            boundary_id: DEFAULT_BOUNDARY_ID.to_string(),
        }
    }
}

impl fmt::Debug for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serializer")
            .field("boundary_id", &self.boundary_id)
            .finish_non_exhaustive()
    }
}

impl Serializer {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_boundary_id(mut self, id: impl Into<String>) -> Self {
        self.boundary_id = id.into();
        self
    }

    #[must_use]
    pub fn boundary(&self, kind: &str) -> String {
        format!("boundary-type-{}-{kind}", self.boundary_id)
    }

    /// Render `message` addressed to the single envelope `recipient`.
    ///
    /// `Bcc` is never written, and `To` carries only `recipient`.
    ///
    /// # Errors
    ///
    /// [`SerializationError::InvalidContent`] when a header still carries a
    /// line break or a body cannot be sent as declared, and
    /// [`SerializationError::Io`] when file content cannot be read.
    pub fn serialize(&self, message: &Message, recipient: &str) -> Result<Vec<u8>, SerializationError> {
        let mut out = Vec::with_capacity(message.body().len() + 512);

        write_header(&mut out, "To", &[recipient.to_string()])?;

        let date = match message.header("Date") {
            Some(values) if !values.is_empty() => values.to_vec(),
            _ => vec![format_date(&self.clock.now())],
        };
        write_header(&mut out, "Date", &date)?;
        write_header(&mut out, "Subject", &[message.encode(message.subject())])?;

        let version = match message.header("Mime-Version") {
            Some(values) if !values.is_empty() => values.to_vec(),
            _ => vec!["1.0".to_string()],
        };
        write_header(&mut out, "Mime-Version", &version)?;

        for (field, values) in message.headers() {
            if !is_reserved(field) {
                write_header(&mut out, field, values)?;
            }
        }

        let root = structure(message);
        self.write_entity(&mut out, message, &root)?;

        internal!(
            level = DEBUG,
            "Serialized message for {recipient} ({} bytes)",
            out.len()
        );
        Ok(out)
    }

    fn write_entity(
        &self,
        out: &mut Vec<u8>,
        message: &Message,
        entity: &Entity<'_>,
    ) -> Result<(), SerializationError> {
        match entity {
            Entity::Body => {
                let raw = transcode(message.charset(), message.body());
                write_text(
                    out,
                    "body",
                    message.content_type(),
                    message.charset(),
                    message.encoding(),
                    &raw,
                )
            }
            Entity::Part {
                index,
                content_type,
                encoding,
                content,
            } => {
                let location = format!("alternative part {index}");
                let raw = content.read().map_err(|source| SerializationError::Io {
                    name: location.clone(),
                    source,
                })?;
                write_text(out, &location, content_type, message.charset(), *encoding, &raw)
            }
            Entity::File { file, disposition } => write_file(out, message, file, *disposition),
            Entity::Multipart { kind, children } => {
                let boundary = self.boundary(kind.suffix());
                out.extend_from_slice(
                    format!(
                        "Content-Type: multipart/{};\r\n boundary={boundary}\r\n\r\n",
                        kind.subtype()
                    )
                    .as_bytes(),
                );

                for child in children {
                    out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
                    self.write_entity(out, message, child)?;
                    out.extend_from_slice(b"\r\n");
                }

                out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
                Ok(())
            }
        }
    }
}

/// Nest the body and its companions as mixed > related > alternative.
fn structure(message: &Message) -> Entity<'_> {
    let mut root = if message.parts().is_empty() {
        Entity::Body
    } else {
        let mut children = vec![Entity::Body];
        children.extend(message.parts().iter().enumerate().map(|(index, part)| {
            Entity::Part {
                index: index + 1,
                content_type: &part.content_type,
                encoding: part.encoding,
                content: &part.content,
            }
        }));
        Entity::Multipart {
            kind: MultipartKind::Alternative,
            children,
        }
    };

    if !message.embedded().is_empty() {
        let mut children = vec![root];
        children.extend(message.embedded().iter().map(|file| Entity::File {
            file,
            disposition: Disposition::Inline,
        }));
        root = Entity::Multipart {
            kind: MultipartKind::Related,
            children,
        };
    }

    if !message.attachments().is_empty() {
        let mut children = vec![root];
        children.extend(message.attachments().iter().map(|file| Entity::File {
            file,
            disposition: Disposition::Attachment,
        }));
        root = Entity::Multipart {
            kind: MultipartKind::Mixed,
            children,
        };
    }

    root
}

fn write_header(out: &mut Vec<u8>, field: &str, values: &[String]) -> Result<(), SerializationError> {
    if field.contains(['\r', '\n', ':']) {
        return Err(SerializationError::InvalidContent {
            location: format!("header name {field:?}"),
            reason: "header names cannot contain CR, LF or ':'",
        });
    }

    if values.iter().any(|value| value.contains(['\r', '\n'])) {
        return Err(SerializationError::InvalidContent {
            location: format!("header {field}"),
            reason: "line break left in header value",
        });
    }

    out.extend_from_slice(&fold_header(field, values));
    Ok(())
}

fn write_text(
    out: &mut Vec<u8>,
    location: &str,
    content_type: &str,
    charset: &str,
    encoding: TransferEncoding,
    raw: &[u8],
) -> Result<(), SerializationError> {
    write_header(out, "Content-Type", &[format!("{content_type}; charset={charset}")])?;
    write_header(out, "Content-Transfer-Encoding", &[encoding.to_string()])?;
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&encoding.encode_body(location, raw)?);
    Ok(())
}

fn write_file(
    out: &mut Vec<u8>,
    message: &Message,
    file: &File,
    disposition: Disposition,
) -> Result<(), SerializationError> {
    let location = format!("file {}", file.name);
    let name = message.encode(&file.name);
    let mime = mime_guess::from_path(&file.name).first_or_octet_stream();

    let quoted = quote(&name);

    let mut headers = Headers::new();
    headers.insert(
        "Content-Type".to_string(),
        vec![format!("{}; name={quoted}", mime.essence_str())],
    );
    headers.insert(
        "Content-Transfer-Encoding".to_string(),
        vec![TransferEncoding::Base64.to_string()],
    );
    let disposition = match disposition {
        Disposition::Attachment => "attachment",
        Disposition::Inline => {
            headers.insert(
                "Content-ID".to_string(),
                vec![format!("<{}>", content_id(&file.name))],
            );
            "inline"
        }
    };
    headers.insert(
        "Content-Disposition".to_string(),
        vec![format!("{disposition}; filename={quoted}")],
    );

    for (field, values) in &file.headers {
        set_field(&mut headers, field.clone(), values.clone());
    }

    let encoding = match get_field(&headers, "Content-Transfer-Encoding")
        .and_then(|values| values.first())
        .map(String::as_str)
    {
        Some(value) if value.eq_ignore_ascii_case("base64") => TransferEncoding::Base64,
        Some(value) if value.eq_ignore_ascii_case("quoted-printable") => {
            TransferEncoding::QuotedPrintable
        }
        Some(value) if value.eq_ignore_ascii_case("8bit") => TransferEncoding::EightBit,
        _ => {
            return Err(SerializationError::InvalidContent {
                location,
                reason: "unsupported Content-Transfer-Encoding",
            });
        }
    };

    for (field, values) in &headers {
        write_header(out, field, values)?;
    }
    out.extend_from_slice(b"\r\n");

    let raw = file.content.read().map_err(|source| SerializationError::Io {
        name: location.clone(),
        source,
    })?;
    out.extend_from_slice(&encoding.encode_body(&location, &raw)?);
    Ok(())
}

/// Content-ID for an embedded file, so HTML can refer to it as
/// `cid:<name>`. Characters not allowed in a msg-id become `_`.
fn content_id(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "!#$%&'*+-/=?^_`{|}~.@".contains(c) {
                c
            } else {
                '_'
            }
        })
        .collect()
}
