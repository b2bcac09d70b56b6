//! The outbound message model.

use std::{
    fmt, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::{
    encoder::{WordEncoder, transcode},
    encoding::TransferEncoding,
    error::SerializationError,
    header::{Headers, format_address, get_field, set_field},
    serializer::{Serializer, format_date},
};

/// Charset and body encoding for a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "defaults::charset")]
    pub charset: String,

    #[serde(default)]
    pub encoding: TransferEncoding,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            charset: defaults::charset(),
            encoding: TransferEncoding::default(),
        }
    }
}

mod defaults {
    pub fn charset() -> String {
        String::from("UTF-8")
    }
}

type Producer = dyn Fn(&mut dyn io::Write) -> io::Result<()> + Send + Sync;

/// Lazily produced bytes for a part or file.
///
/// Nothing is read until the message is serialized, and the producer runs
/// again for every serialization.
#[derive(Clone)]
pub struct Content(Arc<Producer>);

impl Content {
    /// Fixed content, cloned into each rendering.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        let bytes: Arc<[u8]> = bytes.into();
        Self(Arc::new(move |writer: &mut dyn io::Write| writer.write_all(&bytes)))
    }

    /// Read the file at `path` each time the content is written.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self(Arc::new(move |writer: &mut dyn io::Write| {
            let mut file = std::fs::File::open(&path)?;
            io::copy(&mut file, writer).map(|_| ())
        }))
    }

    /// Content produced by `producer`, which writes into the buffer it is
    /// given. Called once per rendering, i.e. once per recipient.
    pub fn from_fn<F>(producer: F) -> Self
    where
        F: Fn(&mut dyn io::Write) -> io::Result<()> + Send + Sync + 'static,
    {
        Self(Arc::new(producer))
    }

    /// Run the producer into a fresh buffer.
    ///
    /// # Errors
    ///
    /// Whatever the producer fails with, e.g. a missing file.
    pub fn read(&self) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        (self.0)(&mut buffer)?;
        Ok(buffer)
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Content(..)")
    }
}

/// An alternative rendering of the body, e.g. an HTML version of a text mail.
#[derive(Debug, Clone)]
pub struct Part {
    pub content_type: String,
    pub encoding: TransferEncoding,
    pub content: Content,
}

/// An attached or embedded file.
#[derive(Debug, Clone)]
pub struct File {
    pub name: String,
    /// Overrides for the generated entity headers.
    pub headers: Headers,
    pub content: Content,
}

impl File {
    #[must_use]
    pub fn new(name: impl Into<String>, content: Content) -> Self {
        Self {
            name: name.into(),
            headers: Headers::new(),
            content,
        }
    }

    /// A file whose content is read from `path` at serialization time. The
    /// name is the last path component.
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map_or_else(|| path.to_string_lossy(), |name| name.to_string_lossy())
            .into_owned();
        Self::new(name, Content::from_path(path))
    }

    /// Override one of the generated entity headers, such as
    /// `Content-Type`. Names are matched without regard to case.
    #[must_use]
    pub fn with_header(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        set_field(&mut self.headers, field, vec![value.into()]);
        self
    }
}

/// A structured outbound email.
///
/// Header values are word encoded when they are set, using the encoder that
/// matches the current body encoding.
#[derive(Debug, Clone)]
pub struct Message {
    headers: Headers,
    subject: String,
    body: String,
    content_type: &'static str,
    settings: Settings,
    encoder: WordEncoder,
    parts: Vec<Part>,
    attachments: Vec<File>,
    embedded: Vec<File>,
}

impl Message {
    /// `kind` of `html` or `text/html` gives an HTML body, anything else plain
    /// text.
    #[must_use]
    pub fn new(subject: impl Into<String>, body: impl Into<String>, kind: &str) -> Self {
        Self::with_settings(subject, body, kind, Settings::default())
    }

    /// As [`Message::new`], with an explicit charset and body encoding.
    #[must_use]
    pub fn with_settings(
        subject: impl Into<String>,
        body: impl Into<String>,
        kind: &str,
        settings: Settings,
    ) -> Self {
        let content_type = match kind {
            "html" | "text/html" => "text/html",
            _ => "text/plain",
        };

        Self {
            headers: Headers::new(),
            subject: subject.into(),
            body: body.into(),
            content_type,
            encoder: header_encoder(settings.encoding),
            settings,
            parts: Vec::new(),
            attachments: Vec::new(),
            embedded: Vec::new(),
        }
    }

    /// Clear headers, parts and files so the message can be reused. The
    /// settings are kept.
    pub fn reset(&mut self) {
        self.headers.clear();
        self.parts.clear();
        self.attachments.clear();
        self.embedded.clear();
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn charset(&self) -> &str {
        &self.settings.charset
    }

    #[must_use]
    pub const fn encoding(&self) -> TransferEncoding {
        self.settings.encoding
    }

    /// `Q` for quoted-printable bodies, `B` otherwise.
    #[must_use]
    pub const fn header_encoder(&self) -> WordEncoder {
        self.encoder
    }

    /// Change the body encoding. Headers set afterwards use the matching
    /// header encoder; values already set are left as they are.
    pub fn set_encoding(&mut self, encoding: TransferEncoding) {
        self.settings.encoding = encoding;
        self.encoder = header_encoder(encoding);
    }

    /// Change the charset used for the body and for headers set afterwards.
    pub fn set_charset(&mut self, charset: impl Into<String>) {
        self.settings.charset = charset.into();
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// `text/plain` or `text/html`.
    #[must_use]
    pub const fn content_type(&self) -> &'static str {
        self.content_type
    }

    /// Set `field` to `values`, word encoding each one. Replaces any earlier
    /// value of the field, whatever its case.
    pub fn set_header<I, V>(&mut self, field: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = V>,
        V: AsRef<str>,
    {
        let encoded = values
            .into_iter()
            .map(|value| self.encode(value.as_ref()))
            .collect();
        set_field(&mut self.headers, field, encoded);
    }

    /// [`Message::set_header`] for each entry.
    pub fn set_headers<I, K, V>(&mut self, headers: I)
    where
        I: IntoIterator<Item = (K, Vec<V>)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        for (field, values) in headers {
            self.set_header(field, values);
        }
    }

    /// Set `field` to a single formatted mailbox.
    pub fn set_address_header(
        &mut self,
        field: impl Into<String>,
        address: &str,
        name: &str,
    ) {
        let formatted = self.format_address(address, name);
        set_field(&mut self.headers, field, vec![formatted]);
    }

    /// Format a mailbox with this message's charset and header encoder.
    #[must_use]
    pub fn format_address(&self, address: &str, name: &str) -> String {
        format_address(self.encoder, &self.settings.charset, address, name)
    }

    /// Set `field` to `date` in RFC 5322 form.
    pub fn set_date_header(&mut self, field: impl Into<String>, date: &DateTime<FixedOffset>) {
        set_field(&mut self.headers, field, vec![format_date(date)]);
    }

    /// The encoded values of `field`, looked up without regard to case.
    #[must_use]
    pub fn header(&self, field: &str) -> Option<&[String]> {
        get_field(&self.headers, field)
    }

    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Add an alternative body, e.g. `text/html`. The text is converted to
    /// the message charset and uses the message body encoding.
    pub fn add_alternative(&mut self, content_type: impl Into<String>, body: &str) {
        let content = Content::from_bytes(transcode(&self.settings.charset, body));
        self.parts.push(Part {
            content_type: content_type.into(),
            encoding: self.settings.encoding,
            content,
        });
    }

    /// Add an alternative body whose bytes are already in the message charset.
    pub fn add_alternative_content(
        &mut self,
        content_type: impl Into<String>,
        encoding: TransferEncoding,
        content: Content,
    ) {
        self.parts.push(Part {
            content_type: content_type.into(),
            encoding,
            content,
        });
    }

    #[must_use]
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Add a file as an attachment.
    pub fn attach(&mut self, file: File) {
        self.attachments.push(file);
    }

    /// Attach the file at `path`, read when the message is serialized.
    pub fn attach_file(&mut self, path: impl AsRef<Path>) {
        self.attach(File::from_path(path));
    }

    #[must_use]
    pub fn attachments(&self) -> &[File] {
        &self.attachments
    }

    /// Embed a file for reference from an HTML body as `cid:<name>`. Any
    /// character of the name not allowed in a Content-ID is written as `_`.
    pub fn embed(&mut self, file: File) {
        self.embedded.push(file);
    }

    /// Embed the file at `path`, read when the message is serialized.
    pub fn embed_file(&mut self, path: impl AsRef<Path>) {
        self.embed(File::from_path(path));
    }

    #[must_use]
    pub fn embedded(&self) -> &[File] {
        &self.embedded
    }

    /// Serialize for `recipient` with the system clock and default boundary.
    ///
    /// # Errors
    ///
    /// See [`Serializer::serialize`].
    pub fn to_bytes(&self, recipient: &str) -> Result<Vec<u8>, SerializationError> {
        Serializer::default().serialize(self, recipient)
    }

    pub(crate) fn encode(&self, value: &str) -> String {
        self.encoder.encode(&self.settings.charset, value)
    }
}

const fn header_encoder(encoding: TransferEncoding) -> WordEncoder {
    match encoding {
        TransferEncoding::Base64 => WordEncoder::B,
        TransferEncoding::QuotedPrintable | TransferEncoding::EightBit => WordEncoder::Q,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn populated() -> Message {
        let mut message = Message::with_settings(
            "Hello",
            "Body",
            "text",
            Settings {
                charset: "ISO-8859-1".to_string(),
                encoding: TransferEncoding::Base64,
            },
        );
        message.set_address_header("From", "jane@example.com", "Jane Doe");
        message.set_header("To", ["bob@example.com"]);
        message.add_alternative("text/html", "<p>Body</p>");
        message.attach(File::new("report.txt", Content::from_bytes("report")));
        message.embed(File::new("logo.png", Content::from_bytes(vec![0x89, b'P'])));
        message
    }

    #[test]
    fn content_type_is_normalized() {
        assert_eq!(Message::new("s", "b", "html").content_type(), "text/html");
        assert_eq!(Message::new("s", "b", "text/html").content_type(), "text/html");
        assert_eq!(Message::new("s", "b", "markdown").content_type(), "text/plain");
    }

    #[test]
    fn defaults() {
        let message = Message::new("s", "b", "text/plain");
        assert_eq!(message.charset(), "UTF-8");
        assert_eq!(message.encoding(), TransferEncoding::QuotedPrintable);
        assert_eq!(message.header_encoder(), WordEncoder::Q);
    }

    #[test]
    fn reset_keeps_settings() {
        let mut message = populated();
        let settings = message.settings().clone();
        assert!(!message.headers().is_empty());

        message.reset();

        assert!(message.headers().is_empty());
        assert!(message.parts().is_empty());
        assert!(message.attachments().is_empty());
        assert!(message.embedded().is_empty());
        assert_eq!(message.settings(), &settings);
        assert_eq!(message.header_encoder(), WordEncoder::B);
    }

    #[test]
    fn headers_are_encoded_when_set() {
        let mut message = Message::new("s", "b", "text");
        message.set_header("X-Greeting", ["Grüße", "plain"]);
        assert_eq!(
            message.header("X-Greeting").unwrap(),
            ["=?UTF-8?q?Gr=C3=BC=C3=9Fe?=", "plain"]
        );

        message.set_encoding(TransferEncoding::Base64);
        message.set_header("X-Greeting", ["Grüße"]);
        assert_eq!(message.header("X-Greeting").unwrap(), ["=?UTF-8?b?R3LDvMOfZQ==?="]);
    }

    #[test]
    fn header_names_ignore_case() {
        let mut message = Message::new("s", "b", "text");
        message.set_header("Reply-To", ["a@example.com"]);
        message.set_header("reply-to", ["b@example.com"]);

        assert_eq!(message.headers().len(), 1);
        assert_eq!(message.header("REPLY-TO").unwrap(), ["b@example.com"]);
    }

    #[test]
    fn address_header() {
        let mut message = Message::new("s", "b", "text");
        message.set_address_header("From", "jane@example.com", "Jane Doe");
        assert_eq!(
            message.header("From").unwrap(),
            [r#""Jane Doe" <jane@example.com>"#]
        );
    }

    #[test]
    fn date_header() {
        let mut message = Message::new("s", "b", "text");
        let date = DateTime::parse_from_rfc3339("2024-03-05T09:08:07+10:00").unwrap();
        message.set_date_header("Date", &date);
        assert_eq!(message.header("Date").unwrap(), ["Tue, 05 Mar 2024 09:08:07 +1000"]);
    }

    #[test]
    fn content_is_produced_on_demand() {
        let content = Content::from_fn(|writer| writer.write_all(b"generated"));
        assert_eq!(content.read().unwrap(), b"generated");
        assert_eq!(content.read().unwrap(), b"generated");
    }

    #[test]
    fn file_name_comes_from_path() {
        let file = File::from_path("/var/reports/summary.pdf");
        assert_eq!(file.name, "summary.pdf");
    }
}
