//! Configuration for the `mmail` binary: one server and one message.

use std::{collections::BTreeMap, path::PathBuf};

use mmail_message::{Message, Settings};
use mmail_smtp::SmtpConfig;
use serde::Deserialize;

/// Top-level configuration file.
///
/// ```toml
/// [server]
/// host = "smtp.example.com"
/// port = 587
/// username = "mailer"
/// password = "hunter2"
///
/// [message]
/// subject = "Hello"
/// body = "Hi there"
/// from = "mailer@example.com"
/// to = ["jane@example.com"]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: SmtpConfig,
    pub message: MessageConfig,
}

fn default_kind() -> String {
    String::from("text/plain")
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageConfig {
    pub subject: String,
    pub body: String,

    /// `html` or `text/html` for an HTML body, plain text otherwise.
    #[serde(default = "default_kind")]
    pub kind: String,

    pub from: String,
    #[serde(default)]
    pub from_name: String,

    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,

    /// HTML alternative to a plain text body.
    #[serde(default)]
    pub html: Option<String>,

    #[serde(default)]
    pub attachments: Vec<PathBuf>,

    #[serde(default)]
    pub embedded: Vec<PathBuf>,

    /// Extra headers, encoded as they are set.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub settings: Settings,
}

impl MessageConfig {
    /// Build the message this configuration describes.
    #[must_use]
    pub fn build(&self) -> Message {
        let mut message = Message::with_settings(
            self.subject.clone(),
            self.body.clone(),
            &self.kind,
            self.settings.clone(),
        );

        message.set_address_header("From", &self.from, &self.from_name);
        for (field, values) in [("To", &self.to), ("Cc", &self.cc), ("Bcc", &self.bcc)] {
            if !values.is_empty() {
                message.set_header(field, values);
            }
        }
        for (field, value) in &self.headers {
            message.set_header(field.clone(), [value]);
        }

        if let Some(html) = &self.html {
            message.add_alternative("text/html", html);
        }
        for path in &self.attachments {
            message.attach_file(path);
        }
        for path in &self.embedded {
            message.embed_file(path);
        }

        message
    }
}

#[cfg(test)]
mod tests {
    use mmail_message::TransferEncoding;
    use pretty_assertions::assert_eq;

    use super::*;

    const CONFIG: &str = r#"
        [server]
        host = "smtp.example.com"
        port = 465
        username = "mailer"
        password = "hunter2"

        [server.timeouts]
        data_secs = 300

        [message]
        subject = "Café menu"
        body = "<p>Today's specials</p>"
        kind = "html"
        from = "mailer@example.com"
        from_name = "Mailer"
        to = ["jane@example.com", "john@example.com"]
        bcc = ["archive@example.com"]
        attachments = ["menu.pdf"]

        [message.headers]
        "Reply-To" = "kitchen@example.com"

        [message.settings]
        encoding = "base64"
    "#;

    #[test]
    fn parses_full_config() {
        let config: Config = toml::from_str(CONFIG).unwrap();

        assert_eq!(config.server.host, "smtp.example.com");
        assert_eq!(config.server.port, 465);
        assert_eq!(config.server.timeouts.data_secs, 300);
        assert_eq!(config.server.timeouts.quit_secs, 10);
        assert_eq!(config.message.settings.charset, "UTF-8");
        assert_eq!(config.message.settings.encoding, TransferEncoding::Base64);
        assert!(config.message.cc.is_empty());
    }

    #[test]
    fn builds_message() {
        let config: Config = toml::from_str(CONFIG).unwrap();
        let message = config.message.build();

        assert_eq!(message.content_type(), "text/html");
        assert_eq!(message.header("From"), Some(&[r#""Mailer" <mailer@example.com>"#.to_string()][..]));
        assert_eq!(message.header("To").map(<[String]>::len), Some(2));
        assert_eq!(message.header("Cc"), None);
        assert_eq!(
            message.header("Reply-To"),
            Some(&["kitchen@example.com".to_string()][..])
        );
        assert_eq!(message.attachments().len(), 1);
    }

    #[test]
    fn minimal_message_defaults_to_plain_text() {
        let config: MessageConfig = toml::from_str(
            r#"
            subject = "Hi"
            body = "Hello"
            from = "a@example.com"
            "#,
        )
        .unwrap();

        let message = config.build();
        assert_eq!(message.content_type(), "text/plain");
        assert_eq!(message.header("From"), Some(&["a@example.com".to_string()][..]));
        assert_eq!(message.header("To"), None);
    }
}
