//! Serializable description of an SMTP server to deliver through.

use std::fmt;

use mmail_common::config::{ClientTimeouts, TlsConfig};
use serde::{Deserialize, Serialize};

const fn default_port() -> u16 {
    587
}

/// Server connection settings, typically loaded from a configuration file.
///
/// ```toml
/// host = "smtp.example.com"
/// port = 465
/// username = "mailer"
/// password = "hunter2"
///
/// [timeouts]
/// data_secs = 300
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,

    /// Default: 587. Port 465 uses implicit TLS.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Empty means no authentication.
    #[serde(default)]
    pub username: String,

    #[serde(default, skip_serializing)]
    pub password: String,

    /// Name sent with EHLO/HELO. Default: `localhost`.
    #[serde(default)]
    pub local_name: Option<String>,

    #[serde(default)]
    pub tls: Option<TlsConfig>,

    #[serde(default)]
    pub timeouts: ClientTimeouts,
}

impl SmtpConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: String::new(),
            password: String::new(),
            local_name: None,
            tls: None,
            timeouts: ClientTimeouts::default(),
        }
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("local_name", &self.local_name)
            .field("tls", &self.tls)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}
