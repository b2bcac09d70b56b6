//! TLS settings handed to the transport when a connection is wrapped, either
//! on connect (implicit TLS) or after STARTTLS.

use serde::{Deserialize, Serialize};

/// TLS certificate validation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TlsCertificatePolicy {
    /// Whether to accept invalid TLS certificates (self-signed, expired, etc.).
    ///
    /// **SECURITY WARNING**: Setting this to `true` disables certificate validation
    /// and makes the connection vulnerable to man-in-the-middle attacks.
    ///
    /// Default: `false` (validate certificates)
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// Caller-supplied TLS configuration.
///
/// When a dialer has none, [`TlsConfig::for_host`] is used, which validates
/// the certificate against the host being dialed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    /// Name presented via SNI and checked against the certificate. Falls back
    /// to the dialed host when unset.
    #[serde(default)]
    pub server_name: Option<String>,

    #[serde(default)]
    pub certificate: TlsCertificatePolicy,
}

impl TlsConfig {
    /// The default configuration for a host: verify certificates for `host`.
    #[must_use]
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            server_name: Some(host.into()),
            certificate: TlsCertificatePolicy::default(),
        }
    }

    /// A configuration for testing with self-signed certificates.
    ///
    /// **WARNING**: Only use in test environments.
    #[must_use]
    pub fn insecure(host: impl Into<String>) -> Self {
        Self {
            server_name: Some(host.into()),
            certificate: TlsCertificatePolicy {
                accept_invalid_certs: true,
            },
        }
    }

    /// The name to verify, falling back to `host`.
    #[must_use]
    pub fn server_name<'a>(&'a self, host: &'a str) -> &'a str {
        self.server_name.as_deref().unwrap_or(host)
    }

    #[must_use]
    pub const fn accepts_invalid_certs(&self) -> bool {
        self.certificate.accept_invalid_certs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_host() {
        let config = TlsConfig::for_host("smtp.example.com");
        assert_eq!(config.server_name("ignored"), "smtp.example.com");
        assert!(!config.accepts_invalid_certs());
    }

    #[test]
    fn test_server_name_falls_back_to_host() {
        let config = TlsConfig::default();
        assert_eq!(config.server_name("mx.example.org"), "mx.example.org");
    }

    #[test]
    fn test_insecure() {
        let config = TlsConfig::insecure("localhost");
        assert!(config.accepts_invalid_certs());
    }
}
