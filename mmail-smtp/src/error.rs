//! Error types for dialing and delivery.

use std::{io, time::Duration};

use mmail_message::{EnvelopeError, SerializationError};
use thiserror::Error;

use crate::client::Reply;

/// Errors raised by the SMTP conversation itself.
#[derive(Error, Debug)]
pub enum SmtpError {
    /// The transport could not be opened (DNS, refused, timeout).
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    /// STARTTLS was offered but the upgrade failed. The connection is closed.
    #[error("TLS upgrade failed: {0}")]
    TlsUpgrade(String),

    /// Credentials were configured but the server advertises no AUTH.
    #[error("Server does not support authentication")]
    UnsupportedAuth,

    /// The server rejected the credentials or the exchange.
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Unencrypted connection")]
    UnencryptedConnection,

    #[error("Wrong host name: expected {expected}, connected to {actual}")]
    WrongHost { expected: String, actual: String },

    #[error("Unexpected server challenge: {0}")]
    UnexpectedChallenge(String),

    /// The peer closed the stream, usually after an idle timeout.
    #[error("Connection closed unexpectedly")]
    Disconnected,

    #[error("{command} timed out after {after:?}")]
    Timeout {
        command: &'static str,
        after: Duration,
    },

    /// The server answered with an unexpected code.
    #[error("Server rejected {command}: {reply}")]
    Reply { command: &'static str, reply: Reply },

    #[error("Failed to parse SMTP response: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl SmtpError {
    /// Whether the peer hung up, as opposed to answering with an error.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Disconnected => true,
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// Whether retrying later could succeed.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        match self {
            Self::Connect { .. } | Self::Timeout { .. } => true,
            Self::Reply { reply, .. } => reply.is_transient_negative(),
            _ => self.is_disconnect(),
        }
    }

    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        match self {
            Self::Reply { reply, .. } => reply.is_permanent_negative(),
            Self::UnsupportedAuth
            | Self::Auth(_)
            | Self::UnencryptedConnection
            | Self::WrongHost { .. }
            | Self::UnexpectedChallenge(_)
            | Self::TlsUpgrade(_) => true,
            _ => false,
        }
    }
}

/// Why one recipient was not delivered. Other recipients are unaffected.
#[derive(Error, Debug)]
pub enum RecipientError {
    #[error("Recipient {address} rejected: {reply}")]
    Rejected { address: String, reply: Reply },

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// The connection dropped and the single reconnect was already used.
    #[error("Connection lost and the reconnect attempt was already spent: {0}")]
    Disconnected(#[source] SmtpError),

    #[error(transparent)]
    Smtp(#[from] SmtpError),

    /// An earlier recipient lost the session and it could not be replaced.
    #[error("No usable session")]
    SessionLost,
}

/// Failures that stop a delivery before any recipient is tried.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("Unable to dial: {0}")]
    Dial(#[source] SmtpError),
}
