use std::io;

use thiserror::Error;

/// The message could not be turned into bytes.
#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("Invalid content in {location}: {reason}")]
    InvalidContent {
        location: String,
        reason: &'static str,
    },

    #[error("Failed to read content for {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// A raw header value is not a single RFC 5322 mailbox.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid address {address:?}: {reason}")]
    Malformed { address: String, reason: String },

    #[error("Expected a single mailbox, found {found} in {address:?}")]
    NotSingleMailbox { address: String, found: usize },
}

/// The envelope cannot be derived from the message headers.
///
/// Raised before any network traffic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Invalid message, 'From' field is missing or unparsable")]
    MissingFrom(#[source] Option<AddressError>),

    #[error("Unable to parse recipient address {address:?}")]
    InvalidRecipient {
        address: String,
        #[source]
        source: AddressError,
    },
}
