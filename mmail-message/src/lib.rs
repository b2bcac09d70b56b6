//! Composing MIME email messages.
//!
//! A [`Message`] holds headers (encoded as they are set), a body and any
//! alternative parts, attachments and embedded files. A [`Serializer`] turns it
//! into the exact bytes sent after `DATA`, once per envelope recipient.

pub mod address;
pub mod encoder;
pub mod encoding;
pub mod envelope;
pub mod error;
pub mod header;
pub mod message;
pub mod serializer;

pub use address::{AddressParser, MailboxParser};
pub use encoder::WordEncoder;
pub use encoding::TransferEncoding;
pub use envelope::Envelope;
pub use error::{AddressError, EnvelopeError, SerializationError};
pub use header::{Headers, fold_header, format_address};
pub use message::{Content, File, Message, Part, Settings};
pub use serializer::{Clock, FixedClock, Serializer, SystemClock, format_date};
