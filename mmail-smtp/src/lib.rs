//! SMTP delivery for mmail messages.
//!
//! A [`Dialer`] opens [`Session`]s: it connects, upgrades to TLS (implicitly on
//! port 465, otherwise with STARTTLS when offered) and authenticates with the
//! best mechanism the server offers. A [`Sender`] then drives one message
//! through a session, one transaction per envelope recipient.

pub mod auth;
pub mod client;
pub mod config;
pub mod connector;
pub mod dialer;
pub mod error;
pub mod extensions;
pub mod sender;
pub mod session;

pub use auth::{Credentials, Mechanism};
pub use client::Reply;
pub use config::SmtpConfig;
pub use connector::{BoxedStream, Connector, Stream, TcpConnector};
pub use dialer::Dialer;
pub use error::{DeliveryError, RecipientError, SmtpError};
pub use extensions::Extensions;
pub use sender::{RecipientOutcome, Sender};
pub use session::Session;
