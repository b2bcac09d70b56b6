//! Configuration types shared by the client crates.
//!
//! - [`timeouts`]: per-command timeouts for an SMTP client session
//! - [`tls`]: TLS server name and certificate validation settings

pub mod timeouts;
pub mod tls;

pub use timeouts::ClientTimeouts;
pub use tls::{TlsCertificatePolicy, TlsConfig};
