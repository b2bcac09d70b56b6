//! Shared plumbing for the mmail crates: logging setup and the configuration
//! types that describe how a client talks to an SMTP server.

pub mod config;
pub mod logging;

pub use tracing;
