//! Low-level SMTP client connection.

pub mod connection;
pub mod reply;

pub use connection::Connection;
pub use reply::{Reply, ReplyLine};
