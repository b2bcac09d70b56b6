//! Compose MIME email messages and deliver them over SMTP.
//!
//! ```no_run
//! # async fn run() -> Result<(), mmail::DeliveryError> {
//! let mut message = mmail::new_message("Hello", "Hi there", "text", mmail::Settings::default());
//! message.set_address_header("From", "me@example.com", "Me");
//! message.set_header("To", ["you@example.com"]);
//!
//! let dialer = mmail::new_plain_dialer("smtp.example.com", 587, "me", "secret");
//! for outcome in dialer.dial_and_send(&message).await? {
//!     println!("{}: {:?}", outcome.recipient, outcome.result);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;

use mmail_common::tracing;
pub use mmail_message::{
    Content, Envelope, File, Message, Serializer, Settings, TransferEncoding, WordEncoder,
};
pub use mmail_smtp::{
    DeliveryError, Dialer, Mechanism, RecipientError, RecipientOutcome, SmtpConfig, SmtpError,
};

/// A new message. `kind` of `html` or `text/html` gives an HTML body,
/// anything else plain text.
#[must_use]
pub fn new_message(
    subject: impl Into<String>,
    body: impl Into<String>,
    kind: &str,
    settings: Settings,
) -> Message {
    Message::with_settings(subject, body, kind, settings)
}

/// A dialer for `host:port` authenticating as `username`. An empty username
/// skips authentication.
#[must_use]
pub fn new_plain_dialer(
    host: impl Into<String>,
    port: u16,
    username: impl Into<String>,
    password: impl Into<String>,
) -> Dialer {
    Dialer::new(host, port).with_credentials(username, password)
}

/// Send each message over its own session.
///
/// A failed message is logged and does not stop the ones after it. The
/// results are returned in message order.
pub async fn dial_and_send(
    dialer: &Dialer,
    messages: &[Message],
) -> Vec<Result<Vec<RecipientOutcome>, DeliveryError>> {
    let mut results = Vec::with_capacity(messages.len());

    for (index, message) in messages.iter().enumerate() {
        let result = dialer.dial_and_send(message).await;
        match &result {
            Ok(outcomes) => {
                let failed = outcomes.iter().filter(|o| !o.is_delivered()).count();
                if failed > 0 {
                    tracing::warn!(
                        "Message {} reached {} of {} recipients",
                        index + 1,
                        outcomes.len() - failed,
                        outcomes.len()
                    );
                }
            }
            Err(err) => {
                tracing::error!("Could not send message {}: {err}", index + 1);
            }
        }
        results.push(result);
    }

    results
}
