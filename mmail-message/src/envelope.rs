//! SMTP envelope extraction from message headers.

use crate::{address::AddressParser, error::EnvelopeError, message::Message};

/// Header fields whose mailboxes become envelope recipients, in order.
const RECIPIENT_FIELDS: [&str; 3] = ["To", "Cc", "Bcc"];

/// Envelope sender and recipients (`MAIL FROM` / `RCPT TO`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: String,
    pub recipients: Vec<String>,
}

impl Envelope {
    /// Derive the envelope from `From`, `To`, `Cc` and `Bcc`.
    ///
    /// The first malformed recipient fails the whole envelope. Repeated
    /// addresses are only kept once.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::MissingFrom`] when `From` is absent or unparsable,
    /// [`EnvelopeError::InvalidRecipient`] for the first bad recipient.
    pub fn from_message(message: &Message, parser: &dyn AddressParser) -> Result<Self, EnvelopeError> {
        let from = message
            .header("From")
            .and_then(<[String]>::first)
            .ok_or(EnvelopeError::MissingFrom(None))?;
        let from = parser
            .parse(from)
            .map_err(|err| EnvelopeError::MissingFrom(Some(err)))?;

        let mut recipients: Vec<String> = Vec::new();
        for field in RECIPIENT_FIELDS {
            for raw in message.header(field).unwrap_or_default() {
                let address = parser
                    .parse(raw)
                    .map_err(|source| EnvelopeError::InvalidRecipient {
                        address: raw.clone(),
                        source,
                    })?;
                if !recipients.contains(&address) {
                    recipients.push(address);
                }
            }
        }

        Ok(Self { from, recipients })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::address::MailboxParser;

    #[test]
    fn sender_and_recipients() {
        let mut message = Message::new("s", "b", "text");
        message.set_address_header("From", "jane@example.com", "Jane Doe");
        message.set_header("To", ["bob@example.com", "\"Carol\" <carol@example.com>"]);
        message.set_header("Cc", ["dave@example.com", "bob@example.com"]);
        message.set_header("Bcc", ["erin@example.com"]);

        let envelope = Envelope::from_message(&message, &MailboxParser).unwrap();
        assert_eq!(envelope.from, "jane@example.com");
        assert_eq!(
            envelope.recipients,
            [
                "bob@example.com",
                "carol@example.com",
                "dave@example.com",
                "erin@example.com"
            ]
        );
    }

    #[test]
    fn missing_from() {
        let mut message = Message::new("s", "b", "text");
        message.set_header("To", ["bob@example.com"]);
        assert_eq!(
            Envelope::from_message(&message, &MailboxParser),
            Err(EnvelopeError::MissingFrom(None))
        );
    }

    #[test]
    fn unparsable_from() {
        let mut message = Message::new("s", "b", "text");
        message.set_header("From", ["nobody"]);
        assert!(matches!(
            Envelope::from_message(&message, &MailboxParser),
            Err(EnvelopeError::MissingFrom(Some(_)))
        ));
    }

    #[test]
    fn first_bad_recipient_is_reported() {
        let mut message = Message::new("s", "b", "text");
        message.set_header("From", ["jane@example.com"]);
        message.set_header("To", ["bob@example.com", "broken", "also broken"]);

        match Envelope::from_message(&message, &MailboxParser) {
            Err(EnvelopeError::InvalidRecipient { address, .. }) => assert_eq!(address, "broken"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
