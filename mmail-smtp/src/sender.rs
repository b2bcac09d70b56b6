//! Driving one message through a session, recipient by recipient.

use std::sync::Arc;

use mmail_common::{internal, tracing};
use mmail_message::{AddressParser, Envelope, MailboxParser, Message, Serializer};

use crate::{
    client::Reply,
    dialer::Dialer,
    error::{DeliveryError, RecipientError, SmtpError},
    session::Session,
};

/// What happened to one envelope recipient.
#[derive(Debug)]
pub struct RecipientOutcome {
    pub recipient: String,
    /// The server's final reply to the message data on success.
    pub result: Result<Reply, RecipientError>,
}

impl RecipientOutcome {
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        self.result.is_ok()
    }
}

/// Delivers a single message over an owned session.
///
/// Each recipient gets its own transaction and its own rendering of the
/// message (the `To` header names only that recipient). If the server drops
/// the connection before `MAIL FROM`, the dialer is used once to open a
/// replacement session. The session is closed exactly once, when
/// [`Sender::send`] returns.
pub struct Sender<'d> {
    dialer: &'d Dialer,
    session: Option<Session>,
    reconnected: bool,
    serializer: Serializer,
    parser: Arc<dyn AddressParser>,
}

impl<'d> Sender<'d> {
    #[must_use]
    pub fn new(dialer: &'d Dialer, session: Session) -> Self {
        Self {
            dialer,
            session: Some(session),
            reconnected: false,
            serializer: Serializer::default(),
            parser: Arc::new(MailboxParser),
        }
    }

    /// Render each recipient's copy with `serializer`.
    #[must_use]
    pub fn with_serializer(mut self, serializer: Serializer) -> Self {
        self.serializer = serializer;
        self
    }

    /// Derive the envelope with `parser` instead of [`MailboxParser`].
    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn AddressParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Send `message` to every envelope recipient.
    ///
    /// Envelope problems fail the whole delivery before anything is written.
    /// Otherwise one outcome is returned per recipient, in envelope order; a
    /// failed recipient never stops the others.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::Envelope`] when the sender or a recipient cannot be
    /// parsed. The session is closed without sending anything.
    pub async fn send(mut self, message: &Message) -> Result<Vec<RecipientOutcome>, DeliveryError> {
        let envelope = match Envelope::from_message(message, self.parser.as_ref()) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.discard_session().await;
                return Err(err.into());
            }
        };

        let mut outcomes = Vec::with_capacity(envelope.recipients.len());
        for recipient in &envelope.recipients {
            let result = self.deliver(message, &envelope.from, recipient).await;

            match &result {
                Ok(reply) => {
                    internal!(level = INFO, "Delivered to {recipient}: {reply}");
                }
                Err(err) => {
                    tracing::warn!(recipient = %recipient, "Delivery failed: {err}");
                    self.recover(err).await;
                }
            }

            outcomes.push(RecipientOutcome {
                recipient: recipient.clone(),
                result,
            });
        }

        self.finish().await;
        Ok(outcomes)
    }

    async fn deliver(&mut self, message: &Message, from: &str, recipient: &str) -> Result<Reply, RecipientError> {
        let payload = self.serializer.serialize(message, recipient)?;

        self.start_transaction(from).await?;
        let session = self.session.as_mut().ok_or(RecipientError::SessionLost)?;

        session.rcpt(recipient).await.map_err(|err| match err {
            SmtpError::Reply { reply, .. } => RecipientError::Rejected {
                address: recipient.to_string(),
                reply,
            },
            other => RecipientError::Smtp(other),
        })?;

        Ok(session.data(&payload).await?)
    }

    /// `MAIL FROM`, replacing the session once if the server has hung up.
    async fn start_transaction(&mut self, from: &str) -> Result<(), RecipientError> {
        if let Some(session) = self.session.as_mut() {
            match session.mail(from).await {
                Ok(_) => return Ok(()),
                Err(err) if err.is_disconnect() => {
                    self.discard_session().await;
                    if self.reconnected {
                        return Err(RecipientError::Disconnected(err));
                    }
                    internal!(level = INFO, "Connection lost before MAIL FROM, reconnecting: {err}");
                }
                Err(err) => return Err(err.into()),
            }
        } else if self.reconnected {
            return Err(RecipientError::SessionLost);
        }

        self.reconnected = true;
        let session = self.dialer.dial().await?;
        let session = self.session.insert(session);

        session.mail(from).await.map(drop).map_err(|err| {
            if err.is_disconnect() {
                RecipientError::Disconnected(err)
            } else {
                RecipientError::Smtp(err)
            }
        })
    }

    /// Leave the session ready for the next recipient.
    async fn recover(&mut self, err: &RecipientError) {
        let usable = match err {
            RecipientError::Rejected { .. } => true,
            RecipientError::Smtp(err) => {
                !err.is_disconnect() && !matches!(err, SmtpError::Timeout { .. })
            }
            RecipientError::Serialization(_)
            | RecipientError::Disconnected(_)
            | RecipientError::SessionLost => false,
        };

        if !usable {
            if matches!(err, RecipientError::Smtp(_)) {
                self.discard_session().await;
            }
            return;
        }

        if let Some(session) = self.session.as_mut()
            && let Err(err) = session.reset().await
        {
            internal!(level = DEBUG, "RSET failed: {err}");
            if err.is_disconnect() {
                self.discard_session().await;
            }
        }
    }

    async fn finish(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(err) = session.quit().await {
                internal!(level = DEBUG, "QUIT failed: {err}");
            }
            session.close().await;
        }
    }

    async fn discard_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }
}
