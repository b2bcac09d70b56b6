//! Opening ready-to-use sessions.
//!
//! A dial runs `connect → [implicit TLS] → greeting → EHLO → [STARTTLS → EHLO]
//! → [AUTH]`. The authentication mechanism is chosen on the first dial and
//! reused for every later dial on the same [`Dialer`], including reconnects
//! in the middle of a delivery.

use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use mmail_common::{
    config::{ClientTimeouts, TlsConfig},
    internal, tracing,
};
use mmail_message::{AddressParser, Envelope, MailboxParser, Message, Serializer};

use crate::{
    auth::{Credentials, Mechanism, ServerInfo},
    client::{Connection, Reply},
    config::SmtpConfig,
    connector::{Connector, TcpConnector},
    error::{DeliveryError, SmtpError},
    extensions::Extensions,
    sender::{RecipientOutcome, Sender},
    session::Session,
};

/// Port on which the connection is TLS from the first byte.
pub const IMPLICIT_TLS_PORT: u16 = 465;

const DEFAULT_LOCAL_NAME: &str = "localhost";

/// Opens sessions to one SMTP server with one set of credentials.
///
/// Cheap to share by reference; the pinned mechanism is the only state that
/// changes after construction.
pub struct Dialer {
    host: String,
    port: u16,
    credentials: Credentials,
    mechanism: OnceLock<Mechanism>,
    implicit_tls: bool,
    tls: Option<TlsConfig>,
    local_name: Option<String>,
    timeouts: ClientTimeouts,
    connector: Arc<dyn Connector>,
    serializer: Serializer,
    parser: Arc<dyn AddressParser>,
}

impl fmt::Debug for Dialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialer")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("credentials", &self.credentials)
            .field("mechanism", &self.mechanism.get())
            .field("implicit_tls", &self.implicit_tls)
            .field("tls", &self.tls)
            .field("local_name", &self.local_name)
            .field("timeouts", &self.timeouts)
            .field("serializer", &self.serializer)
            .finish_non_exhaustive()
    }
}

impl Dialer {
    /// A dialer without credentials. Port 465 implies implicit TLS.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: Credentials::default(),
            mechanism: OnceLock::new(),
            implicit_tls: port == IMPLICIT_TLS_PORT,
            tls: None,
            local_name: None,
            timeouts: ClientTimeouts::default(),
            connector: Arc::new(TcpConnector),
            serializer: Serializer::default(),
            parser: Arc::new(MailboxParser),
        }
    }

    /// A dialer for the server described by `config`.
    #[must_use]
    pub fn from_config(config: &SmtpConfig) -> Self {
        let mut dialer = Self::new(config.host.clone(), config.port)
            .with_credentials(config.username.clone(), config.password.clone())
            .with_timeouts(config.timeouts);
        dialer.tls.clone_from(&config.tls);
        dialer.local_name.clone_from(&config.local_name);
        dialer
    }

    /// Authenticate as `username`. An empty username disables AUTH.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Credentials::new(username, password);
        self
    }

    /// TLS settings for both implicit TLS and STARTTLS. Defaults to
    /// verifying the certificate against the host name.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Name sent with EHLO/HELO instead of `localhost`.
    #[must_use]
    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: ClientTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Replace the transport, e.g. with an in-memory one.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Serializer used by [`Dialer::dial_and_send`], e.g. one with a fixed
    /// clock.
    #[must_use]
    pub fn with_serializer(mut self, serializer: Serializer) -> Self {
        self.serializer = serializer;
        self
    }

    /// Parser that turns `From`, `To`, `Cc` and `Bcc` values into envelope
    /// addresses for [`Dialer::dial_and_send`].
    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn AddressParser>) -> Self {
        self.parser = parser;
        self
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub const fn implicit_tls(&self) -> bool {
        self.implicit_tls
    }

    /// The mechanism pinned by the first successful negotiation, if any.
    #[must_use]
    pub fn mechanism(&self) -> Option<Mechanism> {
        self.mechanism.get().copied()
    }

    fn tls_config(&self) -> TlsConfig {
        self.tls
            .clone()
            .unwrap_or_else(|| TlsConfig::for_host(self.host.clone()))
    }

    /// Open a new session.
    ///
    /// # Errors
    ///
    /// [`SmtpError::Connect`] when the server cannot be reached, a
    /// [`SmtpError::Reply`] for an unexpected greeting or HELO refusal,
    /// [`SmtpError::TlsUpgrade`] when STARTTLS fails,
    /// [`SmtpError::UnsupportedAuth`] when credentials are set but AUTH is
    /// not offered, and any authentication error. The connection is shut
    /// down before an error is returned.
    pub async fn dial(&self) -> Result<Session, SmtpError> {
        internal!(
            level = DEBUG,
            "Dialing {}:{} (implicit TLS: {})",
            self.host,
            self.port,
            self.implicit_tls
        );

        let stream = self
            .connector
            .connect(&self.host, self.port, self.timeouts.connect())
            .await?;

        let stream = if self.implicit_tls {
            let timeout = self.timeouts.connect();
            tokio::time::timeout(
                timeout,
                self.connector.wrap_tls(stream, &self.tls_config(), &self.host),
            )
            .await
            .map_err(|_| SmtpError::Timeout {
                command: "TLS handshake",
                after: timeout,
            })??
        } else {
            stream
        };

        let mut connection = Connection::new(stream, self.implicit_tls);
        match self.handshake(&mut connection).await {
            Ok(extensions) => Ok(Session::new(connection, extensions, self.timeouts)),
            Err(err) => {
                tracing::warn!(host = %self.host, port = self.port, "SMTP handshake failed: {err}");
                connection.shutdown().await;
                Err(err)
            }
        }
    }

    async fn handshake(&self, connection: &mut Connection) -> Result<Extensions, SmtpError> {
        let greeting = connection
            .read_reply_within("greeting", self.timeouts.ehlo())
            .await?;
        if greeting.code != 220 {
            return Err(SmtpError::Reply {
                command: "greeting",
                reply: greeting,
            });
        }

        let mut extensions = self.hello(connection).await?;

        if !connection.is_tls() && extensions.contains("STARTTLS") {
            self.starttls(connection).await.map_err(|err| match err {
                SmtpError::TlsUpgrade(_) => err,
                other => SmtpError::TlsUpgrade(other.to_string()),
            })?;
            extensions = self.hello(connection).await?;
        }

        if !self.credentials.username.is_empty() {
            if !extensions.contains("AUTH") {
                return Err(SmtpError::UnsupportedAuth);
            }

            let mechanism = *self
                .mechanism
                .get_or_init(|| Mechanism::select(&extensions));
            let server = ServerInfo {
                name: &self.host,
                tls: connection.is_tls(),
                extensions: &extensions,
            };
            mechanism
                .authenticate(
                    connection,
                    &self.credentials,
                    &self.host,
                    &server,
                    self.timeouts.auth(),
                )
                .await?;
        }

        Ok(extensions)
    }

    /// EHLO, falling back to HELO (and no extensions) when EHLO is refused.
    async fn hello(&self, connection: &mut Connection) -> Result<Extensions, SmtpError> {
        let name = self.local_name.as_deref().unwrap_or(DEFAULT_LOCAL_NAME);
        let timeout = self.timeouts.ehlo();

        let reply = connection
            .command("EHLO", &format!("EHLO {name}"), timeout)
            .await?;
        if reply.is_positive() {
            return Ok(Extensions::from_ehlo(&reply));
        }

        internal!(level = DEBUG, "EHLO refused ({reply}), trying HELO");
        let reply = connection
            .command("HELO", &format!("HELO {name}"), timeout)
            .await?;
        if reply.is_positive() {
            Ok(Extensions::default())
        } else {
            Err(SmtpError::Reply {
                command: "HELO",
                reply,
            })
        }
    }

    async fn starttls(&self, connection: &mut Connection) -> Result<(), SmtpError> {
        let timeout = self.timeouts.starttls();

        let reply: Reply = connection.command("STARTTLS", "STARTTLS", timeout).await?;
        if reply.code != 220 {
            return Err(SmtpError::TlsUpgrade(format!("STARTTLS refused: {reply}")));
        }

        let stream = connection.take_stream()?;
        let stream = tokio::time::timeout(
            timeout,
            self.connector.wrap_tls(stream, &self.tls_config(), &self.host),
        )
        .await
        .map_err(|_| SmtpError::TlsUpgrade(format!("handshake timed out after {timeout:?}")))??;
        connection.restore_tls(stream);

        internal!(level = DEBUG, "Connection upgraded to TLS");
        Ok(())
    }

    /// Send `message` over a fresh session.
    ///
    /// The envelope is checked before anything is dialed, so a message
    /// without a usable `From` never opens a connection.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::Envelope`] for unusable addresses and
    /// [`DeliveryError::Dial`] when no session could be opened. Failures of
    /// individual recipients are reported in the returned outcomes.
    pub async fn dial_and_send(&self, message: &Message) -> Result<Vec<RecipientOutcome>, DeliveryError> {
        Envelope::from_message(message, self.parser.as_ref())?;

        let session = self.dial().await.map_err(DeliveryError::Dial)?;
        Sender::new(self, session)
            .with_serializer(self.serializer.clone())
            .with_parser(Arc::clone(&self.parser))
            .send(message)
            .await
    }
}
