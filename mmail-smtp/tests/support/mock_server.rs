//! Mock SMTP server for dialing and delivery tests.
//!
//! The server doubles as a [`Connector`]: every `connect` opens an in-memory
//! duplex stream and spawns a scripted SMTP peer on the other end. It can:
//! - advertise STARTTLS and AUTH mechanisms, per connection if needed
//! - run PLAIN, LOGIN and CRAM-MD5 exchanges
//! - reject chosen recipients
//! - hang up when `MAIL FROM` arrives on chosen connections
//! - record every command, tagged with the connection it arrived on
//!
//! # Example
//!
//! ```rust,ignore
//! let server = MockSmtpServer::builder()
//!     .with_auth(&["PLAIN", "LOGIN"])
//!     .with_rcpt_response("nobody@example.com", 550, "No such user")
//!     .build();
//!
//! let dialer = server.dialer().with_credentials("user", "secret");
//! ```
#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use mmail_common::config::TlsConfig;
use mmail_smtp::{BoxedStream, Connector, Dialer, SmtpError};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf},
    sync::{Notify, RwLock},
};

pub const MOCK_HOST: &str = "localhost";
pub const MOCK_PORT: u16 = 2525;
pub const CRAM_MD5_CHALLENGE: &str = "<1896.697170952@mock.example.com>";

/// SMTP command received by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    StartTls,
    /// `AUTH` with the requested mechanism
    Auth(String),
    /// A decoded client response during AUTH (including the initial one)
    AuthResponse(String),
    /// The client sent `*` to abandon AUTH
    AuthAbort,
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message content (after DATA), without the terminating `.`
    MessageContent(Vec<u8>),
    Rset,
    Quit,
    Other(String),
}

/// Response configuration for SMTP commands
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    pub code: u16,
    pub message: String,
}

impl SmtpResponse {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Debug, Clone)]
struct MockServerConfig {
    greeting: SmtpResponse,
    ehlo_code: u16,
    capabilities: Vec<String>,
    auth: Option<Vec<String>>,
    auth_per_connection: HashMap<usize, Vec<String>>,
    auth_result: SmtpResponse,
    login_prompts: Vec<String>,
    starttls_response: Option<SmtpResponse>,
    rcpt_responses: HashMap<String, SmtpResponse>,
    data_end_response: SmtpResponse,

    // Failure injection
    refuse_connections: bool,
    fail_tls: bool,
    drop_on_mail_from: HashSet<usize>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: SmtpResponse::new(220, "mock.example.com ESMTP ready"),
            ehlo_code: 250,
            capabilities: vec!["8BITMIME".to_string(), "SIZE 10240000".to_string()],
            auth: None,
            auth_per_connection: HashMap::new(),
            auth_result: SmtpResponse::new(235, "Authentication successful"),
            login_prompts: vec!["Username:".to_string(), "Password:".to_string()],
            starttls_response: None,
            rcpt_responses: HashMap::new(),
            data_end_response: SmtpResponse::new(250, "OK: Message accepted"),
            refuse_connections: false,
            fail_tls: false,
            drop_on_mail_from: HashSet::new(),
        }
    }
}

#[derive(Default)]
struct State {
    commands: RwLock<Vec<(usize, SmtpCommand)>>,
    connections: AtomicUsize,
    closed: AtomicUsize,
    tls_upgrades: AtomicUsize,
    notify: Notify,
}

impl State {
    async fn record(&self, connection: usize, command: SmtpCommand) {
        self.commands.write().await.push((connection, command));
        self.notify.notify_waiters();
    }

    fn closed(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

/// Mock SMTP server for testing
#[derive(Clone)]
pub struct MockSmtpServer {
    config: Arc<MockServerConfig>,
    state: Arc<State>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder::new()
    }

    /// This server as a transport for a [`Dialer`].
    #[must_use]
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    /// A dialer for `localhost:2525` that connects to this server.
    #[must_use]
    pub fn dialer(&self) -> Dialer {
        Dialer::new(MOCK_HOST, MOCK_PORT).with_connector(self.connector())
    }

    /// All commands received, across every connection.
    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.state
            .commands
            .read()
            .await
            .iter()
            .map(|(_, command)| command.clone())
            .collect()
    }

    /// Commands received on the `index`th connection (0-based).
    pub async fn commands_on(&self, index: usize) -> Vec<SmtpCommand> {
        self.state
            .commands
            .read()
            .await
            .iter()
            .filter(|(connection, _)| *connection == index)
            .map(|(_, command)| command.clone())
            .collect()
    }

    /// How many received commands match `predicate`.
    pub async fn count(&self, predicate: impl Fn(&SmtpCommand) -> bool) -> usize {
        self.state
            .commands
            .read()
            .await
            .iter()
            .filter(|(_, command)| predicate(command))
            .count()
    }

    /// Message contents received after DATA, in order.
    pub async fn messages(&self) -> Vec<Vec<u8>> {
        self.state
            .commands
            .read()
            .await
            .iter()
            .filter_map(|(_, command)| match command {
                SmtpCommand::MessageContent(content) => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    /// Connections opened so far.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Connections the client closed (EOF seen by the server).
    #[must_use]
    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn tls_upgrades(&self) -> usize {
        self.state.tls_upgrades.load(Ordering::SeqCst)
    }

    /// Wait until the client has closed `count` connections. Returns `false`
    /// if that does not happen within five seconds.
    pub async fn wait_for_closed(&self, count: usize) -> bool {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notified = self.state.notify.notified();
                if self.closed() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    fn ehlo_response(&self, connection: usize, tls: bool) -> Vec<u8> {
        let config = &self.config;
        if config.ehlo_code != 250 {
            return SmtpResponse::new(config.ehlo_code, "Command not recognized").to_bytes();
        }

        let mut lines = vec!["mock.example.com greets you".to_string()];
        lines.extend(config.capabilities.iter().cloned());
        if config.starttls_response.is_some() && !tls {
            lines.push("STARTTLS".to_string());
        }
        if let Some(mechanisms) = config
            .auth_per_connection
            .get(&connection)
            .or(config.auth.as_ref())
        {
            lines.push(format!("AUTH {}", mechanisms.join(" ")));
        }

        let last = lines.len() - 1;
        lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let separator = if i == last { ' ' } else { '-' };
                format!("250{separator}{line}\r\n")
            })
            .collect::<String>()
            .into_bytes()
    }

    /// Handle a single client connection
    #[allow(clippy::too_many_lines)]
    async fn handle_client(self, stream: DuplexStream, index: usize) -> std::io::Result<()> {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let mut tls = false;

        writer.write_all(&self.config.greeting.to_bytes()).await?;
        writer.flush().await?;

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                self.state.closed();
                return Ok(());
            }

            let command_line = line.trim_end().to_string();
            let (verb, argument) = command_line
                .split_once(' ')
                .unwrap_or((command_line.as_str(), ""));
            let argument = argument.to_string();

            let response = match verb.to_ascii_uppercase().as_str() {
                "EHLO" => {
                    self.state.record(index, SmtpCommand::Ehlo(argument)).await;
                    self.ehlo_response(index, tls)
                }
                "HELO" => {
                    self.state.record(index, SmtpCommand::Helo(argument)).await;
                    SmtpResponse::new(250, "Hello").to_bytes()
                }
                "STARTTLS" => {
                    self.state.record(index, SmtpCommand::StartTls).await;
                    match &self.config.starttls_response {
                        Some(response) => {
                            tls = response.code == 220;
                            response.to_bytes()
                        }
                        None => SmtpResponse::new(502, "Command not implemented").to_bytes(),
                    }
                }
                "AUTH" => {
                    let (mechanism, initial) = argument
                        .split_once(' ')
                        .map_or((argument.as_str(), None), |(m, i)| (m, Some(i)));
                    let mechanism = mechanism.to_ascii_uppercase();
                    let initial = initial.map(ToString::to_string);
                    self.state
                        .record(index, SmtpCommand::Auth(mechanism.clone()))
                        .await;

                    self.authenticate(&mut reader, &mut writer, index, &mechanism, initial)
                        .await?
                }
                "MAIL" => {
                    self.state.record(index, SmtpCommand::MailFrom(argument)).await;
                    if self.config.drop_on_mail_from.contains(&index) {
                        return Ok(());
                    }
                    SmtpResponse::new(250, "OK").to_bytes()
                }
                "RCPT" => {
                    let address = argument
                        .split_once('<')
                        .and_then(|(_, rest)| rest.split_once('>'))
                        .map(|(address, _)| address.to_string())
                        .unwrap_or_default();
                    self.state.record(index, SmtpCommand::RcptTo(argument)).await;
                    self.config
                        .rcpt_responses
                        .get(&address)
                        .map_or_else(|| SmtpResponse::new(250, "OK").to_bytes(), SmtpResponse::to_bytes)
                }
                "DATA" => {
                    self.state.record(index, SmtpCommand::Data).await;
                    writer
                        .write_all(&SmtpResponse::new(354, "End data with <CR><LF>.<CR><LF>").to_bytes())
                        .await?;
                    writer.flush().await?;

                    let mut content = Vec::new();
                    let mut data_line = Vec::new();
                    loop {
                        data_line.clear();
                        if reader.read_until(b'\n', &mut data_line).await? == 0 {
                            self.state.closed();
                            return Ok(());
                        }
                        if data_line == b".\r\n" {
                            break;
                        }
                        content.extend_from_slice(&data_line);
                    }

                    self.state
                        .record(index, SmtpCommand::MessageContent(content))
                        .await;
                    self.config.data_end_response.to_bytes()
                }
                "RSET" => {
                    self.state.record(index, SmtpCommand::Rset).await;
                    SmtpResponse::new(250, "OK").to_bytes()
                }
                "QUIT" => {
                    self.state.record(index, SmtpCommand::Quit).await;
                    SmtpResponse::new(221, "Bye").to_bytes()
                }
                _ => {
                    self.state
                        .record(index, SmtpCommand::Other(command_line.clone()))
                        .await;
                    SmtpResponse::new(500, "Unknown command").to_bytes()
                }
            };

            writer.write_all(&response).await?;
            writer.flush().await?;
        }
    }

    /// Run the server side of a SASL exchange, returning the final response.
    async fn authenticate(
        &self,
        reader: &mut BufReader<ReadHalf<DuplexStream>>,
        writer: &mut WriteHalf<DuplexStream>,
        index: usize,
        mechanism: &str,
        initial: Option<String>,
    ) -> std::io::Result<Vec<u8>> {
        let challenges: Vec<String> = match mechanism {
            "PLAIN" if initial.is_some() => Vec::new(),
            "PLAIN" => vec![String::new()],
            "LOGIN" => self.config.login_prompts.clone(),
            "CRAM-MD5" => vec![CRAM_MD5_CHALLENGE.to_string()],
            _ => {
                return Ok(SmtpResponse::new(504, "Unrecognized authentication type").to_bytes());
            }
        };

        if let Some(initial) = initial {
            self.state
                .record(index, SmtpCommand::AuthResponse(decode(&initial)))
                .await;
        }

        let mut line = String::new();
        for challenge in challenges {
            writer
                .write_all(format!("334 {}\r\n", STANDARD.encode(challenge)).as_bytes())
                .await?;
            writer.flush().await?;

            line.clear();
            reader.read_line(&mut line).await?;
            let answer = line.trim_end();
            if answer == "*" {
                self.state.record(index, SmtpCommand::AuthAbort).await;
                return Ok(SmtpResponse::new(501, "Authentication cancelled").to_bytes());
            }
            self.state
                .record(index, SmtpCommand::AuthResponse(decode(answer)))
                .await;
        }

        Ok(self.config.auth_result.to_bytes())
    }
}

fn decode(encoded: &str) -> String {
    STANDARD
        .decode(encoded.trim())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl Connector for MockSmtpServer {
    async fn connect(&self, host: &str, port: u16, _timeout: Duration) -> Result<BoxedStream, SmtpError> {
        let index = self.state.connections.fetch_add(1, Ordering::SeqCst);

        if self.config.refuse_connections {
            return Err(SmtpError::Connect {
                address: format!("{host}:{port}"),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            });
        }

        let (client, server) = tokio::io::duplex(64 * 1024);
        let peer = self.clone();
        tokio::spawn(async move {
            if let Err(e) = peer.handle_client(server, index).await {
                mmail_common::tracing::debug!("Mock server client error: {e}");
            }
        });

        Ok(Box::new(client))
    }

    async fn wrap_tls(&self, stream: BoxedStream, _config: &TlsConfig, _host: &str) -> Result<BoxedStream, SmtpError> {
        if self.config.fail_tls {
            return Err(SmtpError::TlsUpgrade("handshake failure".to_string()));
        }
        self.state.tls_upgrades.fetch_add(1, Ordering::SeqCst);
        Ok(stream)
    }
}

/// Builder for configuring a `MockSmtpServer`
pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    fn new() -> Self {
        Self {
            config: MockServerConfig::default(),
        }
    }

    /// Set the greeting message
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = SmtpResponse::new(code, message);
        self
    }

    /// Answer EHLO with `code` instead of the capability list
    #[must_use]
    pub const fn with_ehlo_code(mut self, code: u16) -> Self {
        self.config.ehlo_code = code;
        self
    }

    /// Advertise `AUTH` with these mechanisms
    #[must_use]
    pub fn with_auth(mut self, mechanisms: &[&str]) -> Self {
        self.config.auth = Some(mechanisms.iter().map(ToString::to_string).collect());
        self
    }

    /// Advertise different mechanisms on one connection (0-based)
    #[must_use]
    pub fn with_auth_on_connection(mut self, index: usize, mechanisms: &[&str]) -> Self {
        self.config
            .auth_per_connection
            .insert(index, mechanisms.iter().map(ToString::to_string).collect());
        self
    }

    /// Set the final AUTH response
    #[must_use]
    pub fn with_auth_result(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.auth_result = SmtpResponse::new(code, message);
        self
    }

    /// Replace the LOGIN prompts (default `Username:`, `Password:`)
    #[must_use]
    pub fn with_login_prompts(mut self, prompts: &[&str]) -> Self {
        self.config.login_prompts = prompts.iter().map(ToString::to_string).collect();
        self
    }

    /// Advertise STARTTLS and answer it with this response
    #[must_use]
    pub fn with_starttls_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.starttls_response = Some(SmtpResponse::new(code, message));
        self
    }

    /// Respond to `RCPT TO:<address>` with this response
    #[must_use]
    pub fn with_rcpt_response(mut self, address: &str, code: u16, message: impl Into<String>) -> Self {
        self.config
            .rcpt_responses
            .insert(address.to_string(), SmtpResponse::new(code, message));
        self
    }

    /// Set the response after message content (after `<CRLF>.<CRLF>`)
    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end_response = SmtpResponse::new(code, message);
        self
    }

    /// Fail every connection attempt
    #[must_use]
    pub const fn refusing_connections(mut self) -> Self {
        self.config.refuse_connections = true;
        self
    }

    /// Fail every TLS handshake
    #[must_use]
    pub const fn with_failing_tls(mut self) -> Self {
        self.config.fail_tls = true;
        self
    }

    /// Hang up without replying when `MAIL FROM` arrives on this connection
    #[must_use]
    pub fn with_drop_on_mail_from(mut self, index: usize) -> Self {
        self.config.drop_on_mail_from.insert(index);
        self
    }

    #[must_use]
    pub fn build(self) -> MockSmtpServer {
        MockSmtpServer {
            config: Arc::new(self.config),
            state: Arc::new(State::default()),
        }
    }
}
