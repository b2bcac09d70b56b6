//! SASL mechanisms: PLAIN, LOGIN and CRAM-MD5.

use std::{fmt, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use mmail_common::internal;

use crate::{client::Connection, error::SmtpError, extensions::Extensions};

type HmacMd5 = Hmac<md5::Md5>;

/// Username and password for AUTH.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What the client knows about the server when authentication starts.
#[derive(Debug, Clone, Copy)]
pub struct ServerInfo<'a> {
    /// Host name the connection was opened to.
    pub name: &'a str,
    pub tls: bool,
    pub extensions: &'a Extensions,
}

impl ServerInfo<'_> {
    fn advertises(&self, mechanism: Mechanism) -> bool {
        self.extensions.supports_auth(mechanism.name())
    }

    fn is_localhost(&self) -> bool {
        matches!(self.name, "localhost" | "127.0.0.1" | "::1")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    CramMd5,
    Login,
    Plain,
}

impl Mechanism {
    /// Pick a mechanism from the advertised AUTH list.
    ///
    /// CRAM-MD5 wins when offered. LOGIN is used only when PLAIN is not
    /// offered. PLAIN is the fallback, even when nothing matches.
    #[must_use]
    pub fn select(extensions: &Extensions) -> Self {
        if extensions.supports_auth(Self::CramMd5.name()) {
            Self::CramMd5
        } else if extensions.supports_auth(Self::Login.name())
            && !extensions.supports_auth(Self::Plain.name())
        {
            Self::Login
        } else {
            Self::Plain
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CramMd5 => "CRAM-MD5",
            Self::Login => "LOGIN",
            Self::Plain => "PLAIN",
        }
    }

    /// Begin authentication, returning the initial response if the
    /// mechanism has one.
    ///
    /// `host` is the host the credentials were configured for.
    ///
    /// # Errors
    ///
    /// [`SmtpError::UnencryptedConnection`] when LOGIN or PLAIN would send
    /// the password in the clear, [`SmtpError::WrongHost`] when the server
    /// is not `host`.
    pub fn start(
        self,
        credentials: &Credentials,
        host: &str,
        server: &ServerInfo<'_>,
    ) -> Result<Option<Vec<u8>>, SmtpError> {
        match self {
            Self::CramMd5 => Ok(None),
            Self::Login => {
                if !server.tls && !server.advertises(self) {
                    return Err(SmtpError::UnencryptedConnection);
                }
                check_host(host, server)?;
                Ok(None)
            }
            Self::Plain => {
                if !server.tls && !server.is_localhost() {
                    return Err(SmtpError::UnencryptedConnection);
                }
                check_host(host, server)?;

                let mut response = Vec::with_capacity(
                    credentials.username.len() + credentials.password.len() + 2,
                );
                response.push(0);
                response.extend_from_slice(credentials.username.as_bytes());
                response.push(0);
                response.extend_from_slice(credentials.password.as_bytes());
                Ok(Some(response))
            }
        }
    }

    /// Answer a decoded server challenge. `more` is false once the server
    /// has accepted the exchange, in which case nothing is sent.
    ///
    /// # Errors
    ///
    /// [`SmtpError::UnexpectedChallenge`] for a prompt the mechanism does not
    /// know how to answer.
    pub fn next(
        self,
        credentials: &Credentials,
        challenge: &[u8],
        more: bool,
    ) -> Result<Option<Vec<u8>>, SmtpError> {
        if !more {
            return Ok(None);
        }

        match self {
            Self::CramMd5 => {
                let mut mac = HmacMd5::new_from_slice(credentials.password.as_bytes())
                    .map_err(|e| SmtpError::Auth(format!("HMAC key error: {e}")))?;
                mac.update(challenge);
                let digest = hex::encode(mac.finalize().into_bytes());
                Ok(Some(
                    format!("{} {digest}", credentials.username).into_bytes(),
                ))
            }
            Self::Login => match challenge {
                b"Username:" => Ok(Some(credentials.username.as_bytes().to_vec())),
                b"Password:" => Ok(Some(credentials.password.as_bytes().to_vec())),
                other => Err(SmtpError::UnexpectedChallenge(
                    String::from_utf8_lossy(other).into_owned(),
                )),
            },
            Self::Plain => Err(SmtpError::UnexpectedChallenge(
                String::from_utf8_lossy(challenge).into_owned(),
            )),
        }
    }

    /// Run the full AUTH exchange on `connection`.
    ///
    /// Every 334 challenge is base64-decoded and answered. A mechanism error
    /// aborts the exchange with `*` and is returned. Anything other than 334
    /// or 235 fails with [`SmtpError::Auth`].
    ///
    /// # Errors
    ///
    /// Any error from [`Mechanism::start`] or [`Mechanism::next`],
    /// [`SmtpError::Auth`] for a rejection and transport errors or
    /// [`SmtpError::Timeout`] while talking to the server.
    pub async fn authenticate(
        self,
        connection: &mut Connection,
        credentials: &Credentials,
        host: &str,
        server: &ServerInfo<'_>,
        timeout: Duration,
    ) -> Result<(), SmtpError> {
        let initial = self.start(credentials, host, server)?;

        let mut line = format!("AUTH {}", self.name());
        if let Some(initial) = &initial {
            line.push(' ');
            line.push_str(&STANDARD.encode(initial));
        }
        let masked = format!("AUTH {} ********", self.name());

        let mut reply = connection
            .command_masked("AUTH", &line, &masked, timeout)
            .await?;

        loop {
            let next = match reply.code {
                334 => STANDARD
                    .decode(reply.first_line().trim())
                    .map_err(|e| SmtpError::Auth(format!("Invalid challenge encoding: {e}")))
                    .and_then(|challenge| self.next(credentials, &challenge, true)),
                235 => self.next(credentials, reply.first_line().as_bytes(), false),
                _ => Err(SmtpError::Auth(reply.to_string())),
            };

            let response = match next {
                Ok(response) => response,
                Err(err) => {
                    if reply.code == 334 {
                        // Best effort: the error below is what the caller needs.
                        let _ = connection.command("AUTH", "*", timeout).await;
                    }
                    return Err(err);
                }
            };

            if reply.code == 235 {
                internal!("Authenticated with {}", self.name());
                return Ok(());
            }

            let response = STANDARD.encode(response.unwrap_or_default());
            reply = connection
                .command_masked("AUTH", &response, "********", timeout)
                .await?;
        }
    }
}

fn check_host(host: &str, server: &ServerInfo<'_>) -> Result<(), SmtpError> {
    if server.name == host {
        Ok(())
    } else {
        Err(SmtpError::WrongHost {
            expected: host.to_string(),
            actual: server.name.to_string(),
        })
    }
}
