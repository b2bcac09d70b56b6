//! An established, ready SMTP session.

use mmail_common::{config::ClientTimeouts, internal};

use crate::{
    client::{Connection, Reply},
    error::SmtpError,
    extensions::Extensions,
};

/// A connected session that has been greeted and, where configured,
/// upgraded to TLS and authenticated.
///
/// Commands are strictly sequential. [`Session::close`] consumes the session,
/// so it can only happen once.
#[derive(Debug)]
pub struct Session {
    connection: Connection,
    extensions: Extensions,
    timeouts: ClientTimeouts,
}

impl Session {
    pub(crate) const fn new(
        connection: Connection,
        extensions: Extensions,
        timeouts: ClientTimeouts,
    ) -> Self {
        Self {
            connection,
            extensions,
            timeouts,
        }
    }

    /// Extensions from the last EHLO, i.e. after any STARTTLS upgrade.
    #[must_use]
    pub const fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.connection.is_tls()
    }

    /// `MAIL FROM:<from>`, declaring an 8-bit body when the server allows it.
    ///
    /// # Errors
    ///
    /// [`SmtpError::Reply`] unless the server answers 250. Transport failures
    /// and [`SmtpError::Timeout`] are passed through; [`SmtpError::is_disconnect`]
    /// tells a dropped connection apart.
    pub async fn mail(&mut self, from: &str) -> Result<Reply, SmtpError> {
        let mut line = format!("MAIL FROM:<{from}>");
        if self.extensions.contains("8BITMIME") {
            line.push_str(" BODY=8BITMIME");
        }

        let reply = self
            .connection
            .command("MAIL FROM", &line, self.timeouts.mail_from())
            .await?;
        expect(&reply, "MAIL FROM", |code| code == 250)?;
        Ok(reply)
    }

    /// `RCPT TO:<to>`. Both 250 and 251 are accepted.
    ///
    /// # Errors
    ///
    /// [`SmtpError::Reply`] carrying the server's refusal, or a transport error.
    pub async fn rcpt(&mut self, to: &str) -> Result<Reply, SmtpError> {
        let reply = self
            .connection
            .command("RCPT TO", &format!("RCPT TO:<{to}>"), self.timeouts.rcpt_to())
            .await?;
        expect(&reply, "RCPT TO", |code| code == 250 || code == 251)?;
        Ok(reply)
    }

    /// Send `DATA`, then the dot-stuffed payload and the terminating `.`.
    ///
    /// Transfer of the payload and the final reply share one data timeout.
    ///
    /// # Errors
    ///
    /// [`SmtpError::Reply`] when `DATA` is not answered with 354 or the
    /// payload is not accepted with 250, [`SmtpError::Timeout`] when the
    /// server is too slow, or a transport error.
    pub async fn data(&mut self, payload: &[u8]) -> Result<Reply, SmtpError> {
        let timeout = self.timeouts.data();

        let reply = self.connection.command("DATA", "DATA", timeout).await?;
        expect(&reply, "DATA", |code| code == 354)?;

        let stuffed = dot_stuff(payload);
        internal!("Sending {} bytes of message data", stuffed.len());

        let connection = &mut self.connection;
        let reply = tokio::time::timeout(timeout, async {
            connection.send(&stuffed).await?;
            connection.read_reply().await
        })
        .await
        .map_err(|_| SmtpError::Timeout {
            command: "DATA",
            after: timeout,
        })??;
        expect(&reply, "DATA", |code| code == 250)?;
        Ok(reply)
    }

    /// Abort the current transaction.
    ///
    /// # Errors
    ///
    /// [`SmtpError::Reply`] unless the server answers 250, or a transport error.
    pub async fn reset(&mut self) -> Result<Reply, SmtpError> {
        let reply = self
            .connection
            .command("RSET", "RSET", self.timeouts.mail_from())
            .await?;
        expect(&reply, "RSET", |code| code == 250)?;
        Ok(reply)
    }

    /// Say goodbye. The transport stays open until [`Session::close`].
    ///
    /// # Errors
    ///
    /// [`SmtpError::Reply`] unless the server answers 221, or a transport error.
    pub async fn quit(&mut self) -> Result<Reply, SmtpError> {
        let reply = self
            .connection
            .command("QUIT", "QUIT", self.timeouts.quit())
            .await?;
        expect(&reply, "QUIT", |code| code == 221)?;
        Ok(reply)
    }

    /// Shut the transport down. Does not send `QUIT`.
    pub async fn close(mut self) {
        self.connection.shutdown().await;
    }
}

fn expect(reply: &Reply, command: &'static str, accept: impl Fn(u16) -> bool) -> Result<(), SmtpError> {
    if accept(reply.code) {
        Ok(())
    } else {
        Err(SmtpError::Reply {
            command,
            reply: reply.clone(),
        })
    }
}

/// Escape lines starting with `.`, normalize bare LF to CRLF and append the
/// end-of-data marker.
fn dot_stuff(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + payload.len() / 64 + 5);
    let mut at_line_start = true;
    let mut previous = 0u8;

    for &byte in payload {
        if at_line_start && byte == b'.' {
            out.push(b'.');
        }
        if byte == b'\n' && previous != b'\r' {
            out.push(b'\r');
        }
        out.push(byte);

        at_line_start = byte == b'\n';
        previous = byte;
    }

    if !out.is_empty() && !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}
