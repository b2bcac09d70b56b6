//! Line-oriented SMTP conversation over a [`BoxedStream`].

use std::time::Duration;

use mmail_common::{incoming, internal, outgoing};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::reply::Reply;
use crate::{connector::BoxedStream, error::SmtpError};

/// Initial size of the read buffer for SMTP responses.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer to prevent unbounded growth (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// One open connection to an SMTP server.
///
/// Sends commands and reads replies, one at a time. The stream is taken out
/// while it is being wrapped in TLS.
#[derive(Debug)]
pub struct Connection {
    stream: Option<BoxedStream>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    tls: bool,
}

impl Connection {
    #[must_use]
    pub fn new(stream: BoxedStream, tls: bool) -> Self {
        Self {
            stream: Some(stream),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            tls,
        }
    }

    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.tls
    }

    /// Hand the stream out for a TLS handshake. Any buffered bytes are
    /// discarded, since nothing may follow the STARTTLS reply.
    ///
    /// # Errors
    ///
    /// [`SmtpError::Disconnected`] if the stream was already taken.
    pub fn take_stream(&mut self) -> Result<BoxedStream, SmtpError> {
        self.buffer_pos = 0;
        self.stream.take().ok_or(SmtpError::Disconnected)
    }

    /// Put back a stream after it has been wrapped in TLS.
    pub fn restore_tls(&mut self, stream: BoxedStream) {
        self.stream = Some(stream);
        self.tls = true;
    }

    /// Write raw bytes.
    ///
    /// # Errors
    ///
    /// [`SmtpError::Disconnected`] without a stream, [`SmtpError::Io`] when
    /// the write fails.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), SmtpError> {
        let stream = self.stream.as_mut().ok_or(SmtpError::Disconnected)?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Write `line` followed by CRLF. `logged` is what appears in the trace
    /// log, so secrets can be masked.
    ///
    /// # Errors
    ///
    /// As [`Connection::send`].
    pub async fn send_line(&mut self, line: &str, logged: &str) -> Result<(), SmtpError> {
        outgoing!("{logged}");
        self.send(format!("{line}\r\n").as_bytes()).await
    }

    /// Send a command and wait up to `timeout` for its reply.
    ///
    /// Any reply code is returned as `Ok`; checking it is up to the caller.
    ///
    /// # Errors
    ///
    /// [`SmtpError::Timeout`] naming `name`, or any error from writing the
    /// line or reading the reply.
    pub async fn command(
        &mut self,
        name: &'static str,
        line: &str,
        timeout: Duration,
    ) -> Result<Reply, SmtpError> {
        self.command_masked(name, line, line, timeout).await
    }

    /// As [`Connection::command`], logging `logged` instead of `line`.
    ///
    /// # Errors
    ///
    /// As [`Connection::command`].
    pub async fn command_masked(
        &mut self,
        name: &'static str,
        line: &str,
        logged: &str,
        timeout: Duration,
    ) -> Result<Reply, SmtpError> {
        tokio::time::timeout(timeout, async {
            self.send_line(line, logged).await?;
            self.read_reply().await
        })
        .await
        .map_err(|_| SmtpError::Timeout {
            command: name,
            after: timeout,
        })?
    }

    /// Read one reply, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// [`SmtpError::Timeout`] naming `name`, or any error from
    /// [`Connection::read_reply`].
    pub async fn read_reply_within(
        &mut self,
        name: &'static str,
        timeout: Duration,
    ) -> Result<Reply, SmtpError> {
        tokio::time::timeout(timeout, self.read_reply())
            .await
            .map_err(|_| SmtpError::Timeout {
                command: name,
                after: timeout,
            })?
    }

    /// Read a complete SMTP reply.
    ///
    /// # Errors
    ///
    /// [`SmtpError::Disconnected`] when the peer closes the stream,
    /// [`SmtpError::Parse`] for a malformed or oversized reply and
    /// [`SmtpError::Io`] for read failures.
    pub async fn read_reply(&mut self) -> Result<Reply, SmtpError> {
        loop {
            if let Some((reply, consumed)) = Reply::parse(&self.buffer[..self.buffer_pos])? {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                incoming!("{reply}");
                return Ok(reply);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(SmtpError::Parse(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let stream = self.stream.as_mut().ok_or(SmtpError::Disconnected)?;
            let n = stream.read(&mut self.buffer[self.buffer_pos..]).await?;
            if n == 0 {
                return Err(SmtpError::Disconnected);
            }
            self.buffer_pos += n;
        }
    }

    /// Shut the stream down. Later calls do nothing.
    pub async fn shutdown(&mut self) {
        if let Some(mut stream) = self.stream.take()
            && let Err(err) = stream.shutdown().await
        {
            internal!(level = DEBUG, "Error shutting down connection: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncBufReadExt, BufReader, duplex};

    use super::*;

    #[tokio::test]
    async fn command_round_trip() {
        let (client, server) = duplex(1024);
        let mut connection = Connection::new(Box::new(client), false);

        let peer = tokio::spawn(async move {
            let (reader, mut writer) = tokio::io::split(server);
            let mut reader = BufReader::new(reader);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            writer
                .write_all(b"250-first\r\n250 second\r\n")
                .await
                .unwrap();
            line
        });

        let reply = connection
            .command("NOOP", "NOOP", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(reply, Reply::new(250, vec!["first".to_string(), "second".to_string()]));
        assert_eq!(peer.await.unwrap(), "NOOP\r\n");
    }

    #[tokio::test]
    async fn eof_is_a_disconnect() {
        let (client, server) = duplex(1024);
        drop(server);
        let mut connection = Connection::new(Box::new(client), false);

        let err = connection.read_reply().await.unwrap_err();
        assert!(err.is_disconnect(), "{err}");
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (client, _server) = duplex(1024);
        let mut connection = Connection::new(Box::new(client), false);

        let err = connection
            .command("EHLO", "EHLO localhost", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SmtpError::Timeout { command: "EHLO", .. }), "{err}");
    }
}
