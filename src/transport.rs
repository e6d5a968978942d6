//! TCP transport: connecting, line framing, and the two per-connection tasks.
//!
//! The sender drains the [`DispatchQueue`] onto the socket; the receiver
//! frames inbound bytes into lines and watches for silence. Both run until
//! their connection's [`CancellationToken`] fires. Neither touches bot state
//! directly: they report through callbacks so the supervisor decides what a
//! sent line or a received line means.

use std::io;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BotError, Result};
use crate::queue::DispatchQueue;

/// Longest accepted inbound line, terminator included.
pub const MAX_IRC_LINE_LEN: usize = 8191;

/// Upper bound on a single blocking read, so staleness and cancellation are
/// noticed even on a silent socket.
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Open a TCP connection to `addr` (`host:port`).
pub async fn connect(addr: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| BotError::Connect {
            addr: addr.to_owned(),
            source,
        })?;

    if let Err(e) = enable_keepalive(&stream) {
        warn!("failed to enable TCP keepalive: {}", e);
    }
    if let Err(e) = stream.set_nodelay(true) {
        debug!("failed to set TCP_NODELAY: {}", e);
    }
    Ok(stream)
}

fn enable_keepalive(stream: &TcpStream) -> io::Result<()> {
    use socket2::{SockRef, TcpKeepalive};

    let sock = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(120))
        .with_interval(Duration::from_secs(30));

    sock.set_tcp_keepalive(&keepalive)
}

/// Splits a byte stream into protocol lines.
///
/// Lines end at `\n`; a preceding `\r` is dropped. Bytes are decoded as
/// UTF-8 with invalid sequences replaced. Lines longer than
/// [`MAX_IRC_LINE_LEN`] are discarded whole, and blank lines are skipped.
#[derive(Debug)]
pub struct LineBuffer {
    buffer: BytesMut,
    max_line_len: usize,
    /// Inside an over-long line; drop bytes until the next `\n`.
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_max_line_len(MAX_IRC_LINE_LEN)
    }

    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_line_len.min(65536)),
            max_line_len,
            discarding: false,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Read once from `reader` into the buffer. Returns the byte count;
    /// zero means end of stream.
    pub async fn read_from<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> io::Result<usize> {
        self.buffer.reserve(4096);
        reader.read_buf(&mut self.buffer).await
    }

    /// Pop the next complete line.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') else {
                if self.buffer.len() > self.max_line_len {
                    warn!(
                        limit = self.max_line_len,
                        "Discarding over-long inbound line."
                    );
                    self.buffer.clear();
                    self.discarding = true;
                }
                return None;
            };

            let line = self.buffer.split_to(newline + 1);
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if line.len() > self.max_line_len {
                warn!(
                    len = line.len(),
                    limit = self.max_line_len,
                    "Discarding over-long inbound line."
                );
                continue;
            }

            let text = String::from_utf8_lossy(line.chunk());
            let text = text.trim_end_matches(['\r', '\n']);
            if text.trim().is_empty() {
                continue;
            }
            return Some(text.to_owned());
        }
    }

    /// Bytes buffered but not yet returned as a line.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Drain the dispatch queue onto `writer` until `cancel` fires.
///
/// Each line is written with trailing whitespace trimmed and `\r\n`
/// appended, then reported through `on_sent`. A write error ends the task;
/// the receiver's watchdog takes care of the dead connection. Cancellation
/// also interrupts a write that is stuck on a full socket.
pub async fn send_loop<W, F>(
    mut writer: W,
    queue: DispatchQueue,
    cancel: CancellationToken,
    mut on_sent: F,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    F: FnMut(&str),
{
    let mut rx = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        rx = queue.consumer() => rx,
    };

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            line = rx.recv() => match line {
                Some(line) => line,
                None => return Ok(()),
            },
        };

        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        let mut wire = String::with_capacity(line.len() + 2);
        wire.push_str(line);
        wire.push_str("\r\n");

        // A peer that stops reading must not pin the queue past teardown.
        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            written = async {
                writer.write_all(wire.as_bytes()).await?;
                writer.flush().await
            } => written,
        };
        if let Err(e) = written {
            warn!(error = %e, "Failed to send a line; sender stopping.");
            return Err(e);
        }

        debug!("» {}", line);
        on_sent(line);
    }
}

/// Why a receive loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// The connection's cancellation token fired.
    Cancelled,
    /// No successful read for longer than the ping timeout.
    PingTimeout {
        /// Time since the last successful read.
        idle: Duration,
    },
}

/// Read lines from `reader` and hand each to `on_line` until cancelled or
/// the connection goes quiet for longer than `ping_timeout`.
///
/// End of stream and read errors do not end the loop: the connection is
/// marked closed and the loop idles until the staleness check fires, which
/// funnels every failure into the same reconnect path.
pub async fn receive_loop<R, F>(
    mut reader: R,
    cancel: CancellationToken,
    ping_timeout: Duration,
    mut on_line: F,
) -> ReceiveOutcome
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut buffer = LineBuffer::new();
    let mut last_read = Instant::now();
    let mut closed = false;

    loop {
        let idle = last_read.elapsed();
        if idle > ping_timeout {
            return ReceiveOutcome::PingTimeout { idle };
        }

        if closed {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return ReceiveOutcome::Cancelled,
                _ = time::sleep(READ_POLL_INTERVAL) => continue,
            }
        }

        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ReceiveOutcome::Cancelled,
            read = time::timeout(READ_POLL_INTERVAL, buffer.read_from(&mut reader)) => read,
        };

        match read {
            Err(_elapsed) => continue,
            Ok(Ok(0)) => {
                warn!("Connection closed by the server.");
                closed = true;
            }
            Ok(Ok(_)) => {
                last_read = Instant::now();
                while let Some(line) = buffer.next_line() {
                    on_line(&line);
                    if cancel.is_cancelled() {
                        return ReceiveOutcome::Cancelled;
                    }
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Read failed; waiting for the watchdog.");
                closed = true;
            }
        }
    }
}
