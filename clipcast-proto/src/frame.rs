//! Message framing over a byte stream.
//!
//! [`Framer::extract`] pulls exactly one complete message off the stream:
//! it scans for the blank-line terminator under the header cap, reads the
//! `body-length` line, then reads exactly that many body bytes. Bytes read
//! past the end of the current message stay in the carry-over buffer and
//! feed the next call, so pipelined requests on one connection are never
//! lost. One framer is owned per connection.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::body::Body;
use crate::message::{key, Status, Verb, HEADER_TERMINATOR, MAX_BODY_BYTES, MAX_HEADER_BYTES};

const READ_CHUNK: usize = 4 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    /// Header cap exceeded, `body-length` missing or non-numeric, or the
    /// header was not valid UTF-8.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Orderly EOF before both phases of the message completed.
    #[error("peer closed the stream")]
    PeerClosed,

    /// A per-read deadline elapsed. `idle` is true iff no byte of the
    /// current message had arrived yet, which the connection manager treats
    /// as a paused-but-connected client rather than a fault.
    #[error("read deadline elapsed (idle: {idle})")]
    DeadlineElapsed { idle: bool },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-operation deadlines. A zero duration disables the deadline.
#[derive(Debug, Clone, Copy)]
pub struct FramerConfig {
    /// Deadline for each read while scanning for the header terminator.
    pub header_read_timeout: Duration,
    /// Deadline for each read of body bytes. Writes reuse this deadline.
    pub body_read_timeout: Duration,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            header_read_timeout: Duration::from_secs(30),
            body_read_timeout: Duration::from_secs(30),
        }
    }
}

/// Bidirectional message codec with a carry-over read buffer.
pub struct Framer {
    buf: BytesMut,
    config: FramerConfig,
}

impl Framer {
    #[must_use]
    pub fn new(config: FramerConfig) -> Self {
        Self {
            buf: BytesMut::new(),
            config,
        }
    }

    /// Read one complete message and return it as header ∥ `\n` ∥ body.
    ///
    /// The returned bytes are exactly what the peer sent minus the second
    /// newline of the terminator; no partial message is ever returned.
    pub async fn extract<R>(&mut self, reader: &mut R) -> Result<Bytes, FrameError>
    where
        R: AsyncRead + Unpin,
    {
        let mut idle = self.buf.is_empty();
        let mut scan_from = 0usize;

        // Header phase: scan for the terminator, reading as needed.
        let header_end = loop {
            if let Some(pos) = find_terminator(&self.buf, scan_from) {
                // A read chunk can overshoot the cap before the scan runs.
                if pos + HEADER_TERMINATOR.len() > MAX_HEADER_BYTES {
                    return Err(FrameError::Malformed(format!(
                        "header exceeds {MAX_HEADER_BYTES} byte cap"
                    )));
                }
                break pos;
            }
            if self.buf.len() >= MAX_HEADER_BYTES {
                return Err(FrameError::Malformed(format!(
                    "header exceeds {MAX_HEADER_BYTES} byte cap without terminator"
                )));
            }
            // The terminator may straddle a read boundary.
            scan_from = self.buf.len().saturating_sub(1);
            self.read_some(reader, self.config.header_read_timeout, idle)
                .await?;
            idle = false;
        };

        let header = self.buf.split_to(header_end).freeze();
        let _ = self.buf.split_to(HEADER_TERMINATOR.len());

        let body_len = parse_body_length(&header)?;
        if body_len > MAX_BODY_BYTES {
            return Err(FrameError::Malformed(format!(
                "declared body of {body_len} bytes exceeds {MAX_BODY_BYTES} byte cap"
            )));
        }

        // Body phase: read exactly body_len bytes past the terminator.
        while self.buf.len() < body_len {
            self.read_some(reader, self.config.body_read_timeout, false)
                .await?;
        }
        let body = self.buf.split_to(body_len);
        tracing::trace!(
            header_len = header.len(),
            body_len,
            "extracted one message"
        );

        let mut message = BytesMut::with_capacity(header.len() + 1 + body.len());
        message.extend_from_slice(&header);
        message.put_u8(b'\n');
        message.extend_from_slice(&body);
        Ok(message.freeze())
    }

    /// Compose and send a response as a single buffered write.
    ///
    /// A body is only ever attached to [`Status::Ok`]; error statuses are
    /// written with `body-length 0`.
    pub async fn write_response<W>(
        &self,
        writer: &mut W,
        status: Status,
        body: Option<&Body>,
    ) -> Result<(), FrameError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut out = BytesMut::new();
        out.extend_from_slice(key::RESPONSE_TYPE.as_bytes());
        out.put_u8(b' ');
        out.extend_from_slice(status.as_str().as_bytes());
        out.put_u8(b'\n');

        let encoded = match body {
            Some(body) if status == Status::Ok => {
                out.extend_from_slice(key::SERIALIZED_OBJECT.as_bytes());
                out.put_u8(b' ');
                out.extend_from_slice(body.object_name().as_bytes());
                out.put_u8(b'\n');
                Some(body.encode())
            }
            _ => None,
        };
        let body_len = encoded.as_ref().map_or(0, Bytes::len);

        out.extend_from_slice(key::BODY_LENGTH.as_bytes());
        out.put_u8(b' ');
        out.extend_from_slice(body_len.to_string().as_bytes());
        out.extend_from_slice(HEADER_TERMINATOR);
        if let Some(encoded) = encoded {
            out.extend_from_slice(&encoded);
        }

        self.write_all(writer, &out).await
    }

    /// Compose and send a request. Requests carry no body.
    pub async fn write_request<W>(
        &self,
        writer: &mut W,
        verb: Verb,
        fields: &[(&str, &str)],
    ) -> Result<(), FrameError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut out = BytesMut::new();
        out.extend_from_slice(key::REQUEST_TYPE.as_bytes());
        out.put_u8(b' ');
        out.extend_from_slice(verb.as_str().as_bytes());
        out.put_u8(b'\n');
        for (name, value) in fields {
            out.extend_from_slice(name.as_bytes());
            out.put_u8(b' ');
            out.extend_from_slice(value.as_bytes());
            out.put_u8(b'\n');
        }
        out.extend_from_slice(key::BODY_LENGTH.as_bytes());
        out.extend_from_slice(b" 0");
        out.extend_from_slice(HEADER_TERMINATOR);

        self.write_all(writer, &out).await
    }

    async fn write_all<W>(&self, writer: &mut W, data: &[u8]) -> Result<(), FrameError>
    where
        W: AsyncWrite + Unpin,
    {
        let deadline = self.config.body_read_timeout;
        with_deadline(deadline, writer.write_all(data))
            .await
            .ok_or(FrameError::DeadlineElapsed { idle: false })??;
        with_deadline(deadline, writer.flush())
            .await
            .ok_or(FrameError::DeadlineElapsed { idle: false })??;
        Ok(())
    }

    async fn read_some<R>(
        &mut self,
        reader: &mut R,
        deadline: Duration,
        idle: bool,
    ) -> Result<usize, FrameError>
    where
        R: AsyncRead + Unpin,
    {
        self.buf.reserve(READ_CHUNK);
        let n = with_deadline(deadline, reader.read_buf(&mut self.buf))
            .await
            .ok_or(FrameError::DeadlineElapsed { idle })??;
        if n == 0 {
            return Err(FrameError::PeerClosed);
        }
        Ok(n)
    }
}

/// Run a future under an optional deadline; `None` means the deadline
/// elapsed, zero duration means no deadline.
async fn with_deadline<F: std::future::Future>(deadline: Duration, fut: F) -> Option<F::Output> {
    if deadline.is_zero() {
        Some(fut.await)
    } else {
        tokio::time::timeout(deadline, fut).await.ok()
    }
}

fn find_terminator(buf: &[u8], from: usize) -> Option<usize> {
    if buf.len() < HEADER_TERMINATOR.len() {
        return None;
    }
    buf[from..]
        .windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
        .map(|pos| pos + from)
}

fn parse_body_length(header: &[u8]) -> Result<usize, FrameError> {
    let text = std::str::from_utf8(header)
        .map_err(|_| FrameError::Malformed("header is not valid UTF-8".to_string()))?;
    for line in text.split('\n') {
        if let Some((name, value)) = line.split_once(' ') {
            if name == key::BODY_LENGTH {
                return value.parse().map_err(|_| {
                    FrameError::Malformed(format!("non-numeric {}: {value:?}", key::BODY_LENGTH))
                });
            }
        }
    }
    Err(FrameError::Malformed(format!(
        "missing {} header line",
        key::BODY_LENGTH
    )))
}
