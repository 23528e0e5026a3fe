//! Framing codec for the structured-message channel.
//!
//! Messages travel over the child's stdio as `Content-Length: N\r\n\r\n{json}`
//! frames. [`FrameReader`] and [`FrameWriter`] keep frame boundaries intact
//! no matter how the underlying stream chunks its bytes; a partial read can
//! never bleed one message into the next.

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Frame size cap (4 MiB) so a misbehaving process cannot force unbounded
/// allocation.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// A framing failure on the stream.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("stream I/O failure: {0}")]
    Io(#[from] std::io::Error),
    /// The header block was malformed. The stream position is unknown
    /// afterwards, so the transport cannot be trusted to resynchronize.
    #[error("malformed frame header: {0}")]
    Header(String),
    /// The announced body exceeded [`MAX_FRAME_BYTES`]. The body has been
    /// consumed and discarded, so the stream is still framed correctly.
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_BYTES}-byte cap")]
    Oversized(usize),
    /// The body was not valid JSON. The stream is still framed correctly.
    #[error("frame body is not valid JSON: {0}")]
    Body(#[from] serde_json::Error),
}

impl FrameError {
    /// Whether the stream can keep being read after this error.
    ///
    /// I/O failures and header desync are fatal; an oversized or
    /// non-JSON body leaves the frame boundary intact.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Header(_))
    }
}

/// Reads frames from an async byte stream.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on clean EOF at a frame boundary.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, FrameError> {
        let content_length = match self.read_headers().await? {
            Some(len) => len,
            None => return Ok(None),
        };

        if content_length > MAX_FRAME_BYTES {
            self.discard_body(content_length).await?;
            return Err(FrameError::Oversized(content_length));
        }

        let mut body = vec![0u8; content_length];
        self.reader.read_exact(&mut body).await?;

        let value = serde_json::from_slice(&body)?;
        Ok(Some(value))
    }

    /// Parse headers until the empty separator line.
    ///
    /// Returns the `Content-Length` value, or `None` on EOF before any
    /// header byte.
    async fn read_headers(&mut self) -> Result<Option<usize>, FrameError> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                // EOF is clean only at a frame boundary. `content_length`
                // being set doesn't prove we reached the separator line.
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                return Err(FrameError::Header(
                    "unexpected EOF while reading headers".to_string(),
                ));
            }
            saw_any_header_bytes = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            // Parse Content-Length case-insensitively; skip other headers.
            if let Some(colon_pos) = trimmed.find(':') {
                let key = &trimmed[..colon_pos];
                if key.eq_ignore_ascii_case("Content-Length") {
                    let len: usize = trimmed[colon_pos + 1..].trim().parse().map_err(|_| {
                        FrameError::Header(format!("invalid Content-Length in {trimmed:?}"))
                    })?;
                    content_length = Some(len);
                }
            }
        }

        match content_length {
            Some(len) => Ok(Some(len)),
            None => Err(FrameError::Header(
                "missing Content-Length header".to_string(),
            )),
        }
    }

    /// Consume and drop `len` body bytes, keeping the stream framed.
    async fn discard_body(&mut self, len: usize) -> Result<(), FrameError> {
        let mut remaining = len;
        let mut chunk = [0u8; 8192];
        while remaining > 0 {
            let take = remaining.min(chunk.len());
            self.reader.read_exact(&mut chunk[..take]).await?;
            remaining -= take;
        }
        Ok(())
    }
}

/// Writes frames to an async byte stream.
///
/// One writer per stream; interleaved partial writes would corrupt the
/// framing, so all sends funnel through a single task that owns this.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize and write one frame.
    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<(), FrameError> {
        let body = serde_json::to_string(msg)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(body.as_bytes()).await?;
        self.writer.flush().await?;

        Ok(())
    }
}
