//! Netstring framing for the socketmap stream
//!
//! Frames have the form `<len>":"<payload>","` with `<len>` in ASCII
//! decimal. Payloads may contain arbitrary bytes; a bad length prefix or a
//! missing trailing comma is a protocol error and tears down the connection.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

/// Upper bound on a single frame payload. Socketmap requests are a command
/// word plus one domain name, replies a short directive.
pub const MAX_FRAME_LEN: usize = 65536;

/// Netstring decoding error
#[derive(Error, Debug)]
pub enum NetstringError {
    #[error("invalid length prefix")]
    InvalidLength,

    #[error("frame exceeds {MAX_FRAME_LEN} bytes")]
    Oversized,

    #[error("missing trailing comma")]
    MissingComma,

    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Encode a payload as a netstring frame
pub fn marshal(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.extend_from_slice(payload.len().to_string().as_bytes());
    frame.push(b':');
    frame.extend_from_slice(payload);
    frame.push(b',');
    frame
}

/// Incremental netstring reader over a byte stream
///
/// Yields one payload per frame; `Ok(None)` on a clean end of stream.
pub struct NetstringScanner<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> NetstringScanner<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    /// Read the next frame payload
    ///
    /// EOF before the first length byte ends the stream; EOF anywhere else
    /// inside a frame is an error.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, NetstringError> {
        let first = match self.reader.read_u8().await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let len = self.read_length(first).await?;

        let mut payload = vec![0u8; len];
        self.reader
            .read_exact(&mut payload)
            .await
            .map_err(eof_or_io)?;

        match self.reader.read_u8().await.map_err(eof_or_io)? {
            b',' => Ok(Some(payload)),
            _ => Err(NetstringError::MissingComma),
        }
    }

    /// Parse the ASCII decimal length up to the `:` separator
    async fn read_length(&mut self, first: u8) -> Result<usize, NetstringError> {
        if !first.is_ascii_digit() {
            return Err(NetstringError::InvalidLength);
        }

        let mut digits = vec![first];
        loop {
            match self.reader.read_u8().await.map_err(eof_or_io)? {
                b':' => break,
                b @ b'0'..=b'9' => {
                    // 5 digits already cover MAX_FRAME_LEN
                    if digits.len() >= 6 {
                        return Err(NetstringError::Oversized);
                    }
                    digits.push(b);
                }
                _ => return Err(NetstringError::InvalidLength),
            }
        }

        // "0" is the empty payload; any other leading zero is malformed
        if digits[0] == b'0' && digits.len() > 1 {
            return Err(NetstringError::InvalidLength);
        }

        let len: usize = std::str::from_utf8(&digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(NetstringError::InvalidLength)?;

        if len > MAX_FRAME_LEN {
            return Err(NetstringError::Oversized);
        }

        Ok(len)
    }
}

fn eof_or_io(e: std::io::Error) -> NetstringError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        NetstringError::UnexpectedEof
    } else {
        NetstringError::Io(e)
    }
}
