//! LSP base-protocol framing (`Content-Length: N\r\n\r\n{json}`) as a
//! `tokio_util` codec.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

/// Largest message body accepted from the server.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

const MAX_HEADER_BYTES: usize = 8 * 1024;
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("invalid header line: {0}")]
    InvalidHeader(String),
    #[error("header block exceeds {0} bytes")]
    HeaderTooLarge(usize),
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct LspCodec {
    max_frame_bytes: usize,
    /// Body length of a frame whose header was already consumed.
    body_len: Option<usize>,
}

impl LspCodec {
    pub fn new() -> Self {
        Self::with_max_frame_bytes(MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            body_len: None,
        }
    }
}

impl Default for LspCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LspCodec {
    type Item = Value;
    type Error = CodecError;

    /// A frame whose body is not valid JSON is logged and skipped; only
    /// framing errors end the stream.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, CodecError> {
        loop {
            let body_len = match self.body_len {
                Some(len) => len,
                None => {
                    let Some(end) = find_header_end(src) else {
                        if src.len() > MAX_HEADER_BYTES {
                            return Err(CodecError::HeaderTooLarge(MAX_HEADER_BYTES));
                        }
                        return Ok(None);
                    };
                    let len = parse_content_length(&src[..end])?;
                    if len > self.max_frame_bytes {
                        return Err(CodecError::FrameTooLarge {
                            size: len,
                            limit: self.max_frame_bytes,
                        });
                    }
                    src.advance(end + HEADER_TERMINATOR.len());
                    self.body_len = Some(len);
                    len
                }
            };

            if src.len() < body_len {
                src.reserve(body_len - src.len());
                return Ok(None);
            }

            let body = src.split_to(body_len);
            self.body_len = None;
            match serde_json::from_slice(&body) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => warn!("discarding undecodable frame of {body_len} bytes: {e}"),
            }
        }
    }
}

impl Encoder<Value> for LspCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<(), CodecError> {
        let body = serde_json::to_vec(&item)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        dst.reserve(header.len() + body.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

fn parse_content_length(header: &[u8]) -> Result<usize, CodecError> {
    let text = std::str::from_utf8(header)
        .map_err(|_| CodecError::InvalidHeader("header is not valid UTF-8".into()))?;
    let mut length = None;
    for line in text.split("\r\n").filter(|line| !line.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| CodecError::InvalidHeader(line.to_string()))?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| CodecError::InvalidHeader(line.to_string()))?;
            length = Some(parsed);
        }
    }
    length.ok_or(CodecError::MissingContentLength)
}
