// src/core/protocol/resp_frame.rs

//! The client side of RESP2: commands are encoded as arrays of bulk strings and
//! replies are decoded into `RespFrame`s through a `tokio_util` codec.

use crate::core::RediscopeError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const CRLF: &[u8] = b"\r\n";

// Replies nested deeper than this are rejected instead of recursing further.
const MAX_REPLY_DEPTH: usize = 128;
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// One decoded reply (or one command to encode).
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    /// Builds the array-of-bulk-strings form every command is sent in.
    pub fn command<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        RespFrame::Array(
            args.into_iter()
                .map(|a| RespFrame::BulkString(a.into()))
                .collect(),
        )
    }

    /// Turns an error reply into `Err`, passing every other frame through.
    pub fn into_result(self) -> Result<RespFrame, RediscopeError> {
        match self {
            RespFrame::Error(message) => Err(RediscopeError::reply(message)),
            other => Ok(other),
        }
    }

    /// Reads a textual reply (simple or bulk string).
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespFrame::SimpleString(s) => Some(s.clone()),
            RespFrame::BulkString(b) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, RespFrame::SimpleString(s) if s.eq_ignore_ascii_case("OK"))
    }
}

fn malformed(what: &str) -> RediscopeError {
    RediscopeError::Protocol(format!("malformed RESP reply: {what}"))
}

/// Encodes `RespFrame` commands and decodes `RespFrame` replies.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = RediscopeError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        write_frame(&item, dst);
        Ok(())
    }
}

fn write_header(prefix: u8, len: usize, dst: &mut BytesMut) {
    dst.put_u8(prefix);
    dst.extend_from_slice(len.to_string().as_bytes());
    dst.extend_from_slice(CRLF);
}

fn write_frame(frame: &RespFrame, dst: &mut BytesMut) {
    match frame {
        RespFrame::SimpleString(s) => {
            dst.put_u8(b'+');
            dst.extend_from_slice(s.as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Error(s) => {
            dst.put_u8(b'-');
            dst.extend_from_slice(s.as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Integer(i) => {
            dst.put_u8(b':');
            dst.extend_from_slice(i.to_string().as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespFrame::BulkString(b) => {
            write_header(b'$', b.len(), dst);
            dst.extend_from_slice(b);
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Null => dst.extend_from_slice(b"$-1\r\n"),
        RespFrame::Array(items) => {
            write_header(b'*', items.len(), dst);
            for item in items {
                write_frame(item, dst);
            }
        }
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = RediscopeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let mut cursor = &src[..];
        match read_frame(&mut cursor, 0) {
            Ok(frame) => {
                let consumed = src.len() - cursor.len();
                src.advance(consumed);
                Ok(Some(frame))
            }
            Err(RediscopeError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Reads one CRLF-terminated line and advances past it.
fn read_line<'a>(cursor: &mut &'a [u8]) -> Result<&'a [u8], RediscopeError> {
    let pos = cursor
        .windows(CRLF.len())
        .position(|w| w == CRLF)
        .ok_or(RediscopeError::IncompleteData)?;
    let line = &cursor[..pos];
    *cursor = &cursor[pos + CRLF.len()..];
    Ok(line)
}

fn read_length(cursor: &mut &[u8]) -> Result<i64, RediscopeError> {
    let line = read_line(cursor)?;
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| malformed("invalid length"))
}

fn read_frame(cursor: &mut &[u8], depth: usize) -> Result<RespFrame, RediscopeError> {
    if depth > MAX_REPLY_DEPTH {
        return Err(malformed("nesting too deep"));
    }
    let Some((&marker, rest)) = cursor.split_first() else {
        return Err(RediscopeError::IncompleteData);
    };
    *cursor = rest;

    match marker {
        b'+' => Ok(RespFrame::SimpleString(
            String::from_utf8_lossy(read_line(cursor)?).into_owned(),
        )),
        b'-' => Ok(RespFrame::Error(
            String::from_utf8_lossy(read_line(cursor)?).into_owned(),
        )),
        b':' => Ok(RespFrame::Integer(read_length(cursor)?)),
        b'$' => {
            let len = read_length(cursor)?;
            if len < 0 {
                return Ok(RespFrame::Null);
            }
            let len = len as usize;
            if len > MAX_BULK_LEN {
                return Err(malformed("bulk string too large"));
            }
            if cursor.len() < len + CRLF.len() {
                return Err(RediscopeError::IncompleteData);
            }
            if &cursor[len..len + CRLF.len()] != CRLF {
                return Err(malformed("bulk string not terminated"));
            }
            let data = Bytes::copy_from_slice(&cursor[..len]);
            *cursor = &cursor[len + CRLF.len()..];
            Ok(RespFrame::BulkString(data))
        }
        b'*' => {
            let len = read_length(cursor)?;
            if len < 0 {
                return Ok(RespFrame::Null);
            }
            // Each element takes at least 3 bytes, which bounds the pre-allocation.
            let mut items = Vec::with_capacity((len as usize).min(cursor.len() / 3 + 1));
            for _ in 0..len {
                items.push(read_frame(cursor, depth + 1)?);
            }
            Ok(RespFrame::Array(items))
        }
        other => Err(malformed(&format!("unexpected type byte 0x{other:02x}"))),
    }
}
