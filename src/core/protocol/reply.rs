// src/core/protocol/reply.rs

//! Caller-facing reply values.

use super::RespFrame;
use crate::core::RediscopeError;
use bytes::Bytes;
use serde::Serialize;

/// How bulk strings in a reply are handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyEncoding {
    /// Decode bulk strings as UTF-8 (lossy).
    #[default]
    Utf8,
    /// Keep bulk strings as raw bytes. Required for exact key/value fidelity.
    Buffer,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandOptions {
    pub reply_encoding: ReplyEncoding,
}

impl CommandOptions {
    pub fn buffer() -> Self {
        Self {
            reply_encoding: ReplyEncoding::Buffer,
        }
    }
}

/// A successful reply. Error replies never reach this type; they become `RediscopeError::Reply`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Nil,
    Status(String),
    Integer(i64),
    Text(String),
    Data(Bytes),
    Array(Vec<Reply>),
}

impl Reply {
    pub fn from_frame(frame: RespFrame, encoding: ReplyEncoding) -> Result<Self, RediscopeError> {
        Ok(match frame {
            RespFrame::Error(message) => return Err(RediscopeError::reply(message)),
            RespFrame::Null => Reply::Nil,
            RespFrame::SimpleString(s) => Reply::Status(s),
            RespFrame::Integer(i) => Reply::Integer(i),
            RespFrame::BulkString(b) => match encoding {
                ReplyEncoding::Buffer => Reply::Data(b),
                ReplyEncoding::Utf8 => Reply::Text(String::from_utf8_lossy(&b).into_owned()),
            },
            RespFrame::Array(items) => Reply::Array(
                items
                    .into_iter()
                    .map(|item| Reply::from_frame(item, encoding))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// Textual view of a status, text or data reply.
    pub fn as_str(&self) -> Option<std::borrow::Cow<'_, str>> {
        match self {
            Reply::Status(s) | Reply::Text(s) => Some(std::borrow::Cow::Borrowed(s)),
            Reply::Data(b) => Some(String::from_utf8_lossy(b)),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(i) => Some(*i),
            _ => None,
        }
    }
}
