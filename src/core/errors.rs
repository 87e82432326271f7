// src/core/errors.rs

//! Defines the primary error type for the entire library.

use std::num::ParseIntError;
use std::sync::Arc;
use thiserror::Error;

/// Human-readable message used whenever a database cannot be reached.
pub const NO_CONNECTION_TO_REDIS_DB: &str = "No connection to the Redis Database.";
/// Message used when the server drops the socket before the client is ready.
pub const SERVER_CLOSED_CONNECTION: &str = "Server closed the connection.";

/// Classification of an error reply (`-ERR ...`) returned by a Redis node.
///
/// The first word of the reply is used when Redis provides a structured prefix.
/// Replies without one fall back to `Other`, and callers may still match on the
/// message text (see `SwallowPolicy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyErrorKind {
    Moved,
    Ask,
    TryAgain,
    ClusterDown,
    CrossSlot,
    Busy,
    NoAuth,
    WrongPass,
    NoPerm,
    Loading,
    ReadOnly,
    WrongType,
    /// `-ERR` and anything without a known prefix.
    Other,
}

impl ReplyErrorKind {
    /// Classifies an error reply by its leading token.
    pub fn classify(message: &str) -> Self {
        let prefix = message.split_whitespace().next().unwrap_or_default();
        match prefix {
            "MOVED" => Self::Moved,
            "ASK" => Self::Ask,
            "TRYAGAIN" => Self::TryAgain,
            "CLUSTERDOWN" => Self::ClusterDown,
            "CROSSSLOT" => Self::CrossSlot,
            "BUSY" => Self::Busy,
            "NOAUTH" => Self::NoAuth,
            "WRONGPASS" => Self::WrongPass,
            "NOPERM" => Self::NoPerm,
            "LOADING" => Self::Loading,
            "READONLY" => Self::ReadOnly,
            "WRONGTYPE" => Self::WrongType,
            _ => Self::Other,
        }
    }
}

/// The main error enum for every failure surfaced by the client core.
#[derive(Error, Debug)]
pub enum RediscopeError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Unable to connect to the Redis database: {0}")]
    ConnectionFailed(String),

    #[error("Server closed the connection.")]
    ServerClosedConnection,

    #[error("Connection timed out.")]
    ConnectionTimeout,

    #[error("No connection to the Redis Database.")]
    NoConnection,

    /// Aggregate failure of a cluster connection. `last_node_error` carries the
    /// most specific per-node failure when the cluster layer reported one.
    #[error("Cluster connection failed: {message}")]
    ClusterConnection {
        message: String,
        last_node_error: Option<Box<RediscopeError>>,
    },

    /// The target server is reachable but does not run in cluster mode.
    #[error("Not a cluster: {0}")]
    NotACluster(String),

    #[error("SSH tunnel connection lost.")]
    TunnelConnectionLost,

    #[error("TLS Error: {0}")]
    Tls(String),

    /// An error reply from a Redis node, e.g. `-MOVED 3999 127.0.0.1:6381`.
    #[error("{message}")]
    Reply {
        kind: ReplyErrorKind,
        message: String,
    },

    #[error("Invalid client metadata: {0}")]
    InvalidClientMetadata(String),

    #[error("Database '{0}' was not found")]
    DatabaseNotFound(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Internal Error: {0}")]
    Internal(String),
}

impl RediscopeError {
    /// Builds a `Reply` error, classifying the message.
    pub fn reply(message: impl Into<String>) -> Self {
        let message = message.into();
        RediscopeError::Reply {
            kind: ReplyErrorKind::classify(&message),
            message,
        }
    }

    /// Returns the reply classification when this is a server error reply.
    pub fn reply_kind(&self) -> Option<ReplyErrorKind> {
        match self {
            RediscopeError::Reply { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// True for the failures that mean "the database cannot be reached".
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            RediscopeError::Io(_)
                | RediscopeError::ConnectionFailed(_)
                | RediscopeError::ServerClosedConnection
                | RediscopeError::ConnectionTimeout
                | RediscopeError::NoConnection
                | RediscopeError::ClusterConnection { .. }
                | RediscopeError::TunnelConnectionLost
                | RediscopeError::Tls(_)
        )
    }

    /// True when the server answered but runs a different topology than requested.
    /// Looks through a cluster wrapper at the node error.
    pub fn is_topology_mismatch(&self) -> bool {
        match self {
            RediscopeError::NotACluster(_) => true,
            RediscopeError::ClusterConnection {
                last_node_error: Some(node_error),
                ..
            } => node_error.is_topology_mismatch(),
            _ => false,
        }
    }

    /// Prefers the node-level error attached to a cluster failure over the aggregate.
    pub fn into_most_specific(self) -> Self {
        match self {
            RediscopeError::ClusterConnection {
                last_node_error: Some(node_error),
                ..
            } => *node_error,
            other => other,
        }
    }
}

// `std::io::Error` is not cloneable, so it is shared behind an `Arc`.
impl Clone for RediscopeError {
    fn clone(&self) -> Self {
        match self {
            RediscopeError::Io(e) => RediscopeError::Io(Arc::clone(e)),
            RediscopeError::ConnectionFailed(s) => RediscopeError::ConnectionFailed(s.clone()),
            RediscopeError::ServerClosedConnection => RediscopeError::ServerClosedConnection,
            RediscopeError::ConnectionTimeout => RediscopeError::ConnectionTimeout,
            RediscopeError::NoConnection => RediscopeError::NoConnection,
            RediscopeError::ClusterConnection {
                message,
                last_node_error,
            } => RediscopeError::ClusterConnection {
                message: message.clone(),
                last_node_error: last_node_error.clone(),
            },
            RediscopeError::NotACluster(s) => RediscopeError::NotACluster(s.clone()),
            RediscopeError::TunnelConnectionLost => RediscopeError::TunnelConnectionLost,
            RediscopeError::Tls(s) => RediscopeError::Tls(s.clone()),
            RediscopeError::Reply { kind, message } => RediscopeError::Reply {
                kind: *kind,
                message: message.clone(),
            },
            RediscopeError::InvalidClientMetadata(s) => {
                RediscopeError::InvalidClientMetadata(s.clone())
            }
            RediscopeError::DatabaseNotFound(s) => RediscopeError::DatabaseNotFound(s.clone()),
            RediscopeError::Unsupported(s) => RediscopeError::Unsupported(s.clone()),
            RediscopeError::Protocol(s) => RediscopeError::Protocol(s.clone()),
            RediscopeError::IncompleteData => RediscopeError::IncompleteData,
            RediscopeError::Sink(s) => RediscopeError::Sink(s.clone()),
            RediscopeError::Internal(s) => RediscopeError::Internal(s.clone()),
        }
    }
}

impl PartialEq for RediscopeError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RediscopeError::Io(e1), RediscopeError::Io(e2)) => e1.to_string() == e2.to_string(),
            (RediscopeError::ConnectionFailed(s1), RediscopeError::ConnectionFailed(s2)) => {
                s1 == s2
            }
            (
                RediscopeError::ClusterConnection {
                    message: m1,
                    last_node_error: e1,
                },
                RediscopeError::ClusterConnection {
                    message: m2,
                    last_node_error: e2,
                },
            ) => m1 == m2 && e1 == e2,
            (RediscopeError::NotACluster(s1), RediscopeError::NotACluster(s2)) => s1 == s2,
            (RediscopeError::Tls(s1), RediscopeError::Tls(s2)) => s1 == s2,
            (
                RediscopeError::Reply {
                    kind: k1,
                    message: m1,
                },
                RediscopeError::Reply {
                    kind: k2,
                    message: m2,
                },
            ) => k1 == k2 && m1 == m2,
            (
                RediscopeError::InvalidClientMetadata(s1),
                RediscopeError::InvalidClientMetadata(s2),
            ) => s1 == s2,
            (RediscopeError::DatabaseNotFound(s1), RediscopeError::DatabaseNotFound(s2)) => {
                s1 == s2
            }
            (RediscopeError::Unsupported(s1), RediscopeError::Unsupported(s2)) => s1 == s2,
            (RediscopeError::Protocol(s1), RediscopeError::Protocol(s2)) => s1 == s2,
            (RediscopeError::Sink(s1), RediscopeError::Sink(s2)) => s1 == s2,
            (RediscopeError::Internal(s1), RediscopeError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for RediscopeError {
    fn from(e: std::io::Error) -> Self {
        RediscopeError::Io(Arc::new(e))
    }
}

impl From<std::str::Utf8Error> for RediscopeError {
    fn from(e: std::str::Utf8Error) -> Self {
        RediscopeError::Protocol(format!("invalid UTF-8 in reply: {e}"))
    }
}

impl From<std::string::FromUtf8Error> for RediscopeError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        RediscopeError::Protocol(format!("invalid UTF-8 in reply: {e}"))
    }
}

impl From<ParseIntError> for RediscopeError {
    fn from(e: ParseIntError) -> Self {
        RediscopeError::Protocol(format!("invalid integer: {e}"))
    }
}

impl From<rustls::Error> for RediscopeError {
    fn from(e: rustls::Error) -> Self {
        RediscopeError::Tls(e.to_string())
    }
}

impl From<serde_json::Error> for RediscopeError {
    fn from(e: serde_json::Error) -> Self {
        RediscopeError::Internal(format!("JSON serialization error: {e}"))
    }
}

impl From<tokio::time::error::Elapsed> for RediscopeError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        RediscopeError::ConnectionTimeout
    }
}
