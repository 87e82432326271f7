// src/core/client/fanout.rs

//! Running one operation on every node and joining the results.

use super::RedisClient;
use crate::core::RediscopeError;
use crate::core::errors::ReplyErrorKind;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Per-node errors a fan-out call site has decided to tolerate.
///
/// Reply kinds are checked first. Message fragments exist for servers and
/// modules that return errors without a structured prefix (`Index already
/// exists`, `Unknown Index name`), and are matched case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwallowPolicy {
    kinds: Vec<ReplyErrorKind>,
    fragments: Vec<String>,
}

impl SwallowPolicy {
    /// Tolerates nothing.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: ReplyErrorKind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn message_contains(mut self, fragment: impl Into<String>) -> Self {
        self.fragments.push(fragment.into().to_lowercase());
        self
    }

    pub fn tolerates(&self, error: &RediscopeError) -> bool {
        let RediscopeError::Reply { kind, message } = error else {
            return false;
        };
        if self.kinds.contains(kind) {
            return true;
        }
        let message = message.to_lowercase();
        self.fragments.iter().any(|f| message.contains(f))
    }
}

/// Runs `op` against all `nodes` concurrently and waits for every result.
///
/// Errors tolerated by `policy` are dropped; the first other error (in node
/// order) is returned. On success the values come back in node order.
pub async fn fan_out<T, F, Fut>(
    nodes: &[Arc<RedisClient>],
    op: F,
    policy: &SwallowPolicy,
) -> Result<Vec<T>, RediscopeError>
where
    F: Fn(Arc<RedisClient>) -> Fut,
    Fut: Future<Output = Result<T, RediscopeError>>,
{
    let results = join_all(nodes.iter().cloned().map(&op)).await;

    let mut values = Vec::with_capacity(results.len());
    for (node, result) in nodes.iter().zip(results) {
        match result {
            Ok(value) => values.push(value),
            Err(e) if policy.tolerates(&e) => {
                debug!("Ignoring tolerated error from node {}: {e}", node.id());
            }
            Err(e) => return Err(e),
        }
    }
    Ok(values)
}
