// src/core/ssh.rs

//! SSH tunnelling is provided from outside the crate. The strategy only needs a
//! local endpoint to dial and a way to learn that the tunnel went away.

use crate::core::RediscopeError;
use crate::core::database::{Endpoint, SshOptions};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum TunnelEvent {
    Error(RediscopeError),
    Closed,
}

pub type TunnelEvents = mpsc::UnboundedReceiver<TunnelEvent>;

/// An established tunnel forwarding a local port to the database.
#[async_trait]
pub trait SshTunnel: Send + Sync + fmt::Debug {
    /// The local endpoint that replaces the database host and port.
    fn local_endpoint(&self) -> Endpoint;

    async fn close(&self);
}

#[async_trait]
pub trait SshTunnelProvider: Send + Sync {
    /// Opens a tunnel to `target` and returns once it accepts connections.
    async fn create_tunnel(
        &self,
        options: &SshOptions,
        target: &Endpoint,
    ) -> Result<(Arc<dyn SshTunnel>, TunnelEvents), RediscopeError>;
}

/// Used when no SSH implementation is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedSshTunnelProvider;

#[async_trait]
impl SshTunnelProvider for UnsupportedSshTunnelProvider {
    async fn create_tunnel(
        &self,
        options: &SshOptions,
        _target: &Endpoint,
    ) -> Result<(Arc<dyn SshTunnel>, TunnelEvents), RediscopeError> {
        Err(RediscopeError::Unsupported(format!(
            "no SSH tunnel provider configured (requested {}@{}:{})",
            options.username, options.host, options.port
        )))
    }
}
