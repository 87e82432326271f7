// src/core/native/tcp.rs

use super::cluster::TcpCluster;
use super::connection::TcpConnection;
use super::sentinel::SentinelConnection;
use super::{
    ClusterParams, ConnectParams, LifecycleEvents, NativeCluster, NativeConnection,
    NativeConnector, SentinelParams, tls,
};
use crate::core::RediscopeError;
use std::sync::Arc;

/// Connects to real Redis deployments over TCP, optionally wrapped in TLS.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl NativeConnector for TcpConnector {
    fn open_standalone(
        &self,
        params: ConnectParams,
    ) -> Result<(Arc<dyn NativeConnection>, LifecycleEvents), RediscopeError> {
        let tls = params
            .tls
            .as_ref()
            .map(|settings| tls::setup(settings, &params.endpoint.host))
            .transpose()?;
        let (connection, events) = TcpConnection::open(params, tls);
        let connection: Arc<dyn NativeConnection> = connection;
        Ok((connection, events))
    }

    fn open_cluster(
        &self,
        params: ClusterParams,
    ) -> Result<(Arc<dyn NativeCluster>, LifecycleEvents), RediscopeError> {
        let (cluster, events) = TcpCluster::open(params)?;
        let cluster: Arc<dyn NativeCluster> = cluster;
        Ok((cluster, events))
    }

    fn open_sentinel(
        &self,
        params: SentinelParams,
    ) -> Result<(Arc<dyn NativeConnection>, LifecycleEvents), RediscopeError> {
        let (connection, events) = SentinelConnection::open(params)?;
        let connection: Arc<dyn NativeConnection> = connection;
        Ok((connection, events))
    }
}
