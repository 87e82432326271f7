// src/core/strategy/mod.rs

//! Builds a ready `RedisClient` for one database, whatever its topology.
//!
//! Each `create_*` method opens a pending native connection, optionally through
//! an SSH tunnel, and settles once on the first terminal lifecycle event.

mod readiness;
mod retry;

pub use retry::RetryPolicy;

use crate::core::RediscopeError;
use crate::core::client::{ClientTopology, RedisClient};
use crate::core::database::{ConnectionType, DatabaseConnectionConfig, Endpoint};
use crate::core::metadata::ClientMetadata;
use crate::core::native::{
    ClusterParams, ConnectParams, LifecycleEvents, NativeConnector, SentinelParams,
};
use crate::core::ssh::{SshTunnel, SshTunnelProvider, TunnelEvents};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-call knobs for a connection attempt.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    /// Keep reconnecting on transient failures instead of failing on the first error.
    pub use_retry: bool,
    /// Overrides the default `rediscope-<context>-<db id>` connection name.
    pub connection_name: Option<String>,
}

impl ConnectionOptions {
    pub fn with_retry() -> Self {
        Self {
            use_retry: true,
            ..Default::default()
        }
    }
}

/// A tunnel established for one connection attempt.
struct OpenTunnel {
    tunnel: Arc<dyn SshTunnel>,
    events: TunnelEvents,
}

pub struct ConnectionStrategy {
    connector: Arc<dyn NativeConnector>,
    ssh: Arc<dyn SshTunnelProvider>,
    retry: RetryPolicy,
    max_retries_per_request: Option<u32>,
}

impl ConnectionStrategy {
    pub fn new(
        connector: Arc<dyn NativeConnector>,
        ssh: Arc<dyn SshTunnelProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            connector,
            ssh,
            retry,
            max_retries_per_request: None,
        }
    }

    /// Fails queued commands after this many reconnect attempts instead of holding them.
    pub fn with_max_retries_per_request(mut self, max: u32) -> Self {
        self.max_retries_per_request = Some(max);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn node_params(
        &self,
        metadata: &ClientMetadata,
        config: &DatabaseConnectionConfig,
        options: &ConnectionOptions,
        endpoint: Endpoint,
        db: u32,
    ) -> ConnectParams {
        ConnectParams {
            endpoint,
            username: config.username.clone(),
            password: config.password.clone(),
            tls: config.tls.clone(),
            db,
            connection_name: Some(
                options
                    .connection_name
                    .clone()
                    .unwrap_or_else(|| metadata.connection_name()),
            ),
            retry: options.use_retry.then_some(self.retry),
            max_retries_per_request: self.max_retries_per_request,
            connect_timeout: config.timeout,
        }
    }

    async fn open_tunnel(
        &self,
        config: &DatabaseConnectionConfig,
    ) -> Result<Option<OpenTunnel>, RediscopeError> {
        let Some(ssh) = &config.ssh else {
            return Ok(None);
        };
        let (tunnel, events) = self.ssh.create_tunnel(ssh, &config.endpoint()).await?;
        debug!(
            "SSH tunnel for database {} listening on {}",
            config.id,
            tunnel.local_endpoint()
        );
        Ok(Some(OpenTunnel { tunnel, events }))
    }

    /// Opens one standalone connection.
    ///
    /// Configurations that carry a sentinel master always use db 0 here; otherwise
    /// the db requested in `metadata` wins over the configured one.
    pub async fn create_standalone_client(
        &self,
        metadata: &ClientMetadata,
        config: &DatabaseConnectionConfig,
        options: &ConnectionOptions,
    ) -> Result<Arc<RedisClient>, RediscopeError> {
        let mut tunnel = self.open_tunnel(config).await?;
        let endpoint = tunnel
            .as_ref()
            .map(|t| t.tunnel.local_endpoint())
            .unwrap_or_else(|| config.endpoint());
        let db = if config.sentinel_master.is_some() {
            0
        } else {
            metadata.db.unwrap_or(config.db)
        };

        let params = self.node_params(metadata, config, options, endpoint, db);
        let opened = self.connector.open_standalone(params);
        let (connection, events) = match opened {
            Ok(pending) => pending,
            Err(e) => return Err(fail_with_tunnel(e, tunnel).await),
        };

        match self.settle(events, options, tunnel.as_mut()).await {
            Ok(events) => {
                let client = RedisClient::new(
                    metadata.clone(),
                    ClientTopology::Standalone(connection),
                    tunnel.map(|t| t.tunnel),
                );
                self.finish(&client, events);
                Ok(client)
            }
            Err(e) => {
                if let Err(disconnect_error) = connection.disconnect().await {
                    debug!("Ignoring disconnect failure after failed attempt: {disconnect_error}");
                }
                Err(fail_with_tunnel(e, tunnel).await)
            }
        }
    }

    /// Opens a cluster connection that discovers the topology from the seed nodes.
    ///
    /// Failures are reported as the node-level error when one is available, so a
    /// non-cluster server shows up as `NotACluster`.
    pub async fn create_cluster_client(
        &self,
        metadata: &ClientMetadata,
        config: &DatabaseConnectionConfig,
        options: &ConnectionOptions,
    ) -> Result<Arc<RedisClient>, RediscopeError> {
        if config.ssh.is_some() {
            return Err(RediscopeError::Unsupported(
                "SSH is unsupported for cluster databases".into(),
            ));
        }
        let params = ClusterParams {
            seeds: config.seed_endpoints(),
            node: self.node_params(metadata, config, options, config.endpoint(), 0),
        };
        let (cluster, events) = self
            .connector
            .open_cluster(params)
            .map_err(RediscopeError::into_most_specific)?;

        match self.settle(events, options, None).await {
            Ok(events) => {
                let client =
                    RedisClient::new(metadata.clone(), ClientTopology::Cluster(cluster), None);
                self.finish(&client, events);
                Ok(client)
            }
            Err(e) => {
                if let Err(disconnect_error) = cluster.disconnect().await {
                    debug!("Ignoring disconnect failure after failed attempt: {disconnect_error}");
                }
                Err(e.into_most_specific())
            }
        }
    }

    /// Opens a connection to the master currently advertised by the sentinels.
    pub async fn create_sentinel_client(
        &self,
        metadata: &ClientMetadata,
        config: &DatabaseConnectionConfig,
        options: &ConnectionOptions,
    ) -> Result<Arc<RedisClient>, RediscopeError> {
        let master = config.sentinel_master.as_ref().ok_or_else(|| {
            RediscopeError::ConnectionFailed("sentinel master is not configured".into())
        })?;

        let mut tunnel = self.open_tunnel(config).await?;
        let sentinels = match &tunnel {
            Some(t) => vec![t.tunnel.local_endpoint()],
            None => config.sentinel_endpoints(),
        };

        let mut node = self.node_params(
            metadata,
            config,
            options,
            config.endpoint(),
            metadata.db.unwrap_or(config.db),
        );
        node.username = master.username.clone();
        node.password = master.password.clone();
        let params = SentinelParams {
            sentinels,
            master_name: master.name.clone(),
            sentinel_username: config.username.clone(),
            sentinel_password: config.password.clone(),
            node,
        };

        let (connection, events) = match self.connector.open_sentinel(params) {
            Ok(pending) => pending,
            Err(e) => return Err(fail_with_tunnel(e, tunnel).await),
        };

        match self.settle(events, options, tunnel.as_mut()).await {
            Ok(events) => {
                let client = RedisClient::new(
                    metadata.clone(),
                    ClientTopology::Sentinel(connection),
                    tunnel.map(|t| t.tunnel),
                );
                self.finish(&client, events);
                Ok(client)
            }
            Err(e) => {
                if let Err(disconnect_error) = connection.disconnect().await {
                    debug!("Ignoring disconnect failure after failed attempt: {disconnect_error}");
                }
                Err(fail_with_tunnel(e, tunnel).await)
            }
        }
    }

    /// Dispatches on the configured topology, detecting it when unknown.
    pub async fn create_client(
        &self,
        metadata: &ClientMetadata,
        config: &DatabaseConnectionConfig,
        options: &ConnectionOptions,
    ) -> Result<Arc<RedisClient>, RediscopeError> {
        match config.known_connection_type() {
            Some(ConnectionType::Standalone) => {
                self.create_standalone_client(metadata, config, options).await
            }
            Some(ConnectionType::Cluster) => {
                self.create_cluster_client(metadata, config, options).await
            }
            Some(ConnectionType::Sentinel) => {
                self.create_sentinel_client(metadata, config, options).await
            }
            Some(ConnectionType::NotConnected) | None => {
                self.create_client_automatically(metadata, config, options)
                    .await
            }
        }
    }

    /// Tries sentinel (only when a master is configured), then cluster, then
    /// standalone. Failures of the earlier attempts are logged and discarded.
    pub async fn create_client_automatically(
        &self,
        metadata: &ClientMetadata,
        config: &DatabaseConnectionConfig,
        options: &ConnectionOptions,
    ) -> Result<Arc<RedisClient>, RediscopeError> {
        if config.sentinel_master.is_some() {
            match self.create_sentinel_client(metadata, config, options).await {
                Ok(client) => return Ok(client),
                Err(e) => debug!("Database {} is not a sentinel deployment: {e}", config.id),
            }
        }

        if config.ssh.is_none() {
            match self.create_cluster_client(metadata, config, options).await {
                Ok(client) => return Ok(client),
                Err(e) => debug!("Database {} is not a cluster: {e}", config.id),
            }
        }

        self.create_standalone_client(metadata, config, options)
            .await
    }

    async fn settle(
        &self,
        events: LifecycleEvents,
        options: &ConnectionOptions,
        tunnel: Option<&mut OpenTunnel>,
    ) -> Result<LifecycleEvents, RediscopeError> {
        readiness::wait_until_ready(events, options.use_retry, tunnel.map(|t| &mut t.events))
            .await
    }

    fn finish(&self, client: &Arc<RedisClient>, events: LifecycleEvents) {
        info!(
            "Connected {} client {} ({})",
            client.connection_type(),
            client.id(),
            client.metadata().context
        );
        tokio::spawn(readiness::follow_lifecycle(client.id().to_string(), events));
    }
}

async fn fail_with_tunnel(error: RediscopeError, tunnel: Option<OpenTunnel>) -> RediscopeError {
    if let Some(open) = tunnel {
        open.tunnel.close().await;
    }
    warn!("Connection attempt failed: {error}");
    error
}
