// src/core/database.rs

//! Connection profiles for the databases this process talks to, and the store
//! that hands them out by id.

use crate::core::RediscopeError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The deployment topology of a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionType {
    Standalone,
    Cluster,
    Sentinel,
    /// The topology has not been detected yet.
    #[default]
    NotConnected,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionType::Standalone => "STANDALONE",
            ConnectionType::Cluster => "CLUSTER",
            ConnectionType::Sentinel => "SENTINEL",
            ConnectionType::NotConnected => "NOT CONNECTED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A PEM-encoded client certificate and its private key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCertificate {
    pub certificate: String,
    pub key: String,
}

impl fmt::Debug for ClientCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertificate")
            .field("certificate", &"<pem>")
            .field("key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSettings {
    #[serde(default)]
    pub verify_server_cert: bool,
    /// PEM-encoded CA bundle.
    #[serde(default)]
    pub ca_cert: Option<String>,
    #[serde(default)]
    pub client_cert: Option<ClientCertificate>,
    #[serde(default)]
    pub servername: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
}

impl fmt::Debug for SshOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelMaster {
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl fmt::Debug for SentinelMaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SentinelMaster")
            .field("name", &self.name)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Everything needed to open a connection to one database.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConnectionConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tls: Option<TlsSettings>,
    #[serde(default)]
    pub ssh: Option<SshOptions>,
    /// `None` (or `NOT_CONNECTED`) asks the strategy to detect the topology.
    #[serde(default)]
    pub connection_type: Option<ConnectionType>,
    /// Extra seed nodes (cluster) or sentinels.
    #[serde(default)]
    pub nodes: Vec<Endpoint>,
    #[serde(default)]
    pub sentinel_master: Option<SentinelMaster>,
    #[serde(default)]
    pub db: u32,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl fmt::Debug for DatabaseConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConnectionConfig")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("tls", &self.tls.is_some())
            .field("ssh", &self.ssh)
            .field("connection_type", &self.connection_type)
            .field("nodes", &self.nodes)
            .field("sentinel_master", &self.sentinel_master)
            .field("db", &self.db)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl DatabaseConnectionConfig {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            username: None,
            password: None,
            tls: None,
            ssh: None,
            connection_type: None,
            nodes: Vec::new(),
            sentinel_master: None,
            db: 0,
            timeout: default_timeout(),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    /// The configured seed endpoint followed by any extra nodes.
    pub fn seed_endpoints(&self) -> Vec<Endpoint> {
        let first = self.endpoint();
        let mut seeds = vec![first.clone()];
        seeds.extend(self.nodes.iter().filter(|n| **n != first).cloned());
        seeds
    }

    /// Sentinels to query: the explicit node list when present, the main endpoint otherwise.
    pub fn sentinel_endpoints(&self) -> Vec<Endpoint> {
        if self.nodes.is_empty() {
            vec![self.endpoint()]
        } else {
            self.nodes.clone()
        }
    }

    /// The topology that should be used, or `None` if it must be detected.
    pub fn known_connection_type(&self) -> Option<ConnectionType> {
        match self.connection_type {
            Some(ConnectionType::NotConnected) | None => None,
            other => other,
        }
    }
}

/// Supplies connection profiles by database id. Persistence lives outside this crate.
#[async_trait]
pub trait DatabaseStore: Send + Sync {
    async fn get(&self, database_id: &str) -> Result<DatabaseConnectionConfig, RediscopeError>;

    /// Records the topology detected on the first successful connection.
    async fn update_connection_type(
        &self,
        database_id: &str,
        connection_type: ConnectionType,
    ) -> Result<(), RediscopeError>;
}

/// A `DatabaseStore` holding profiles loaded from the configuration file.
#[derive(Debug, Default)]
pub struct InMemoryDatabaseStore {
    databases: DashMap<String, DatabaseConnectionConfig>,
}

impl InMemoryDatabaseStore {
    pub fn new(databases: impl IntoIterator<Item = DatabaseConnectionConfig>) -> Self {
        let store = Self::default();
        for database in databases {
            store.insert(database);
        }
        store
    }

    pub fn insert(&self, database: DatabaseConnectionConfig) {
        self.databases.insert(database.id.clone(), database);
    }

    pub fn remove(&self, database_id: &str) -> Option<DatabaseConnectionConfig> {
        self.databases.remove(database_id).map(|(_, db)| db)
    }

    pub fn ids(&self) -> Vec<String> {
        self.databases.iter().map(|e| e.key().clone()).collect()
    }
}

#[async_trait]
impl DatabaseStore for InMemoryDatabaseStore {
    async fn get(&self, database_id: &str) -> Result<DatabaseConnectionConfig, RediscopeError> {
        self.databases
            .get(database_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RediscopeError::DatabaseNotFound(database_id.to_string()))
    }

    async fn update_connection_type(
        &self,
        database_id: &str,
        connection_type: ConnectionType,
    ) -> Result<(), RediscopeError> {
        let mut entry = self
            .databases
            .get_mut(database_id)
            .ok_or_else(|| RediscopeError::DatabaseNotFound(database_id.to_string()))?;
        entry.connection_type = Some(connection_type);
        Ok(())
    }
}
