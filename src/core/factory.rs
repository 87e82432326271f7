// src/core/factory.rs

//! Get-or-create access to pooled clients.
//!
//! Concurrent requests for the same client id share one creation attempt: the
//! first caller starts it, later callers await the same shared future, and all
//! of them observe the same client or the same error.

use crate::core::RediscopeError;
use crate::core::client::RedisClient;
use crate::core::database::DatabaseStore;
use crate::core::events::{ClientEvent, ClientEventBus};
use crate::core::metadata::{ClientMetadata, ClientQuery};
use crate::core::registry::ClientRegistry;
use crate::core::strategy::{ConnectionOptions, ConnectionStrategy};
use crate::core::telemetry::{self, TelemetryEvent, TelemetrySink};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type PendingClient = Shared<BoxFuture<'static, Result<Arc<RedisClient>, RediscopeError>>>;

pub struct DatabaseClientFactory {
    store: Arc<dyn DatabaseStore>,
    registry: Arc<ClientRegistry>,
    strategy: Arc<ConnectionStrategy>,
    telemetry: Arc<dyn TelemetrySink>,
    events: ClientEventBus,
    connect_timeout: Duration,
    pending: DashMap<String, PendingClient>,
}

impl DatabaseClientFactory {
    pub fn new(
        store: Arc<dyn DatabaseStore>,
        registry: Arc<ClientRegistry>,
        strategy: Arc<ConnectionStrategy>,
        telemetry: Arc<dyn TelemetrySink>,
        events: ClientEventBus,
        connect_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            registry,
            strategy,
            telemetry,
            events,
            connect_timeout,
            pending: DashMap::new(),
        })
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &ClientEventBus {
        &self.events
    }

    /// Returns the pooled client for `metadata` if it is connected, otherwise
    /// creates one within the connect timeout and stores it.
    pub async fn get_or_create_client(
        self: &Arc<Self>,
        metadata: &ClientMetadata,
    ) -> Result<Arc<RedisClient>, RediscopeError> {
        if let Some(client) = self.registry.get_client_by_metadata(metadata).await {
            return Ok(client);
        }

        let id = metadata.id();
        let pending = match self.pending.entry(id.clone()) {
            Entry::Occupied(occupied) => {
                debug!("Joining in-flight creation of client {id}");
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => {
                let factory = self.clone();
                let metadata = metadata.clone();
                let attempt = async move { factory.create_and_store(metadata).await }
                    .boxed()
                    .shared();
                vacant.insert(attempt.clone());
                attempt
            }
        };

        let result = pending.clone().await;
        self.pending
            .remove_if(&id, |_, stored| stored.ptr_eq(&pending));
        result
    }

    /// Creates a client that is not pooled. The caller owns and must disconnect it.
    pub async fn create_client(
        &self,
        metadata: &ClientMetadata,
    ) -> Result<Arc<RedisClient>, RediscopeError> {
        metadata.validate()?;
        let config = self.store.get(&metadata.database_id).await?;

        let attempt = tokio::time::timeout(
            self.connect_timeout,
            self.strategy
                .create_client(metadata, &config, &ConnectionOptions::with_retry()),
        )
        .await
        .unwrap_or(Err(RediscopeError::ConnectionTimeout));

        match attempt {
            Ok(client) => {
                if config.known_connection_type().is_none()
                    && let Err(e) = self
                        .store
                        .update_connection_type(&config.id, client.connection_type())
                        .await
                {
                    warn!("Could not record connection type for {}: {e}", config.id);
                }
                telemetry::send(
                    self.telemetry.as_ref(),
                    TelemetryEvent::ClientCreated {
                        database_id: config.id.clone(),
                        connection_type: client.connection_type(),
                    },
                );
                Ok(client)
            }
            Err(error) => {
                warn!("Failed to connect to database {}: {error}", config.id);
                telemetry::send(
                    self.telemetry.as_ref(),
                    TelemetryEvent::RedisConnectionFailed {
                        database_id: config.id.clone(),
                        error: error.to_string(),
                    },
                );
                if error.is_connection_error() {
                    self.events.publish(ClientEvent::DatabaseConnectionFailed {
                        database_id: config.id.clone(),
                        error: error.clone(),
                    });
                }
                Err(error)
            }
        }
    }

    async fn create_and_store(
        self: Arc<Self>,
        metadata: ClientMetadata,
    ) -> Result<Arc<RedisClient>, RediscopeError> {
        let client = self.create_client(&metadata).await?;
        self.registry.set_client(client).await
    }

    /// Disconnects every pooled client of a deleted database and announces the deletion.
    pub async fn handle_database_deleted(&self, database_id: &str) -> usize {
        let removed = self
            .registry
            .remove_clients_by_metadata(&ClientQuery::for_database(database_id))
            .await;
        self.events.publish(ClientEvent::DatabaseDeleted {
            database_id: database_id.to_string(),
        });
        removed
    }
}
