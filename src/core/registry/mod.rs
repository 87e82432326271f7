// src/core/registry/mod.rs

//! The process-wide cache of live clients, keyed by the id derived from `ClientMetadata`.
//!
//! At most one live connection exists per id: `set_client` keeps whichever
//! handle was stored first while it stays connected and disconnects the other.
//! Check-then-act on one id happens under the `DashMap` entry lock, and losers
//! are disconnected only after that lock is released.

mod sweeper;

pub use sweeper::IdleSweeperTask;

use crate::core::RediscopeError;
use crate::core::client::RedisClient;
use crate::core::metadata::{ClientMetadata, ClientQuery};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct ClientRegistry {
    clients: DashMap<String, Arc<RedisClient>>,
    max_idle_threshold: Duration,
    shutdown_tx: broadcast::Sender<()>,
    shut_down: AtomicBool,
}

impl ClientRegistry {
    pub fn new(max_idle_threshold: Duration) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            clients: DashMap::new(),
            max_idle_threshold,
            shutdown_tx,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Spawns the idle sweeper. Returns `None` once the registry has been shut down.
    pub fn start_idle_sweeper(self: &Arc<Self>, interval: Duration) -> Option<JoinHandle<()>> {
        if self.shut_down.load(Ordering::Acquire) {
            return None;
        }
        let shutdown_rx = self.shutdown_tx.subscribe();
        let task = IdleSweeperTask::new(self.clone(), interval);
        Some(tokio::spawn(task.run(shutdown_rx)))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Looks a client up and marks it used. Never creates one.
    ///
    /// A client found disconnected is dropped from the registry and `None` is returned.
    pub async fn get_client(&self, id: &str) -> Option<Arc<RedisClient>> {
        let client = self.clients.get(id).map(|entry| entry.value().clone())?;

        if !client.is_connected() {
            let removed = self.clients.remove_if(id, |_, stored| Arc::ptr_eq(stored, &client));
            if removed.is_some() {
                debug!("Dropping disconnected client {id}");
                self.disconnect_quietly(&client).await;
            }
            return None;
        }

        client.touch();
        Some(client)
    }

    pub async fn get_client_by_metadata(
        &self,
        metadata: &ClientMetadata,
    ) -> Option<Arc<RedisClient>> {
        self.get_client(&metadata.id()).await
    }

    /// Stores `client` unless a connected client with the same id already exists,
    /// and returns whichever client ends up stored.
    pub async fn set_client(
        &self,
        client: Arc<RedisClient>,
    ) -> Result<Arc<RedisClient>, RediscopeError> {
        client.metadata().validate()?;

        let (stored, loser) = match self.clients.entry(client.id().to_string()) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get().clone();
                if Arc::ptr_eq(&existing, &client) {
                    (existing, None)
                } else if existing.is_connected() {
                    (existing, Some(client))
                } else {
                    occupied.insert(client.clone());
                    (client, Some(existing))
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(client.clone());
                (client, None)
            }
        };

        if let Some(loser) = loser {
            debug!("Client {} already registered, disconnecting duplicate", loser.id());
            self.disconnect_quietly(&loser).await;
        }
        stored.touch();
        Ok(stored)
    }

    /// Disconnects and removes one client. Returns how many were removed (0 or 1).
    pub async fn remove_client(&self, id: &str) -> usize {
        match self.clients.remove(id) {
            Some((_, client)) => {
                self.disconnect_quietly(&client).await;
                1
            }
            None => 0,
        }
    }

    pub async fn remove_client_by_metadata(&self, metadata: &ClientMetadata) -> usize {
        self.remove_client(&metadata.id()).await
    }

    /// Disconnects and removes every client matching `query`.
    pub async fn remove_clients_by_metadata(&self, query: &ClientQuery) -> usize {
        let matching = self.find_clients(query);
        let mut removed = 0;
        for client in matching {
            if self
                .clients
                .remove_if(client.id(), |_, stored| Arc::ptr_eq(stored, &client))
                .is_some()
            {
                self.disconnect_quietly(&client).await;
                removed += 1;
            }
        }
        removed
    }

    pub fn find_clients(&self, query: &ClientQuery) -> Vec<Arc<RedisClient>> {
        self.clients
            .iter()
            .filter(|entry| query.matches(entry.value().metadata()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Evicts every client idle for longer than the configured threshold.
    pub async fn sync_clients(&self) -> usize {
        let now = Instant::now();
        let threshold = self.max_idle_threshold;
        let idle: Vec<Arc<RedisClient>> = self
            .clients
            .iter()
            .filter(|entry| entry.value().idle_for(now) > threshold)
            .map(|entry| entry.value().clone())
            .collect();

        let mut evicted = 0;
        for client in idle {
            // Skip clients used or replaced since the scan.
            let removed = self.clients.remove_if(client.id(), |_, stored| {
                Arc::ptr_eq(stored, &client) && stored.idle_for(now) > threshold
            });
            if removed.is_some() {
                debug!("Evicting idle client {}", client.id());
                self.disconnect_quietly(&client).await;
                evicted += 1;
            }
        }
        evicted
    }

    /// Stops the sweeper and disconnects every client. Returns how many were closed.
    pub async fn shutdown(&self) -> usize {
        self.shut_down.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(());

        let ids: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        let mut closed = 0;
        for id in ids {
            closed += self.remove_client(&id).await;
        }
        info!("Client registry shut down, {closed} clients disconnected.");
        closed
    }

    async fn disconnect_quietly(&self, client: &RedisClient) {
        if let Err(e) = client.disconnect().await {
            warn!("Failed to disconnect client {}: {e}", client.id());
        }
    }
}
