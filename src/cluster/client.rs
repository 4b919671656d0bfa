//! Client for a replicated TypeDB cluster
//!
//! Discovers the cluster's servers from a list of seed addresses and keeps
//! one core [`Client`] per server, connected on first use. Sessions are opened
//! on the primary replica of their database, or on any replica when the
//! options allow reading from secondaries.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{ClusterDatabase, ClusterDatabaseManager, FailoverCoordinator};
use crate::client::{Client, TypeDBClient};
use crate::config::ClientConfig;
use crate::connection::{Connector, WsConnector};
use crate::session::Session;
use crate::types::{ClientError, ErrorKind, Options, Result, SessionType};
use crate::wire::{Request, Response};

struct ClusterInner {
    connector: Arc<dyn Connector>,
    config: ClientConfig,
    servers: RwLock<Vec<String>>,
    /// server address → core client
    clients: DashMap<String, Arc<Client>>,
    coordinator: FailoverCoordinator,
    closed: AtomicBool,
}

/// Shared handle to a cluster connection
#[derive(Clone)]
pub struct ClusterClient {
    inner: Arc<ClusterInner>,
}

impl ClusterClient {
    /// Connect over WebSocket with default settings
    pub async fn open(addresses: &[String]) -> Result<Self> {
        let config = ClientConfig::default();
        let connector = Arc::new(WsConnector::new(config.request_timeout));
        Self::open_with(addresses, connector, config).await
    }

    pub async fn open_with(
        addresses: &[String],
        connector: Arc<dyn Connector>,
        config: ClientConfig,
    ) -> Result<Self> {
        let coordinator = FailoverCoordinator::new(
            config.primary_discovery_attempts,
            config.primary_discovery_backoff,
        );
        let cluster = Self {
            inner: Arc::new(ClusterInner {
                connector,
                config,
                servers: RwLock::new(Vec::new()),
                clients: DashMap::new(),
                coordinator,
                closed: AtomicBool::new(false),
            }),
        };

        let servers = cluster.discover_servers(addresses).await?;
        info!("Discovered {} cluster server(s): {:?}", servers.len(), servers);
        *cluster.inner.servers.write() = servers;
        Ok(cluster)
    }

    async fn discover_servers(&self, seeds: &[String]) -> Result<Vec<String>> {
        for seed in seeds {
            let attempt = match self.client_for(seed).await {
                Ok(client) => client.call(Request::ServersAll).await,
                Err(e) => Err(e),
            };
            match attempt {
                Ok(Response::Servers(servers)) if !servers.is_empty() => return Ok(servers),
                Ok(_) => warn!(address = %seed, "Server list from seed was empty or malformed"),
                Err(e) if e.kind() == ErrorKind::ConnectionLost => {
                    debug!(address = %seed, "Seed unreachable: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        self.close_clients().await;
        Err(ClientError::ConnectionLost(format!(
            "Unable to connect to TypeDB Cluster. Attempted connecting to the cluster members, but none are available: {:?}",
            seeds
        )))
    }

    /// Core client for a server, connecting and validating on first use
    pub async fn client_for(&self, address: &str) -> Result<Arc<Client>> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ClientError::client_closed());
        }
        let stale = match self.inner.clients.get(address) {
            Some(client) if client.is_open() => return Ok(Arc::clone(client.value())),
            Some(client) => Some(Arc::clone(client.value())),
            None => None,
        };
        if let Some(stale) = stale {
            debug!(address = %address, "Replacing closed server connection");
            stale.close().await;
        }

        let client = Arc::new(
            Client::open_with(address, Arc::clone(&self.inner.connector), self.inner.config.clone()).await?,
        );

        // Another caller may have connected meanwhile
        let (existing, replaced) = match self.inner.clients.entry(address.to_string()) {
            Entry::Occupied(entry) if entry.get().is_open() => (Some(Arc::clone(entry.get())), None),
            Entry::Occupied(mut entry) => (None, Some(entry.insert(Arc::clone(&client)))),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&client));
                (None, None)
            }
        };
        if let Some(replaced) = replaced {
            replaced.close().await;
        }
        match existing {
            Some(existing) => {
                client.close().await;
                Ok(existing)
            }
            None => Ok(client),
        }
    }

    /// Addresses of every server in the cluster
    pub fn servers(&self) -> Vec<String> {
        self.inner.servers.read().clone()
    }

    pub fn coordinator(&self) -> &FailoverCoordinator {
        &self.inner.coordinator
    }

    pub fn databases(&self) -> ClusterDatabaseManager {
        ClusterDatabaseManager::new(self.clone())
    }

    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    pub async fn session(&self, database: &str, session_type: SessionType, options: Options) -> Result<Session> {
        if !self.is_open() {
            return Err(ClientError::client_closed());
        }
        let task = |client: Arc<Client>| {
            let options = options.clone();
            async move { client.session(database, session_type, options).await }
        };
        if options.reads_any_replica() {
            self.run_any_replica(database, task).await
        } else {
            self.run_primary_replica(database, task).await
        }
    }

    /// Run `task` against the primary replica of `database`
    pub async fn run_primary_replica<T, F, Fut>(&self, database: &str, task: F) -> Result<T>
    where
        F: Fn(Arc<Client>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.inner.coordinator.run_primary(self, database, task).await
    }

    /// Run `task` against any reachable replica of `database`
    pub async fn run_any_replica<T, F, Fut>(&self, database: &str, task: F) -> Result<T>
    where
        F: Fn(Arc<Client>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.inner.coordinator.run_any(self, database, task).await
    }

    /// Run `task` on the first server that is reachable
    pub(crate) async fn run_any_server<T, F, Fut>(&self, task: F) -> Result<T>
    where
        F: Fn(Arc<Client>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let servers = self.servers();
        let mut last_error = None;
        for address in &servers {
            let attempt = match self.client_for(address).await {
                Ok(client) => task(client).await,
                Err(e) => Err(e),
            };
            match attempt {
                Err(e) if e.kind() == ErrorKind::ConnectionLost => {
                    debug!(address = %address, "Server unreachable, trying next: {}", e);
                    last_error = Some(e);
                }
                result => return result,
            }
        }
        Err(last_error.unwrap_or_else(|| {
            ClientError::ConnectionLost(format!("No cluster server is reachable: {:?}", servers))
        }))
    }

    /// Fetch the current replica set of a database from any server
    pub async fn fetch_database(&self, database: &str) -> Result<ClusterDatabase> {
        self.run_any_server(|client| async move {
            match client.call(Request::DatabaseReplicas { name: database.to_string() }).await? {
                Response::Replicas(replicas) => Ok(ClusterDatabase { name: database.to_string(), replicas }),
                _ => Err(ClientError::missing_response("replica list")),
            }
        })
        .await
    }

    /// Close every core client; closing twice does nothing
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.close_clients().await;
        info!("Cluster client closed");
    }

    async fn close_clients(&self) {
        let clients: Vec<Arc<Client>> = self
            .inner
            .clients
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        join_all(clients.iter().map(|client| client.close())).await;
        self.inner.clients.clear();
    }
}

#[async_trait]
impl TypeDBClient for ClusterClient {
    fn is_open(&self) -> bool {
        ClusterClient::is_open(self)
    }

    async fn session(&self, database: &str, session_type: SessionType, options: Options) -> Result<Session> {
        ClusterClient::session(self, database, session_type, options).await
    }

    async fn database_names(&self) -> Result<Vec<String>> {
        let databases = self.databases().all().await?;
        Ok(databases.into_iter().map(|db| db.name).collect())
    }

    fn is_cluster(&self) -> bool {
        true
    }

    fn as_cluster(&self) -> Result<&ClusterClient> {
        Ok(self)
    }

    async fn close(&self) {
        ClusterClient::close(self).await
    }
}
