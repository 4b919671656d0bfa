//! Database management across a cluster

use tracing::info;

use super::{ClusterClient, ClusterDatabase};
use crate::database::database_not_found;
use crate::types::{ClientError, Result};
use crate::wire::{Request, Response};

/// Database operations routed to whichever cluster server can answer
#[derive(Clone)]
pub struct ClusterDatabaseManager {
    cluster: ClusterClient,
}

impl ClusterDatabaseManager {
    pub(crate) fn new(cluster: ClusterClient) -> Self {
        Self { cluster }
    }

    /// Database with its current replica set
    pub async fn get(&self, name: &str) -> Result<ClusterDatabase> {
        if !self.contains(name).await? {
            return Err(database_not_found(name));
        }
        let database = self.cluster.fetch_database(name).await?;
        self.cluster.coordinator().observe(&database);
        Ok(database)
    }

    pub async fn contains(&self, name: &str) -> Result<bool> {
        self.cluster
            .run_any_server(|client| async move {
                match client.call(Request::DatabaseContains { name: name.to_string() }).await? {
                    Response::Bool(contains) => Ok(contains),
                    _ => Err(ClientError::missing_response("bool")),
                }
            })
            .await
    }

    pub async fn create(&self, name: &str) -> Result {
        self.cluster
            .run_any_server(|client| async move { client.databases().create(name).await })
            .await?;
        info!(database = %name, "Cluster database created");
        Ok(())
    }

    pub async fn all(&self) -> Result<Vec<ClusterDatabase>> {
        let databases = self
            .cluster
            .run_any_server(|client| async move {
                match client.call(Request::ClusterDatabasesAll).await? {
                    Response::ClusterDatabases(databases) => Ok(databases),
                    _ => Err(ClientError::missing_response("cluster database list")),
                }
            })
            .await?;
        for database in &databases {
            self.cluster.coordinator().observe(database);
        }
        Ok(databases)
    }

    /// Schema text, read from any replica
    pub async fn schema(&self, name: &str) -> Result<String> {
        self.cluster
            .run_any_replica(name, |client| async move { client.databases().get(name).await?.schema().await })
            .await
    }

    /// Delete on the primary replica
    pub async fn delete(&self, name: &str) -> Result {
        self.cluster
            .run_primary_replica(name, |client| async move { client.databases().get(name).await?.delete().await })
            .await?;
        info!(database = %name, "Cluster database deleted");
        Ok(())
    }
}
