//! Primary tracking and bounded failover across replicas
//!
//! The coordinator remembers the last primary seen for each database along
//! with its term. A replica reporting a lower term than one already observed
//! is never adopted as primary.
//!
//! An operation rejected with `ReplicaNotPrimary` is retried against a freshly
//! discovered primary at most [`MAX_PRIMARY_RETRIES`] times; the next
//! rejection is returned to the caller.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ClusterClient, ClusterDatabase, Replica};
use crate::client::Client;
use crate::types::{ClientError, ErrorKind, Result};

pub const MAX_PRIMARY_RETRIES: usize = 1;

pub struct FailoverCoordinator {
    /// database → last adopted primary
    primaries: DashMap<String, Replica>,
    /// database → highest primary term observed
    terms: DashMap<String, u64>,
    /// database → last fetched replica set
    databases: DashMap<String, ClusterDatabase>,
    discovery_attempts: usize,
    discovery_backoff: Duration,
}

impl FailoverCoordinator {
    pub fn new(discovery_attempts: usize, discovery_backoff: Duration) -> Self {
        Self {
            primaries: DashMap::new(),
            terms: DashMap::new(),
            databases: DashMap::new(),
            discovery_attempts: discovery_attempts.max(1),
            discovery_backoff,
        }
    }

    pub fn known_primary(&self, database: &str) -> Option<Replica> {
        self.primaries.get(database).map(|r| r.value().clone())
    }

    pub fn known_database(&self, database: &str) -> Option<ClusterDatabase> {
        self.databases.get(database).map(|d| d.value().clone())
    }

    /// Highest primary term observed for a database
    pub fn last_term(&self, database: &str) -> Option<u64> {
        self.terms.get(database).map(|t| *t.value())
    }

    pub fn forget_primary(&self, database: &str) {
        self.primaries.remove(database);
    }

    /// Record a fetched replica set and adopt its primary unless it is stale
    pub fn observe(&self, database: &ClusterDatabase) -> Option<Replica> {
        self.databases.insert(database.name.clone(), database.clone());

        let candidate = database.primary_replica()?.clone();
        {
            let mut term = self.terms.entry(database.name.clone()).or_insert(0);
            if candidate.term < *term {
                warn!(
                    database = %database.name,
                    address = %candidate.address,
                    "Ignoring stale primary with term {} (already observed term {})",
                    candidate.term,
                    *term
                );
                return None;
            }
            *term = candidate.term;
        }

        self.primaries.insert(database.name.clone(), candidate.clone());
        Some(candidate)
    }

    /// Poll the cluster until a non-stale primary is found
    pub async fn seek_primary(&self, cluster: &ClusterClient, database: &str) -> Result<Replica> {
        for attempt in 0..self.discovery_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.discovery_backoff).await;
            }
            match cluster.fetch_database(database).await {
                Ok(replicas) => {
                    if let Some(primary) = self.observe(&replicas) {
                        info!(
                            database = %database,
                            address = %primary.address,
                            term = primary.term,
                            "Primary replica found"
                        );
                        return Ok(primary);
                    }
                    debug!(database = %database, attempt, "No primary replica yet");
                }
                Err(e) if e.kind() == ErrorKind::ConnectionLost => {
                    debug!(database = %database, attempt, "Replica discovery failed: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(ClientError::ConnectionLost(format!(
            "Unable to find a primary replica for database '{}'",
            database
        )))
    }

    /// Run `task` on the primary replica, failing over once on `ReplicaNotPrimary`
    pub async fn run_primary<T, F, Fut>(&self, cluster: &ClusterClient, database: &str, task: F) -> Result<T>
    where
        F: Fn(Arc<Client>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut replica = match self.known_primary(database) {
            Some(replica) => replica,
            None => self.seek_primary(cluster, database).await?,
        };
        let mut retries = 0;

        loop {
            let client = cluster.client_for(&replica.address).await?;
            match task(client).await {
                Err(ClientError::ReplicaNotPrimary) if retries < MAX_PRIMARY_RETRIES => {
                    retries += 1;
                    info!(
                        database = %database,
                        address = %replica.address,
                        "Replica is no longer primary, seeking new primary (retry {}/{})",
                        retries,
                        MAX_PRIMARY_RETRIES
                    );
                    self.forget_primary(database);
                    replica = self.seek_primary(cluster, database).await?;
                }
                result => return result,
            }
        }
    }

    /// Run `task` on any replica: the primary first (or the preferred replica
    /// when no primary is known), then the others while they are unreachable
    ///
    /// When every replica of a cached replica set is unreachable, the set is
    /// fetched again and tried once more.
    pub async fn run_any<T, F, Fut>(&self, cluster: &ClusterClient, database: &str, task: F) -> Result<T>
    where
        F: Fn(Arc<Client>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (replicas, cached) = match self.known_database(database) {
            Some(replicas) => (replicas, true),
            None => (self.refresh(cluster, database).await?, false),
        };

        match self.try_replicas(cluster, &replicas, &task).await {
            Err(e) if cached && e.kind() == ErrorKind::ConnectionLost => {
                debug!(database = %database, "No cached replica reachable, refreshing replica set: {}", e);
                let replicas = self.refresh(cluster, database).await?;
                self.try_replicas(cluster, &replicas, &task).await
            }
            result => result,
        }
    }

    async fn refresh(&self, cluster: &ClusterClient, database: &str) -> Result<ClusterDatabase> {
        let replicas = cluster.fetch_database(database).await?;
        self.observe(&replicas);
        Ok(replicas)
    }

    async fn try_replicas<T, F, Fut>(&self, cluster: &ClusterClient, database: &ClusterDatabase, task: &F) -> Result<T>
    where
        F: Fn(Arc<Client>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;
        for replica in self.read_order(database) {
            let attempt = match cluster.client_for(&replica.address).await {
                Ok(client) => task(client).await,
                Err(e) => Err(e),
            };
            match attempt {
                Err(e) if e.kind() == ErrorKind::ConnectionLost => {
                    debug!(address = %replica.address, "Replica unreachable, trying next: {}", e);
                    last_error = Some(e);
                }
                result => return result,
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ClientError::ConnectionLost(format!("No replica of database '{}' is reachable", database.name))
        }))
    }

    fn read_order(&self, database: &ClusterDatabase) -> Vec<Replica> {
        let first = self
            .known_primary(&database.name)
            .or_else(|| database.preferred_replica().cloned());

        let mut order = Vec::with_capacity(database.replicas.len());
        if let Some(first) = first {
            order.push(first);
        }
        for replica in &database.replicas {
            if !order.iter().any(|r| r.address == replica.address) {
                order.push(replica.clone());
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::replica::replica;

    fn coordinator() -> FailoverCoordinator {
        FailoverCoordinator::new(1, Duration::from_millis(1))
    }

    fn database(replicas: Vec<Replica>) -> ClusterDatabase {
        ClusterDatabase { name: "db".into(), replicas }
    }

    #[test]
    fn test_observe_adopts_highest_term_primary() {
        let coordinator = coordinator();
        let adopted = coordinator.observe(&database(vec![
            replica("a:1729", true, 4),
            replica("b:1729", true, 6),
        ]));
        assert_eq!(adopted.map(|r| r.address), Some("b:1729".to_string()));
        assert_eq!(coordinator.last_term("db"), Some(6));
    }

    #[test]
    fn test_stale_primary_rejected() {
        let coordinator = coordinator();
        coordinator.observe(&database(vec![replica("b:1729", true, 6)]));
        coordinator.forget_primary("db");

        let stale = coordinator.observe(&database(vec![replica("a:1729", true, 5)]));
        assert!(stale.is_none());
        assert!(coordinator.known_primary("db").is_none());
        assert_eq!(coordinator.last_term("db"), Some(6));
    }

    #[test]
    fn test_equal_term_is_accepted() {
        let coordinator = coordinator();
        coordinator.observe(&database(vec![replica("b:1729", true, 6)]));
        let same = coordinator.observe(&database(vec![replica("b:1729", true, 6)]));
        assert!(same.is_some());
    }

    #[test]
    fn test_read_order_uses_preferred_without_primary() {
        let coordinator = coordinator();
        let mut preferred = replica("c:1729", false, 1);
        preferred.preferred = true;
        let db = database(vec![replica("a:1729", false, 1), preferred]);
        coordinator.observe(&db);

        let order: Vec<_> = coordinator.read_order(&db).into_iter().map(|r| r.address).collect();
        assert_eq!(order, vec!["c:1729", "a:1729"]);
    }
}
