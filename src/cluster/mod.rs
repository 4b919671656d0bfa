//! Cluster variant: replicas, primary failover and the cluster client

pub mod client;
pub mod database;
pub mod failover;
pub mod replica;

pub use client::ClusterClient;
pub use database::ClusterDatabaseManager;
pub use failover::{FailoverCoordinator, MAX_PRIMARY_RETRIES};
pub use replica::{ClusterDatabase, Replica};
