//! TypeDB client core
//!
//! Sessions and transactions against a TypeDB server or cluster, with
//! request traffic multiplexed over a small set of persistent streams.
//!
//! ## Layers
//!
//! - **Transmitter**: correlates requests and responses over N duplex streams
//! - **Session / Transaction**: lifecycle and registries of open conversations
//! - **Classifier**: maps transport failures onto [`ErrorKind`]s
//! - **Failover**: finds the primary replica and retries once when it moves
//! - **Client / ClusterClient**: the façades applications hold

pub mod classifier;
pub mod client;
pub mod cluster;
pub mod concept;
pub mod config;
pub mod connection;
pub mod database;
pub mod session;
pub mod stream;
pub mod transaction;
pub mod types;
pub mod wire;

pub use client::{Client, TypeDBClient};
pub use cluster::{ClusterClient, ClusterDatabase, ClusterDatabaseManager, Replica};
pub use config::{ClientArgs, ClientConfig};
pub use database::{Database, DatabaseManager};
pub use session::Session;
pub use transaction::{Transaction, TransactionState};
pub use types::{ClientError, ErrorKind, Options, Result, SessionType, TransactionType};
