//! Replica and cluster database snapshots

use serde::{Deserialize, Serialize};

/// One server's copy of a replicated database
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Replica {
    pub database: String,
    pub address: String,
    pub primary: bool,
    pub preferred: bool,
    /// Leadership epoch; higher terms supersede lower ones
    pub term: u64,
}

impl Replica {
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn is_preferred(&self) -> bool {
        self.preferred
    }

    pub fn term(&self) -> u64 {
        self.term
    }
}

/// A database and the replicas that host it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDatabase {
    pub name: String,
    pub replicas: Vec<Replica>,
}

impl ClusterDatabase {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    /// Replica claiming primary with the highest term
    pub fn primary_replica(&self) -> Option<&Replica> {
        self.replicas
            .iter()
            .filter(|replica| replica.primary)
            .max_by_key(|replica| replica.term)
    }

    pub fn preferred_replica(&self) -> Option<&Replica> {
        self.replicas.iter().find(|replica| replica.preferred)
    }
}

#[cfg(test)]
pub(crate) fn replica(address: &str, primary: bool, term: u64) -> Replica {
    Replica {
        database: "db".into(),
        address: address.into(),
        primary,
        preferred: false,
        term,
    }
}
