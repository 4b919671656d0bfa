//! Wire messages exchanged with the server
//!
//! Every request travels in a [`RequestEnvelope`] carrying a unique correlation
//! ID and the stream target it belongs to. The server echoes the ID in the
//! matching [`ResponseEnvelope`], with either a typed payload or an error status.

pub mod codec;

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::cluster::{ClusterDatabase, Replica};
use crate::concept::{ConceptMap, Label, Numeric, Rule, Thing, Type, ValueType};
use crate::types::{Options, RequestId, SessionId, SessionType, TransactionId, TransactionType};

/// Protocol version announced during connection validation
pub const PROTOCOL_VERSION: u32 = 1;

/// Logical conversation a request belongs to; doubles as the stream affinity key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamTarget {
    Connection,
    Session(SessionId),
    Transaction {
        session: SessionId,
        transaction: TransactionId,
    },
}

impl StreamTarget {
    /// Stable hash used to pin a target to one of the transmitter's streams
    pub fn affinity(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: RequestId,
    pub target: StreamTarget,
    pub payload: Request,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: RequestId,
    pub body: ResponseBody,
}

impl ResponseEnvelope {
    pub fn ok(id: RequestId, response: Response) -> Self {
        Self { id, body: ResponseBody::Ok(response) }
    }

    pub fn err(id: RequestId, status: WireStatus) -> Self {
        Self { id, body: ResponseBody::Err(status) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseBody {
    Ok(Response),
    Err(WireStatus),
}

/// Error status as carried on the wire (gRPC code number plus description)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireStatus {
    pub code: i32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    ConnectionOpen { protocol_version: u32 },
    ServersAll,

    DatabaseCreate { name: String },
    DatabaseContains { name: String },
    DatabaseAll,
    DatabaseSchema { name: String },
    DatabaseTypeSchema { name: String },
    DatabaseRuleSchema { name: String },
    DatabaseDelete { name: String },
    DatabaseReplicas { name: String },
    ClusterDatabasesAll,

    SessionOpen {
        database: String,
        session_type: SessionType,
        options: Options,
    },
    SessionClose { session: SessionId },
    SessionPulse { session: SessionId },

    TransactionOpen {
        transaction_type: TransactionType,
        options: Options,
    },
    TransactionCommit,
    TransactionRollback,
    TransactionClose,

    Query(QueryRequest),
    Concept(ConceptRequest),
    Logic(LogicRequest),
}

impl Request {
    /// Short name used in log lines and error messages
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionOpen { .. } => "connection_open",
            Self::ServersAll => "servers_all",
            Self::DatabaseCreate { .. } => "database_create",
            Self::DatabaseContains { .. } => "database_contains",
            Self::DatabaseAll => "database_all",
            Self::DatabaseSchema { .. } => "database_schema",
            Self::DatabaseTypeSchema { .. } => "database_type_schema",
            Self::DatabaseRuleSchema { .. } => "database_rule_schema",
            Self::DatabaseDelete { .. } => "database_delete",
            Self::DatabaseReplicas { .. } => "database_replicas",
            Self::ClusterDatabasesAll => "cluster_databases_all",
            Self::SessionOpen { .. } => "session_open",
            Self::SessionClose { .. } => "session_close",
            Self::SessionPulse { .. } => "session_pulse",
            Self::TransactionOpen { .. } => "transaction_open",
            Self::TransactionCommit => "transaction_commit",
            Self::TransactionRollback => "transaction_rollback",
            Self::TransactionClose => "transaction_close",
            Self::Query(_) => "query",
            Self::Concept(_) => "concept",
            Self::Logic(_) => "logic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryKind {
    Define,
    Undefine,
    Match,
    MatchAggregate,
    Insert,
    Delete,
    Update,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub kind: QueryKind,
    pub query: String,
    pub options: Options,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConceptRequest {
    GetThingType { label: String },
    GetThing { iid: Vec<u8> },
    PutEntityType { label: String },
    PutRelationType { label: String },
    PutAttributeType { label: String, value_type: ValueType },
    Type { label: Label, op: TypeOp },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeOp {
    Delete,
    SetLabel { new_label: String },
    SetAbstract,
    UnsetAbstract,
    GetSupertype,
    GetSupertypes,
    GetSubtypes,
    GetSubtypesExplicit,
    GetInstances,
    GetRelates { role_name: String },
    GetRelationTypes,
    GetPlayerTypes,
    GetPlayerTypesExplicit,
    GetRelationInstances,
    GetRelationInstancesExplicit,
    GetPlayerInstances,
    GetPlayerInstancesExplicit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicRequest {
    GetRule { label: String },
    GetRules,
    PutRule { label: String, when: String, then: String },
    Rule { label: String, op: RuleOp },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleOp {
    SetLabel { new_label: String },
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    ConnectionOpen { server_version: String },
    Servers(Vec<String>),
    Unit,
    Bool(bool),
    Text(String),
    Databases(Vec<String>),
    Replicas(Vec<Replica>),
    ClusterDatabases(Vec<ClusterDatabase>),
    SessionOpened { session: SessionId },

    ConceptMaps(Vec<ConceptMap>),
    Numeric(Numeric),
    Type(Option<Type>),
    Types(Vec<Type>),
    Thing(Option<Thing>),
    Things(Vec<Thing>),
    Rule(Option<Rule>),
    Rules(Vec<Rule>),
}

impl Response {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionOpen { .. } => "connection_open",
            Self::Servers(_) => "servers",
            Self::Unit => "unit",
            Self::Bool(_) => "bool",
            Self::Text(_) => "text",
            Self::Databases(_) => "databases",
            Self::Replicas(_) => "replicas",
            Self::ClusterDatabases(_) => "cluster_databases",
            Self::SessionOpened { .. } => "session_opened",
            Self::ConceptMaps(_) => "concept_maps",
            Self::Numeric(_) => "numeric",
            Self::Type(_) => "type",
            Self::Types(_) => "types",
            Self::Thing(_) => "thing",
            Self::Things(_) => "things",
            Self::Rule(_) => "rule",
            Self::Rules(_) => "rules",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_affinity_is_stable_per_transaction() {
        let session = SessionId::new(vec![1, 2, 3]);
        let transaction = Uuid::new_v4();
        let a = StreamTarget::Transaction { session: session.clone(), transaction };
        let b = StreamTarget::Transaction { session, transaction };
        assert_eq!(a.affinity(), b.affinity());
    }
}
