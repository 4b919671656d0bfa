//! In-process mock TypeDB server shared by the integration tests
//!
//! Implements the public `Connector` / `Channel` traits and records every
//! request in the order the server observes it.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tonic::Code;
use uuid::Uuid;

use typedb_client::concept::Numeric;
use typedb_client::connection::{Channel, Connector, DuplexStream, TransportStatus};
use typedb_client::types::SessionId;
use typedb_client::wire::{
    ConceptRequest, LogicRequest, QueryKind, Request, Response, ResponseEnvelope, StreamTarget,
};
use typedb_client::{ClientConfig, ClientError, ClusterDatabase, Replica, Result};

/// How the mock answers one request
pub enum Reply {
    /// Built-in answer
    Default,
    Respond(std::result::Result<Response, TransportStatus>),
    /// Observe the request but never answer it
    Silent,
    /// Built-in answer after a pause
    Delayed(Duration),
}

pub type Handler = Arc<dyn Fn(&str, &Request) -> Reply + Send + Sync>;

/// One request as observed by the server
#[derive(Debug, Clone)]
pub struct Observed {
    pub address: String,
    pub name: &'static str,
    pub target: StreamTarget,
    pub request: Request,
}

struct MockState {
    servers: Vec<String>,
    log: Mutex<Vec<Observed>>,
    handler: RwLock<Option<Handler>>,
    databases: Mutex<Vec<String>>,
    replicas: Mutex<Vec<Replica>>,
    down: Mutex<HashSet<String>>,
    stream_tasks: Mutex<Vec<JoinHandle<()>>>,
    channels: Mutex<Vec<Arc<MockChannel>>>,
}

/// A set of mock servers reachable through one connector
#[derive(Clone)]
pub struct MockServer {
    state: Arc<MockState>,
}

impl MockServer {
    pub fn new(servers: &[&str]) -> Self {
        Self {
            state: Arc::new(MockState {
                servers: servers.iter().map(|s| s.to_string()).collect(),
                log: Mutex::new(Vec::new()),
                handler: RwLock::new(None),
                databases: Mutex::new(vec!["typedb".to_string()]),
                replicas: Mutex::new(Vec::new()),
                down: Mutex::new(HashSet::new()),
                stream_tasks: Mutex::new(Vec::new()),
                channels: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn single() -> Self {
        Self::new(&["localhost:1729"])
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &Request) -> Reply + Send + Sync + 'static,
    {
        *self.state.handler.write() = Some(Arc::new(handler));
    }

    /// Replica set reported for every database: (address, primary, term)
    pub fn set_replicas(&self, replicas: &[(&str, bool, u64)]) {
        *self.state.replicas.lock() = replicas
            .iter()
            .map(|(address, primary, term)| Replica {
                database: String::new(),
                address: address.to_string(),
                primary: *primary,
                preferred: false,
                term: *term,
            })
            .collect();
    }

    pub fn set_preferred(&self, address: &str) {
        for replica in self.state.replicas.lock().iter_mut() {
            replica.preferred = replica.address == address;
        }
    }

    pub fn take_down(&self, address: &str) {
        self.state.down.lock().insert(address.to_string());
    }

    /// Shut down every channel connected to `address` so far
    pub fn shutdown_channels(&self, address: &str) {
        for channel in self.state.channels.lock().iter() {
            if channel.address == address {
                channel.shutdown.store(true, Ordering::SeqCst);
            }
        }
    }

    /// End every open stream as if the server reset them
    pub fn break_streams(&self) {
        for task in self.state.stream_tasks.lock().drain(..) {
            task.abort();
        }
    }

    pub fn observed(&self) -> Vec<Observed> {
        self.state.log.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.state.log.lock().iter().filter(|o| o.name == name).count()
    }

    pub fn addresses_of(&self, name: &str) -> Vec<String> {
        self.state
            .log
            .lock()
            .iter()
            .filter(|o| o.name == name)
            .map(|o| o.address.clone())
            .collect()
    }

    /// Wait until the server has observed `n` requests named `name`
    pub async fn wait_for(&self, name: &str, n: usize) {
        for _ in 0..500 {
            if self.count(name) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("server never observed {} x {}", n, name);
    }

    fn observe(&self, address: &str, target: StreamTarget, request: &Request) {
        self.state.log.lock().push(Observed {
            address: address.to_string(),
            name: request.name(),
            target,
            request: request.clone(),
        });
    }

    async fn reply(&self, address: &str, request: &Request) -> Option<std::result::Result<Response, TransportStatus>> {
        let handler = self.state.handler.read().clone();
        match handler.map(|h| h(address, request)).unwrap_or(Reply::Default) {
            Reply::Respond(result) => Some(result),
            Reply::Silent => None,
            Reply::Default => Some(Ok(self.default_reply(request))),
            Reply::Delayed(pause) => {
                tokio::time::sleep(pause).await;
                Some(Ok(self.default_reply(request)))
            }
        }
    }

    fn default_reply(&self, request: &Request) -> Response {
        match request {
            Request::ConnectionOpen { .. } => Response::ConnectionOpen { server_version: "mock".into() },
            Request::ServersAll => Response::Servers(self.state.servers.clone()),
            Request::DatabaseContains { name } => Response::Bool(self.state.databases.lock().contains(name)),
            Request::DatabaseCreate { name } => {
                self.state.databases.lock().push(name.clone());
                Response::Unit
            }
            Request::DatabaseDelete { name } => {
                self.state.databases.lock().retain(|db| db != name);
                Response::Unit
            }
            Request::DatabaseAll => Response::Databases(self.state.databases.lock().clone()),
            Request::DatabaseSchema { .. }
            | Request::DatabaseTypeSchema { .. }
            | Request::DatabaseRuleSchema { .. } => Response::Text("define".into()),
            Request::DatabaseReplicas { name } => Response::Replicas(self.replicas_of(name)),
            Request::ClusterDatabasesAll => Response::ClusterDatabases(
                self.state
                    .databases
                    .lock()
                    .clone()
                    .into_iter()
                    .map(|name| ClusterDatabase { replicas: self.replicas_of(&name), name })
                    .collect(),
            ),
            Request::SessionOpen { .. } => Response::SessionOpened {
                session: SessionId::new(Uuid::new_v4().as_bytes().to_vec()),
            },
            Request::SessionPulse { .. } => Response::Bool(true),
            Request::Query(query) => match query.kind {
                QueryKind::Match | QueryKind::Insert | QueryKind::Update => Response::ConceptMaps(Vec::new()),
                QueryKind::MatchAggregate => Response::Numeric(Numeric::Long(0)),
                _ => Response::Unit,
            },
            Request::Concept(ConceptRequest::GetThingType { .. }) => Response::Type(None),
            Request::Concept(ConceptRequest::GetThing { .. }) => Response::Thing(None),
            Request::Logic(LogicRequest::GetRule { .. }) => Response::Rule(None),
            Request::Logic(LogicRequest::GetRules) => Response::Rules(Vec::new()),
            _ => Response::Unit,
        }
    }

    fn replicas_of(&self, database: &str) -> Vec<Replica> {
        self.state
            .replicas
            .lock()
            .iter()
            .map(|replica| Replica { database: database.to_string(), ..replica.clone() })
            .collect()
    }
}

#[async_trait]
impl Connector for MockServer {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Channel>> {
        if self.state.down.lock().contains(address) {
            return Err(ClientError::ConnectionLost(format!("{} is down", address)));
        }
        let channel = Arc::new(MockChannel {
            address: address.to_string(),
            server: self.clone(),
            shutdown: AtomicBool::new(false),
        });
        self.state.channels.lock().push(Arc::clone(&channel));
        Ok(channel as Arc<dyn Channel>)
    }
}

pub struct MockChannel {
    address: String,
    server: MockServer,
    shutdown: AtomicBool,
}

#[async_trait]
impl Channel for MockChannel {
    fn address(&self) -> &str {
        &self.address
    }

    async fn unary(&self, request: Request) -> std::result::Result<Response, TransportStatus> {
        if self.is_shutdown() || self.server.state.down.lock().contains(&self.address) {
            return Err(TransportStatus::new(Code::Unavailable, "connection refused"));
        }
        self.server.observe(&self.address, StreamTarget::Connection, &request);
        match self.server.reply(&self.address, &request).await {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn open_stream(&self) -> std::result::Result<DuplexStream, TransportStatus> {
        if self.is_shutdown() {
            return Err(TransportStatus::new(Code::Unavailable, "channel shut down"));
        }
        let (stream, mut outbound, inbound) = DuplexStream::pair();
        let server = self.server.clone();
        let address = self.address.clone();

        let task = tokio::spawn(async move {
            while let Some(envelope) = outbound.recv().await {
                server.observe(&address, envelope.target.clone(), &envelope.payload);
                let reply = match server.reply(&address, &envelope.payload).await {
                    Some(Ok(response)) => ResponseEnvelope::ok(envelope.id, response),
                    Some(Err(status)) => ResponseEnvelope::err(envelope.id, status.to_wire()),
                    None => continue,
                };
                if inbound.send(Ok(reply)).is_err() {
                    break;
                }
            }
        });
        self.server.state.stream_tasks.lock().push(task);
        Ok(stream)
    }

    async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Settings that keep tests fast and free of background pulses
pub fn test_config() -> ClientConfig {
    ClientConfig::default()
        .with_parallelisation(2)
        .with_request_timeout(Duration::from_secs(5))
        .with_transaction_timeout(Duration::from_secs(5))
        .with_session_pulse_interval(Duration::ZERO)
        .with_primary_discovery(2, Duration::from_millis(1))
}

pub fn not_primary() -> Reply {
    Reply::Respond(Err(TransportStatus::new(
        Code::Internal,
        "[RPL01] The replica is not the primary replica.",
    )))
}
