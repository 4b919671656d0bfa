//! Client façade for a single TypeDB server
//!
//! Owns the connection supervisor, the request transmitter and the registry
//! of open sessions. Sessions can only be opened once the connection has been
//! validated with the server's handshake.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::cluster::ClusterClient;
use crate::config::ClientConfig;
use crate::connection::{call_within, Channel, ChannelStatus, ConnectionSupervisor, Connector, WsConnector};
use crate::database::DatabaseManager;
use crate::session::{Session, SessionContext, SessionRegistry};
use crate::stream::RequestTransmitter;
use crate::types::{ClientError, Options, Result, SessionType};
use crate::wire::{Request, Response, PROTOCOL_VERSION};

/// Operations shared by the core and cluster clients
#[async_trait]
pub trait TypeDBClient: Send + Sync {
    fn is_open(&self) -> bool;

    async fn session(&self, database: &str, session_type: SessionType, options: Options) -> Result<Session>;

    async fn database_names(&self) -> Result<Vec<String>>;

    fn is_cluster(&self) -> bool;

    /// The cluster view of this client; `IllegalState` for a core client
    fn as_cluster(&self) -> Result<&ClusterClient>;

    async fn close(&self);
}

/// Client connected to one TypeDB server
pub struct Client {
    address: String,
    supervisor: ConnectionSupervisor,
    channel: Arc<dyn Channel>,
    transmitter: RequestTransmitter,
    sessions: Arc<SessionRegistry>,
    validated: AtomicBool,
    closed: AtomicBool,
    /// Held shared while a session opens, exclusively once by `close`
    gate: RwLock<()>,
    config: ClientConfig,
}

impl Client {
    /// Connect over WebSocket with default settings and validate the connection
    pub async fn open(address: &str) -> Result<Self> {
        let config = ClientConfig::default();
        let connector = Arc::new(WsConnector::new(config.request_timeout));
        Self::open_with(address, connector, config).await
    }

    /// Connect through `connector` and validate the connection
    pub async fn open_with(address: &str, connector: Arc<dyn Connector>, config: ClientConfig) -> Result<Self> {
        let client = Self::connect(address, connector, config).await?;
        if let Err(e) = client.validate_connection().await {
            client.close().await;
            return Err(e);
        }
        Ok(client)
    }

    /// Connect without validating; sessions are refused until
    /// [`Client::validate_connection`] succeeds
    pub async fn connect(address: &str, connector: Arc<dyn Connector>, config: ClientConfig) -> Result<Self> {
        let supervisor = ConnectionSupervisor::new(connector);
        let channel = supervisor.channel(address).await?;
        let transmitter = RequestTransmitter::open(config.parallelisation, Arc::clone(&channel)).await?;

        Ok(Self {
            address: address.to_string(),
            supervisor,
            channel,
            transmitter,
            sessions: Arc::new(DashMap::new()),
            validated: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            gate: RwLock::new(()),
            config,
        })
    }

    /// Perform the connection handshake, returning the server version
    pub async fn validate_connection(&self) -> Result<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::client_closed());
        }
        let request = Request::ConnectionOpen { protocol_version: PROTOCOL_VERSION };
        match self.call(request).await? {
            Response::ConnectionOpen { server_version } => {
                self.validated.store(true, Ordering::SeqCst);
                info!(address = %self.address, server_version = %server_version, "Connection validated");
                Ok(server_version)
            }
            _ => Err(ClientError::missing_response("connection handshake")),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_validated(&self) -> bool {
        self.validated.load(Ordering::SeqCst)
    }

    /// Open once the connection is validated, until closed
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.channel.is_shutdown() && self.is_validated()
    }

    pub async fn session(&self, database: &str, session_type: SessionType, options: Options) -> Result<Session> {
        let _opening = self.gate.read().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::client_closed());
        }
        if !self.is_validated() {
            return Err(ClientError::ConnectionNotValidated);
        }

        let context = SessionContext {
            channel: Arc::clone(&self.channel),
            transmitter: self.transmitter.clone(),
            registry: Arc::downgrade(&self.sessions),
            request_timeout: self.config.request_timeout,
            transaction_timeout: self.config.transaction_timeout,
            pulse_interval: self.config.session_pulse_interval,
        };
        let session = Session::open(database, session_type, options, context).await?;

        if self.closed.load(Ordering::SeqCst) {
            if let Err(e) = session.close().await {
                warn!(session = %session.id(), "Close of session opened during client close failed: {}", e);
            }
            return Err(ClientError::client_closed());
        }
        Ok(session)
    }

    pub fn databases(&self) -> DatabaseManager {
        DatabaseManager::new(Arc::clone(&self.channel), self.config.request_timeout)
    }

    /// Sessions opened through this client and not yet closed
    pub fn open_sessions(&self) -> Vec<Session> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn channel_statuses(&self) -> Vec<ChannelStatus> {
        self.supervisor.all_statuses()
    }

    pub fn transmitter(&self) -> &RequestTransmitter {
        &self.transmitter
    }

    pub fn is_cluster(&self) -> bool {
        false
    }

    pub fn as_cluster(&self) -> Result<&ClusterClient> {
        Err(ClientError::IllegalState(
            "This is a core client; the cluster view is only available on a cluster client.".into(),
        ))
    }

    /// Close sessions, stop the transmitter and shut the channel down
    ///
    /// The channel gets at most the configured shutdown timeout to finish.
    /// Closing twice does nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Session opens already in flight register before the snapshot below
        drop(self.gate.write().await);

        let sessions = self.open_sessions();
        let results = join_all(sessions.iter().map(|session| session.close())).await;
        for (session, result) in sessions.iter().zip(results) {
            if let Err(e) = result {
                warn!(session = %session.id(), "Session close failed during client close: {}", e);
            }
        }

        self.transmitter.close();
        self.supervisor.shutdown_all(self.config.shutdown_timeout).await;
        info!(address = %self.address, "Client closed");
    }

    /// Unary request on this client's channel, bounded by the request timeout
    pub(crate) async fn call(&self, request: Request) -> Result<Response> {
        call_within(self.channel.as_ref(), request, self.config.request_timeout).await
    }
}

#[async_trait]
impl TypeDBClient for Client {
    fn is_open(&self) -> bool {
        Client::is_open(self)
    }

    async fn session(&self, database: &str, session_type: SessionType, options: Options) -> Result<Session> {
        Client::session(self, database, session_type, options).await
    }

    async fn database_names(&self) -> Result<Vec<String>> {
        let databases = self.databases().all().await?;
        Ok(databases.iter().map(|db| db.name().to_string()).collect())
    }

    fn is_cluster(&self) -> bool {
        Client::is_cluster(self)
    }

    fn as_cluster(&self) -> Result<&ClusterClient> {
        Client::as_cluster(self)
    }

    async fn close(&self) {
        Client::close(self).await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.address)
            .field("validated", &self.is_validated())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
