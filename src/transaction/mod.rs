//! Transactions and their request façades
//!
//! A transaction moves from `Open` into exactly one terminal state. The
//! terminal state is claimed atomically before the remote request is sent,
//! so racing `commit`/`rollback`/`close` calls produce one remote message.

pub mod concept;
pub mod logic;
pub mod query;

pub use concept::{ConceptManager, RemoteRoleType, RemoteType};
pub use logic::{LogicManager, RemoteRule};
pub use query::QueryManager;

use dashmap::DashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

use crate::stream::RequestTransmitter;
use crate::types::{ClientError, Options, Result, SessionId, TransactionId, TransactionType};
use crate::wire::{Request, Response, StreamTarget};

/// Lifecycle state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionState {
    Open = 0,
    Committed = 1,
    RolledBack = 2,
    Closed = 3,
}

impl TransactionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Committed,
            2 => Self::RolledBack,
            _ => Self::Closed,
        }
    }
}

pub(crate) type TransactionRegistry = DashMap<TransactionId, Transaction>;

struct TransactionInner {
    id: TransactionId,
    session_id: SessionId,
    transaction_type: TransactionType,
    options: Options,
    target: StreamTarget,
    transmitter: RequestTransmitter,
    op_timeout: Duration,
    state: AtomicU8,
    /// Owning session's registry; lookup only
    registry: Weak<TransactionRegistry>,
}

/// Handle to an open unit of work within a session
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    /// Open a transaction and register it with its session
    pub(crate) async fn open(
        session_id: SessionId,
        transaction_type: TransactionType,
        options: Options,
        transmitter: RequestTransmitter,
        op_timeout: Duration,
        registry: &Arc<TransactionRegistry>,
    ) -> Result<Self> {
        let id = TransactionId::new_v4();
        let target = StreamTarget::Transaction { session: session_id.clone(), transaction: id };

        let opened = transmitter
            .submit(
                target.clone(),
                Request::TransactionOpen { transaction_type, options: options.clone() },
            )
            .wait_timeout(op_timeout)
            .await?;
        if opened != Response::Unit {
            return Err(ClientError::missing_response("transaction open acknowledgement"));
        }

        let transaction = Self {
            inner: Arc::new(TransactionInner {
                id,
                session_id,
                transaction_type,
                options,
                target,
                transmitter,
                op_timeout,
                state: AtomicU8::new(TransactionState::Open as u8),
                registry: Arc::downgrade(registry),
            }),
        };
        registry.insert(id, transaction.clone());
        debug!(transaction = %id, "Transaction opened ({})", transaction_type);
        Ok(transaction)
    }

    pub fn id(&self) -> TransactionId {
        self.inner.id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.inner.transaction_type
    }

    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    pub fn state(&self) -> TransactionState {
        TransactionState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.state() == TransactionState::Open
    }

    pub fn query(&self) -> QueryManager<'_> {
        QueryManager::new(self)
    }

    pub fn concepts(&self) -> ConceptManager<'_> {
        ConceptManager::new(self)
    }

    pub fn logic(&self) -> LogicManager<'_> {
        LogicManager::new(self)
    }

    /// Send one request on this transaction's stream and wait for the answer
    pub(crate) async fn execute(&self, request: Request) -> Result<Response> {
        if !self.is_open() {
            return Err(ClientError::transaction_closed());
        }
        self.inner.transmitter.submit(self.inner.target.clone(), request).wait().await
    }

    pub async fn commit(&self) -> Result {
        if !self.claim(TransactionState::Committed) {
            return Err(ClientError::transaction_closed());
        }
        self.finish(Request::TransactionCommit).await
    }

    pub async fn rollback(&self) -> Result {
        if !self.claim(TransactionState::RolledBack) {
            return Err(ClientError::transaction_closed());
        }
        self.finish(Request::TransactionRollback).await
    }

    /// Close the transaction; a no-op once it is in any terminal state
    pub async fn close(&self) -> Result {
        if !self.claim(TransactionState::Closed) {
            return Ok(());
        }
        self.finish(Request::TransactionClose).await
    }

    fn claim(&self, terminal: TransactionState) -> bool {
        self.inner
            .state
            .compare_exchange(
                TransactionState::Open as u8,
                terminal as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Send the terminal request, then leave the session's registry
    async fn finish(&self, request: Request) -> Result {
        let name = request.name();
        let result = self
            .inner
            .transmitter
            .submit(self.inner.target.clone(), request)
            .wait_timeout(self.inner.op_timeout)
            .await;

        if let Some(registry) = self.inner.registry.upgrade() {
            registry.remove(&self.inner.id);
        }

        match result {
            Ok(_) => {
                debug!(transaction = %self.inner.id, "Transaction finished with {}", name);
                Ok(())
            }
            Err(e) => {
                warn!(transaction = %self.inner.id, "{} failed: {}", name, e);
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("type", &self.inner.transaction_type)
            .field("state", &self.state())
            .finish()
    }
}

