//! Sessions: scoped conversations with one database
//!
//! A session owns its open transactions. Closing it closes every transaction
//! first and only then tells the server the session is gone.

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::{call_within, Channel};
use crate::stream::RequestTransmitter;
use crate::transaction::{Transaction, TransactionRegistry};
use crate::types::{ClientError, Options, Result, SessionId, SessionType, TransactionType};
use crate::wire::{Request, Response};

pub(crate) type SessionRegistry = DashMap<SessionId, Session>;

/// Resources a session borrows from its client
pub(crate) struct SessionContext {
    pub channel: Arc<dyn Channel>,
    pub transmitter: RequestTransmitter,
    pub registry: Weak<SessionRegistry>,
    pub request_timeout: Duration,
    pub transaction_timeout: Duration,
    pub pulse_interval: Duration,
}

struct SessionInner {
    id: SessionId,
    database: String,
    session_type: SessionType,
    options: Options,
    context: SessionContext,
    transactions: Arc<TransactionRegistry>,
    open: AtomicBool,
    /// Held shared while a transaction opens, exclusively once by `close`
    gate: RwLock<()>,
    pulse: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to an open session; clones share the same session
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Ask the server for a session and register it with the client
    pub(crate) async fn open(
        database: &str,
        session_type: SessionType,
        options: Options,
        context: SessionContext,
    ) -> Result<Self> {
        let request = Request::SessionOpen {
            database: database.to_string(),
            session_type,
            options: options.clone(),
        };
        let id = match call_within(context.channel.as_ref(), request, context.request_timeout).await? {
            Response::SessionOpened { session } => session,
            _ => return Err(ClientError::missing_response("session id")),
        };

        let pulse = spawn_pulse(
            Arc::clone(&context.channel),
            id.clone(),
            context.pulse_interval,
            context.request_timeout,
        );
        let registry = context.registry.upgrade();

        let session = Self {
            inner: Arc::new(SessionInner {
                id: id.clone(),
                database: database.to_string(),
                session_type,
                options,
                context,
                transactions: Arc::new(DashMap::new()),
                open: AtomicBool::new(true),
                gate: RwLock::new(()),
                pulse: Mutex::new(pulse),
            }),
        };
        if let Some(registry) = registry {
            registry.insert(id.clone(), session.clone());
        }
        info!(session = %id, database = %database, "Session opened ({})", session_type);
        Ok(session)
    }

    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    pub fn database_name(&self) -> &str {
        &self.inner.database
    }

    pub fn session_type(&self) -> SessionType {
        self.inner.session_type
    }

    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Number of transactions currently open on this session
    pub fn open_transactions(&self) -> usize {
        self.inner.transactions.len()
    }

    pub async fn transaction(&self, transaction_type: TransactionType) -> Result<Transaction> {
        self.transaction_with_options(transaction_type, Options::new()).await
    }

    pub async fn transaction_with_options(
        &self,
        transaction_type: TransactionType,
        options: Options,
    ) -> Result<Transaction> {
        let _opening = self.inner.gate.read().await;
        if !self.is_open() {
            return Err(ClientError::session_closed());
        }
        let context = &self.inner.context;
        let transaction = Transaction::open(
            self.inner.id.clone(),
            transaction_type,
            options,
            context.transmitter.clone(),
            context.transaction_timeout,
            &self.inner.transactions,
        )
        .await?;

        if !self.is_open() {
            if let Err(e) = transaction.close().await {
                warn!(transaction = %transaction.id(), "Close of transaction opened during session close failed: {}", e);
            }
            return Err(ClientError::session_closed());
        }
        Ok(transaction)
    }

    /// Close every open transaction, then the session itself
    ///
    /// Closing an already closed session does nothing.
    pub async fn close(&self) -> Result {
        if self
            .inner
            .open
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        if let Some(pulse) = self.inner.pulse.lock().take() {
            pulse.abort();
        }
        // Transaction opens already in flight register before the walk below
        drop(self.inner.gate.write().await);

        let transactions: Vec<Transaction> = self
            .inner
            .transactions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let closed = join_all(transactions.iter().map(|transaction| transaction.close())).await;
        for (transaction, result) in transactions.iter().zip(closed) {
            if let Err(e) = result {
                warn!(transaction = %transaction.id(), "Force-close failed: {}", e);
            }
        }
        self.inner.transactions.clear();

        let context = &self.inner.context;
        let result = call_within(
            context.channel.as_ref(),
            Request::SessionClose { session: self.inner.id.clone() },
            context.request_timeout,
        )
        .await;

        if let Some(registry) = context.registry.upgrade() {
            registry.remove(&self.inner.id);
        }

        match result {
            Ok(_) => {
                info!(session = %self.inner.id, "Session closed");
                Ok(())
            }
            Err(e) => {
                warn!(session = %self.inner.id, "Session close request failed: {}", e);
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("database", &self.inner.database)
            .field("type", &self.inner.session_type)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Keep the session alive on the server; a zero interval disables pulses
fn spawn_pulse(
    channel: Arc<dyn Channel>,
    session: SessionId,
    interval: Duration,
    deadline: Duration,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let request = Request::SessionPulse { session: session.clone() };
            match call_within(channel.as_ref(), request, deadline).await {
                Ok(Response::Bool(true)) => debug!(session = %session, "Session pulse acknowledged"),
                Ok(_) => warn!(session = %session, "Session pulse not acknowledged by server"),
                Err(e) => warn!(session = %session, "Session pulse failed: {}", e),
            }
        }
    }))
}
