// ============================================================================
// In-process Driver
// ============================================================================
//
// A small server living in the same process. The terminal client uses it
// when no remote server is configured, and the tests use it to count remote
// calls, inject failures and simulate server-initiated closes.
//
// Query grammar (first keyword decides):
//   match [filter]   stream stored statements containing `filter`
//   insert <text>    data session + write transaction only
//   define <text>    schema session + write transaction only
//
// Writes stay pending until commit.
//
// ============================================================================

use super::{
    Answer, AnswerStream, CloseHook, DatabaseClient, DatabaseDriver, DriverError, DriverResult,
    SessionHandle, TransactionHandle, TransactionOptions,
};
use crate::connection::config::ConnectionConfig;
use crate::core::{SessionType, TransactionType};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

/// One-shot failure injected into the next matching driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Connect,
    OpenSession,
    OpenTransaction,
    Query,
    Commit,
    Rollback,
    /// The next session reports itself closed as soon as it is handed out
    LostSession,
    /// The next transaction reports itself closed as soon as it is handed out
    LostTransaction,
}

/// Counters of remote calls observed by the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub sessions_opened: usize,
    pub sessions_closed: usize,
    pub live_sessions: usize,
    pub transactions_opened: usize,
    pub transactions_closed: usize,
    pub live_transactions: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

#[derive(Debug, Default)]
struct Counters {
    sessions_opened: AtomicUsize,
    sessions_closed: AtomicUsize,
    transactions_opened: AtomicUsize,
    transactions_closed: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

#[derive(Debug, Default, Clone)]
struct Database {
    schema: Vec<String>,
    data: Vec<String>,
}

#[derive(Debug, Clone)]
enum Write {
    Schema(String),
    Data(String),
}

#[derive(Default)]
struct Server {
    databases: Mutex<BTreeMap<String, Database>>,
    faults: Mutex<Vec<Fault>>,
    counters: Counters,
    answer_delay: Mutex<Duration>,
    sessions: Mutex<Vec<Arc<MemorySession>>>,
}

impl Server {
    fn take_fault(&self, fault: Fault) -> bool {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        match faults.iter().position(|f| *f == fault) {
            Some(index) => {
                faults.remove(index);
                true
            }
            None => false,
        }
    }

    fn answer_delay(&self) -> Duration {
        *self.answer_delay.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_sessions(&self) -> Vec<Arc<MemorySession>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.retain(|s| s.open.load(Ordering::SeqCst));
        sessions.clone()
    }

    fn database(&self, name: &str) -> Option<Database> {
        self.databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

/// Driver backed by an in-process server.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    server: Arc<Server>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(self, name: &str) -> Self {
        self.server
            .databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_default();
        self
    }

    /// Delay before each streamed answer, used to keep queries in flight
    pub fn with_answer_delay(self, delay: Duration) -> Self {
        *self
            .server
            .answer_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
        self
    }

    pub fn inject(&self, fault: Fault) {
        self.server
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fault);
    }

    pub fn stats(&self) -> DriverStats {
        let counters = &self.server.counters;
        let sessions_opened = counters.sessions_opened.load(Ordering::SeqCst);
        let sessions_closed = counters.sessions_closed.load(Ordering::SeqCst);
        let transactions_opened = counters.transactions_opened.load(Ordering::SeqCst);
        let transactions_closed = counters.transactions_closed.load(Ordering::SeqCst);
        DriverStats {
            sessions_opened,
            sessions_closed,
            live_sessions: sessions_opened - sessions_closed,
            transactions_opened,
            transactions_closed,
            live_transactions: transactions_opened - transactions_closed,
            commits: counters.commits.load(Ordering::SeqCst),
            rollbacks: counters.rollbacks.load(Ordering::SeqCst),
        }
    }

    /// Committed data statements of a database
    pub fn data(&self, database: &str) -> Vec<String> {
        self.server
            .database(database)
            .map(|db| db.data)
            .unwrap_or_default()
    }

    /// Committed schema statements of a database
    pub fn schema(&self, database: &str) -> Vec<String> {
        self.server
            .database(database)
            .map(|db| db.schema)
            .unwrap_or_default()
    }

    /// Close every live session on `database` as if the server dropped it.
    pub async fn close_sessions_on_server(&self, database: &str) {
        let sessions: Vec<_> = self
            .server
            .live_sessions()
            .into_iter()
            .filter(|s| s.database == database)
            .collect();
        for session in sessions {
            session.close_on_server().await;
        }
    }

    /// Close every live transaction without firing its close hooks, as a
    /// dropped connection would.
    pub fn lose_transactions(&self) {
        for session in self.server.live_sessions() {
            for transaction in session.live_transactions() {
                transaction.shutdown();
            }
        }
    }

    /// Close every live transaction as if the server timed it out.
    pub async fn close_transactions_on_server(&self, reason: &str) {
        let transactions: Vec<_> = self
            .server
            .live_sessions()
            .iter()
            .flat_map(|s| s.live_transactions())
            .collect();
        for transaction in transactions {
            transaction.close_on_server(reason).await;
        }
    }
}

#[async_trait]
impl DatabaseDriver for MemoryDriver {
    async fn connect(&self, config: &ConnectionConfig) -> DriverResult<Arc<dyn DatabaseClient>> {
        if self.server.take_fault(Fault::Connect) {
            return Err(DriverError::Connection(format!(
                "connection to {} refused",
                config.address()
            )));
        }
        tracing::debug!(address = %config.address(), username = %config.username, "in-memory connect");
        Ok(Arc::new(MemoryClient {
            server: Arc::clone(&self.server),
            open: AtomicBool::new(true),
            sessions: Mutex::new(Vec::new()),
        }))
    }
}

struct MemoryClient {
    server: Arc<Server>,
    open: AtomicBool,
    sessions: Mutex<Vec<Weak<MemorySession>>>,
}

impl MemoryClient {
    fn ensure_open(&self) -> DriverResult<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DriverError::Connection("client is closed".into()))
        }
    }
}

#[async_trait]
impl DatabaseClient for MemoryClient {
    async fn databases(&self) -> DriverResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self
            .server
            .databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }

    async fn create_database(&self, name: &str) -> DriverResult<()> {
        self.ensure_open()?;
        let mut databases = self
            .server
            .databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if databases.contains_key(name) {
            return Err(DriverError::Rejected(format!(
                "Database '{}' already exists",
                name
            )));
        }
        databases.insert(name.to_string(), Database::default());
        Ok(())
    }

    async fn session(
        &self,
        database: &str,
        session_type: SessionType,
    ) -> DriverResult<Arc<dyn SessionHandle>> {
        self.ensure_open()?;
        if self.server.take_fault(Fault::OpenSession) {
            return Err(DriverError::Unavailable("session could not be opened".into()));
        }
        if self.server.database(database).is_none() {
            return Err(DriverError::DatabaseNotFound(database.to_string()));
        }

        let session = Arc::new(MemorySession {
            database: database.to_string(),
            session_type,
            open: AtomicBool::new(true),
            lost: self.server.take_fault(Fault::LostSession),
            hooks: Mutex::new(Vec::new()),
            transactions: Mutex::new(Vec::new()),
            server: Arc::clone(&self.server),
        });
        self.server
            .counters
            .sessions_opened
            .fetch_add(1, Ordering::SeqCst);
        {
            let mut live = self.server.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            live.retain(|s| s.open.load(Ordering::SeqCst));
            live.push(Arc::clone(&session));
        }
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.retain(|s| s.strong_count() > 0);
        sessions.push(Arc::downgrade(&session));
        Ok(session)
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let sessions: Vec<_> = self
                .sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain(..)
                .filter_map(|s| s.upgrade())
                .collect();
            for session in sessions {
                session.shutdown();
            }
        }
    }
}

struct MemorySession {
    database: String,
    session_type: SessionType,
    open: AtomicBool,
    /// Still held by the server, but the client sees it closed
    lost: bool,
    hooks: Mutex<Vec<CloseHook>>,
    transactions: Mutex<Vec<Arc<MemoryTransaction>>>,
    server: Arc<Server>,
}

impl MemorySession {
    fn mark_closed(&self) -> bool {
        if self.open.swap(false, Ordering::SeqCst) {
            self.server
                .counters
                .sessions_closed
                .fetch_add(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn live_transactions(&self) -> Vec<Arc<MemoryTransaction>> {
        let mut transactions = self
            .transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        transactions.retain(|t| t.open.load(Ordering::SeqCst));
        transactions.clone()
    }

    fn shutdown(&self) {
        if self.mark_closed() {
            for transaction in self.live_transactions() {
                transaction.shutdown();
            }
        }
    }

    async fn close_on_server(&self) {
        if !self.mark_closed() {
            return;
        }
        let hooks: Vec<CloseHook> = self
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let error = DriverError::SessionClosed(format!(
            "session to '{}' was closed by the server",
            self.database
        ));
        for hook in hooks {
            hook(Some(error.clone())).await;
        }
        for transaction in self.live_transactions() {
            transaction.shutdown();
        }
    }
}

#[async_trait]
impl SessionHandle for MemorySession {
    fn is_open(&self) -> bool {
        !self.lost && self.open.load(Ordering::SeqCst)
    }

    fn on_close(&self, hook: CloseHook) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    async fn transaction(
        &self,
        transaction_type: TransactionType,
        options: Option<TransactionOptions>,
    ) -> DriverResult<Arc<dyn TransactionHandle>> {
        if !self.is_open() {
            return Err(DriverError::SessionClosed(self.database.clone()));
        }
        if self.server.take_fault(Fault::OpenTransaction) {
            return Err(DriverError::Unavailable(
                "transaction could not be opened".into(),
            ));
        }

        let transaction = Arc::new(MemoryTransaction {
            database: self.database.clone(),
            session_type: self.session_type,
            transaction_type,
            options: options.unwrap_or_default(),
            open: Arc::new(AtomicBool::new(true)),
            lost: self.server.take_fault(Fault::LostTransaction),
            hooks: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            server: Arc::clone(&self.server),
        });
        self.server
            .counters
            .transactions_opened
            .fetch_add(1, Ordering::SeqCst);
        let mut transactions = self
            .transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        transactions.retain(|t| t.open.load(Ordering::SeqCst));
        transactions.push(Arc::clone(&transaction));
        Ok(transaction)
    }

    async fn type_schema(&self) -> DriverResult<String> {
        if !self.is_open() {
            return Err(DriverError::SessionClosed(self.database.clone()));
        }
        self.server
            .database(&self.database)
            .map(|db| db.schema.join("\n"))
            .ok_or_else(|| DriverError::DatabaseNotFound(self.database.clone()))
    }

    async fn close(&self) {
        self.shutdown();
    }
}

struct MemoryTransaction {
    database: String,
    session_type: SessionType,
    transaction_type: TransactionType,
    options: TransactionOptions,
    open: Arc<AtomicBool>,
    lost: bool,
    hooks: Mutex<Vec<CloseHook>>,
    pending: Mutex<Vec<Write>>,
    server: Arc<Server>,
}

impl MemoryTransaction {
    fn shutdown(&self) -> bool {
        if self.open.swap(false, Ordering::SeqCst) {
            self.server
                .counters
                .transactions_closed
                .fetch_add(1, Ordering::SeqCst);
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            true
        } else {
            false
        }
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DriverError::TransactionClosed(format!(
                "transaction on '{}' is no longer open",
                self.database
            )))
        }
    }

    async fn close_on_server(&self, reason: &str) {
        if !self.shutdown() {
            return;
        }
        let hooks: Vec<CloseHook> = self
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let error = DriverError::TransactionClosed(reason.to_string());
        for hook in hooks {
            hook(Some(error.clone())).await;
        }
    }

    fn write(&self, write: Write) -> DriverResult<String> {
        if self.transaction_type.is_read() {
            return Err(DriverError::Rejected(
                "writes are not allowed in a read transaction".into(),
            ));
        }
        let answer = match &write {
            Write::Data(text) if self.session_type.is_data() => format!("inserted: {}", text),
            Write::Schema(text) if self.session_type.is_schema() => format!("defined: {}", text),
            Write::Data(_) => {
                return Err(DriverError::Rejected(
                    "data writes require a data session".into(),
                ));
            }
            Write::Schema(_) => {
                return Err(DriverError::Rejected(
                    "schema writes require a schema session".into(),
                ));
            }
        };
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(write);
        Ok(answer)
    }

    fn read(&self, filter: &str) -> Vec<String> {
        let committed = self.server.database(&self.database).unwrap_or_default();
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut lines = match self.session_type {
            SessionType::Schema => committed.schema,
            SessionType::Data => committed.data,
        };
        lines.extend(pending.into_iter().filter_map(|w| match (w, self.session_type) {
            (Write::Schema(text), SessionType::Schema) => Some(text),
            (Write::Data(text), SessionType::Data) => Some(text),
            _ => None,
        }));
        lines.retain(|line| filter.is_empty() || line.contains(filter));
        if self.options.explain {
            lines
                .into_iter()
                .map(|line| format!("{} [explainable]", line))
                .collect()
        } else {
            lines
        }
    }
}

#[async_trait]
impl TransactionHandle for MemoryTransaction {
    fn is_open(&self) -> bool {
        !self.lost && self.open.load(Ordering::SeqCst)
    }

    fn on_close(&self, hook: CloseHook) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    async fn query(&self, query: &str) -> DriverResult<AnswerStream> {
        self.ensure_open()?;
        if self.server.take_fault(Fault::Query) {
            return Err(DriverError::Rejected("query failed on the server".into()));
        }

        let statement = query.trim().trim_end_matches(';').trim();
        let (keyword, rest) = statement
            .split_once(char::is_whitespace)
            .map(|(k, r)| (k, r.trim()))
            .unwrap_or((statement, ""));

        let answers = match keyword.to_ascii_lowercase().as_str() {
            "match" => self.read(rest),
            "insert" if !rest.is_empty() => vec![self.write(Write::Data(rest.to_string()))?],
            "define" if !rest.is_empty() => vec![self.write(Write::Schema(rest.to_string()))?],
            "" => return Err(DriverError::Rejected("empty query".into())),
            other => {
                return Err(DriverError::Rejected(format!(
                    "unrecognised query '{}'",
                    other
                )));
            }
        };

        let open = Arc::clone(&self.open);
        let delay = self.server.answer_delay();
        let stream = futures::stream::unfold(
            (answers.into_iter(), open, false),
            move |(mut answers, open, done)| async move {
                if done {
                    return None;
                }
                let answer = answers.next()?;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if open.load(Ordering::SeqCst) {
                    Some((Ok(Answer::new(answer)), (answers, open, false)))
                } else {
                    let error = DriverError::TransactionClosed(
                        "transaction closed while answers were being read".into(),
                    );
                    Some((Err(error), (answers, open, true)))
                }
            },
        );
        Ok(stream.boxed())
    }

    async fn commit(&self) -> DriverResult<()> {
        self.ensure_open()?;
        if self.server.take_fault(Fault::Commit) {
            self.shutdown();
            return Err(DriverError::Rejected("commit rejected by the server".into()));
        }
        if self.transaction_type.is_read() {
            self.shutdown();
            return Err(DriverError::Rejected(
                "read transactions cannot be committed".into(),
            ));
        }

        let writes: Vec<Write> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        {
            let mut databases = self
                .server
                .databases
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let database = databases
                .get_mut(&self.database)
                .ok_or_else(|| DriverError::DatabaseNotFound(self.database.clone()))?;
            for write in writes {
                match write {
                    Write::Schema(text) => database.schema.push(text),
                    Write::Data(text) => database.data.push(text),
                }
            }
        }
        self.server.counters.commits.fetch_add(1, Ordering::SeqCst);
        self.shutdown();
        Ok(())
    }

    async fn rollback(&self) -> DriverResult<()> {
        self.ensure_open()?;
        if self.server.take_fault(Fault::Rollback) {
            return Err(DriverError::Rejected("rollback rejected by the server".into()));
        }
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.server.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.shutdown();
    }
}
