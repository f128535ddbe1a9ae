pub mod memory;

use crate::connection::config::ConnectionConfig;
use crate::core::{SessionType, TRANSACTION_TIMEOUT, TransactionType};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use memory::{DriverStats, Fault, MemoryDriver};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Session is closed: {0}")]
    SessionClosed(String),

    #[error("Transaction is closed: {0}")]
    TransactionClosed(String),

    #[error("Database '{0}' does not exist")]
    DatabaseNotFound(String),

    #[error("{0}")]
    Rejected(String),

    #[error("Connection failure: {0}")]
    Connection(String),

    #[error("Server unavailable: {0}")]
    Unavailable(String),
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Invoked by the driver when the server closes a handle out of band.
///
/// The driver awaits the returned future, so whatever local teardown the
/// hook performs has finished once the driver moves on.
pub type CloseHook = Box<dyn FnOnce(Option<DriverError>) -> BoxFuture<'static, ()> + Send>;

/// Stream of answers produced by one query.
pub type AnswerStream = BoxStream<'static, DriverResult<Answer>>;

/// Options passed to the server when a transaction opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    pub infer: bool,
    pub explain: bool,
    pub transaction_timeout: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            infer: false,
            explain: false,
            transaction_timeout: TRANSACTION_TIMEOUT,
        }
    }
}

/// One answer printed by the query output pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
}

impl Answer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Entry point of a database driver.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> DriverResult<Arc<dyn DatabaseClient>>;
}

/// An authenticated connection to a server.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    async fn databases(&self) -> DriverResult<Vec<String>>;

    async fn create_database(&self, name: &str) -> DriverResult<()>;

    async fn session(
        &self,
        database: &str,
        session_type: SessionType,
    ) -> DriverResult<Arc<dyn SessionHandle>>;

    async fn close(&self);
}

/// A remote session bound to one database.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    fn is_open(&self) -> bool;

    fn on_close(&self, hook: CloseHook);

    async fn transaction(
        &self,
        transaction_type: TransactionType,
        options: Option<TransactionOptions>,
    ) -> DriverResult<Arc<dyn TransactionHandle>>;

    async fn type_schema(&self) -> DriverResult<String>;

    async fn close(&self);
}

/// A remote transaction within a session.
#[async_trait]
pub trait TransactionHandle: Send + Sync {
    fn is_open(&self) -> bool;

    fn on_close(&self, hook: CloseHook);

    async fn query(&self, query: &str) -> DriverResult<AnswerStream>;

    async fn commit(&self) -> DriverResult<()>;

    async fn rollback(&self) -> DriverResult<()>;

    async fn close(&self);
}
