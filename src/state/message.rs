use crate::core::SessionType;
use std::fmt;

/// User-facing notification messages raised by the connection layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    FailedToConnect { address: String, reason: String },
    Disconnected { address: String },
    FailedToLoadDatabases { reason: String },
    FailedToOpenSession { session_type: SessionType, database: String },
    SessionClosedOnServer { database: String },
    FailedToOpenTransaction { reason: String },
    TransactionClosedOnServer { reason: String },
    FailedToRunQuery { reason: String },
    TransactionClosedInQuery,
    TransactionCommitSucceeded,
    TransactionCommitFailed { reason: String },
    TransactionRollback,
    TransactionRollbackFailed { reason: String },
}

impl Message {
    /// Stable code, written to the log next to the text
    pub fn code(&self) -> &'static str {
        match self {
            Message::FailedToConnect { .. } => "CNX01",
            Message::Disconnected { .. } => "CNX02",
            Message::FailedToLoadDatabases { .. } => "CNX03",
            Message::FailedToOpenSession { .. } => "CNX04",
            Message::SessionClosedOnServer { .. } => "CNX05",
            Message::FailedToOpenTransaction { .. } => "CNX06",
            Message::TransactionClosedOnServer { .. } => "CNX07",
            Message::FailedToRunQuery { .. } => "CNX08",
            Message::TransactionClosedInQuery => "CNX09",
            Message::TransactionCommitSucceeded => "CNX10",
            Message::TransactionCommitFailed { .. } => "CNX11",
            Message::TransactionRollback => "CNX12",
            Message::TransactionRollbackFailed { .. } => "CNX13",
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::FailedToConnect { address, reason } => {
                write!(f, "Failed to connect to {}: {}", address, reason)
            }
            Message::Disconnected { address } => write!(f, "Disconnected from {}", address),
            Message::FailedToLoadDatabases { reason } => {
                write!(f, "Failed to load the list of databases: {}", reason)
            }
            Message::FailedToOpenSession {
                session_type,
                database,
            } => write!(
                f,
                "Failed to open {} session to database '{}'",
                session_type, database
            ),
            Message::SessionClosedOnServer { database } => write!(
                f,
                "Session to database '{}' has been closed on the server",
                database
            ),
            Message::FailedToOpenTransaction { reason } => {
                write!(f, "Failed to open transaction: {}", reason)
            }
            Message::TransactionClosedOnServer { reason } => {
                write!(f, "Transaction has been closed on the server: {}", reason)
            }
            Message::FailedToRunQuery { reason } => write!(f, "Failed to run query: {}", reason),
            Message::TransactionClosedInQuery => {
                write!(f, "Transaction was closed while the query was running")
            }
            Message::TransactionCommitSucceeded => {
                write!(f, "Transaction has been committed successfully")
            }
            Message::TransactionCommitFailed { reason } => {
                write!(f, "Transaction failed to commit: {}", reason)
            }
            Message::TransactionRollback => write!(
                f,
                "Transaction has been rolled back; uncommitted writes were discarded"
            ),
            Message::TransactionRollbackFailed { reason } => {
                write!(f, "Transaction failed to roll back: {}", reason)
            }
        }
    }
}
