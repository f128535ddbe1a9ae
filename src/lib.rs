// ============================================================================
// Graph Studio Library
// ============================================================================
//
// Connection, session and transaction lifecycle of a graph database client.
// The terminal front end in `main.rs` is one consumer; anything that can
// hold an `Arc<SessionState>` can drive the same state machine.
//
// ============================================================================

pub mod connection;
pub mod core;
pub mod driver;
pub mod state;

// Re-export main types for convenience
pub use core::{
    Result, SessionType, StudioError, TRANSACTION_TIMEOUT, TransactionConfig, TransactionType,
};

pub use state::{
    AtomicBooleanState, Listeners, Message, Notification, NotificationKind, NotificationManager,
    StopSignal,
};

pub use driver::{
    Answer, DatabaseClient, DatabaseDriver, DriverError, DriverResult, MemoryDriver,
    SessionHandle, TransactionHandle, TransactionOptions,
};

// Re-export connection API
pub use connection::{
    ClientState, ConfigState, QueryOutcome, QueryRunner, Response, TransactionState,
    config::ConnectionConfig, session::SessionState,
};
