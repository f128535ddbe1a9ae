pub mod error;
pub mod types;

pub use error::{Result, StudioError};
pub use types::{SessionType, TRANSACTION_TIMEOUT, TransactionConfig, TransactionType};
