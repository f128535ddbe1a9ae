use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Server-side timeout attached to every transaction the client opens.
pub const TRANSACTION_TIMEOUT: Duration = Duration::from_millis(60 * 60 * 1_000);

/// Kind of session bound to a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    #[default]
    Data,
    Schema,
}

impl SessionType {
    pub fn is_data(&self) -> bool {
        matches!(self, SessionType::Data)
    }

    pub fn is_schema(&self) -> bool {
        matches!(self, SessionType::Schema)
    }

    /// The other session type, used by the UI toggle
    pub fn flipped(&self) -> Self {
        match self {
            SessionType::Data => SessionType::Schema,
            SessionType::Schema => SessionType::Data,
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionType::Data => write!(f, "data"),
            SessionType::Schema => write!(f, "schema"),
        }
    }
}

impl FromStr for SessionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "data" => Ok(SessionType::Data),
            "schema" => Ok(SessionType::Schema),
            other => Err(format!("Unknown session type '{}'", other)),
        }
    }
}

/// Kind of transaction opened within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    #[default]
    Read,
    Write,
}

impl TransactionType {
    pub fn is_read(&self) -> bool {
        matches!(self, TransactionType::Read)
    }

    pub fn is_write(&self) -> bool {
        matches!(self, TransactionType::Write)
    }

    pub fn flipped(&self) -> Self {
        match self {
            TransactionType::Read => TransactionType::Write,
            TransactionType::Write => TransactionType::Read,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Read => write!(f, "read"),
            TransactionType::Write => write!(f, "write"),
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(TransactionType::Read),
            "write" => Ok(TransactionType::Write),
            other => Err(format!("Unknown transaction type '{}'", other)),
        }
    }
}

/// The three per-transaction toggles exposed to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionConfig {
    Snapshot,
    Infer,
    Explain,
}

impl fmt::Display for TransactionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionConfig::Snapshot => write!(f, "snapshot"),
            TransactionConfig::Infer => write!(f, "infer"),
            TransactionConfig::Explain => write!(f, "explain"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_timeout_is_one_hour() {
        assert_eq!(TRANSACTION_TIMEOUT.as_millis(), 3_600_000);
    }

    #[test]
    fn test_parse_types_case_insensitive() {
        assert_eq!("SCHEMA".parse::<SessionType>().unwrap(), SessionType::Schema);
        assert_eq!("Write".parse::<TransactionType>().unwrap(), TransactionType::Write);
        assert!("graph".parse::<SessionType>().is_err());
    }

    #[test]
    fn test_flipped() {
        assert_eq!(SessionType::Data.flipped(), SessionType::Schema);
        assert_eq!(TransactionType::Write.flipped(), TransactionType::Read);
    }
}
