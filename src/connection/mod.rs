pub mod config;
pub mod runner;
pub mod session;
pub mod transaction;

use crate::core::{Result, StudioError};
use crate::driver::{DatabaseClient, DatabaseDriver, DriverError};
use crate::state::{AtomicBooleanState, Message, NotificationManager};
use config::ConnectionConfig;
use session::SessionState;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;

pub use runner::{QueryOutcome, QueryRunner, Response};
pub use transaction::{ConfigState, TransactionState};

/// Connection to one server and the session opened through it.
///
/// Similar to a database client: connect once, then drive the single
/// [`SessionState`] it hands out.
///
/// # Examples
///
/// ```
/// use graph_studio::{ClientState, ConnectionConfig, MemoryDriver, NotificationManager};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> graph_studio::Result<()> {
/// let driver = MemoryDriver::new().with_database("social");
/// let client = ClientState::new(Arc::new(driver), NotificationManager::new());
///
/// let session = client
///     .connect(ConnectionConfig::new("admin").database("social"))
///     .await?;
/// assert!(session.is_open());
/// assert_eq!(client.databases(), vec!["social".to_string()]);
///
/// client.disconnect().await;
/// assert!(!session.is_open());
/// # Ok(())
/// # }
/// ```
pub struct ClientState {
    driver: Arc<dyn DatabaseDriver>,
    notifier: NotificationManager,
    config: RwLock<Option<ConnectionConfig>>,
    client: RwLock<Option<Arc<dyn DatabaseClient>>>,
    session: RwLock<Option<Arc<SessionState>>>,
    databases: RwLock<Vec<String>>,
    is_connected: AtomicBooleanState,
}

impl ClientState {
    pub fn new(driver: Arc<dyn DatabaseDriver>, notifier: NotificationManager) -> Self {
        Self {
            driver,
            notifier,
            config: RwLock::new(None),
            client: RwLock::new(None),
            session: RwLock::new(None),
            databases: RwLock::new(Vec::new()),
            is_connected: AtomicBooleanState::new(false),
        }
    }

    pub fn notifier(&self) -> &NotificationManager {
        &self.notifier
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.get()
    }

    pub fn connection_state(&self) -> watch::Receiver<bool> {
        self.is_connected.subscribe()
    }

    pub fn config(&self) -> Option<ConnectionConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn session(&self) -> Option<Arc<SessionState>> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Database names from the last successful refresh
    pub fn databases(&self) -> Vec<String> {
        self.databases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Connect with `config`, replacing any existing connection.
    ///
    /// When the config names a database, a session of the configured type is
    /// opened against it before returning.
    pub async fn connect(&self, config: ConnectionConfig) -> Result<Arc<SessionState>> {
        config.validate()?;
        self.disconnect().await;

        let address = config.address();
        let connected = tokio::time::timeout(config.connect_timeout, self.driver.connect(&config))
            .await
            .unwrap_or_else(|_| {
                Err(DriverError::Connection(format!(
                    "timed out after {:?}",
                    config.connect_timeout
                )))
            });
        let client = match connected {
            Ok(client) => client,
            Err(err) => {
                self.notifier.user_error(Message::FailedToConnect {
                    address: address.clone(),
                    reason: err.to_string(),
                });
                return Err(StudioError::Connection(err.to_string()));
            }
        };

        let session = SessionState::new(Arc::clone(&client), self.notifier.clone());
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = Some(client);
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&session));
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Some(config.clone());
        self.is_connected.set(true);
        tracing::info!(address = %address, username = %config.username, "connected");

        self.refresh_databases().await;
        if let Some(database) = &config.database {
            session.try_open(database, config.session_type).await;
        }
        Ok(session)
    }

    /// Reload the database list from the server.
    pub async fn refresh_databases(&self) -> Vec<String> {
        let client = self
            .client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(client) = client else {
            return Vec::new();
        };

        match client.databases().await {
            Ok(mut databases) => {
                databases.sort();
                *self.databases.write().unwrap_or_else(PoisonError::into_inner) = databases.clone();
                databases
            }
            Err(err) => {
                self.notifier.user_error(Message::FailedToLoadDatabases {
                    reason: err.to_string(),
                });
                Vec::new()
            }
        }
    }

    pub async fn disconnect(&self) {
        if !self.is_connected.compare_and_set(true, false) {
            return;
        }

        let session = self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            session.close().await;
        }

        let client = self
            .client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(client) = client {
            client.close().await;
        }

        self.databases
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        let address = self
            .config()
            .map(|c| c.address())
            .unwrap_or_default();
        self.notifier.info(Message::Disconnected { address });
    }
}
