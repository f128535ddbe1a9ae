use super::transaction::TransactionState;
use crate::core::{SessionType, TransactionType};
use crate::driver::{
    DatabaseClient, DriverError, DriverResult, SessionHandle, TransactionHandle,
    TransactionOptions,
};
use crate::state::{AtomicBooleanState, Listeners, Message, NotificationManager};
use futures::FutureExt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tokio::sync::watch;

/// The one session a client holds against a database.
///
/// Reopening against a different database or session type closes the
/// current session first. The child [`TransactionState`] lives as long as
/// this object and survives session switches.
pub struct SessionState {
    me: Weak<SessionState>,
    client: Arc<dyn DatabaseClient>,
    notifier: NotificationManager,
    session_type: RwLock<SessionType>,
    database: RwLock<Option<String>>,
    handle: Mutex<Option<Arc<dyn SessionHandle>>>,
    is_open: AtomicBooleanState,
    transaction: Arc<TransactionState>,
    on_open: Listeners<bool>,
    on_close: Listeners<bool>,
    /// Serializes `try_open` so two switches cannot interleave
    open_lock: tokio::sync::Mutex<()>,
}

impl SessionState {
    pub fn new(client: Arc<dyn DatabaseClient>, notifier: NotificationManager) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<SessionState>| Self {
            me: me.clone(),
            client,
            transaction: TransactionState::new(me.clone(), notifier.clone()),
            notifier,
            session_type: RwLock::new(SessionType::Data),
            database: RwLock::new(None),
            handle: Mutex::new(None),
            is_open: AtomicBooleanState::new(false),
            on_open: Listeners::new(),
            on_close: Listeners::new(),
            open_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn session_type(&self) -> SessionType {
        *self
            .session_type
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_schema(&self) -> bool {
        self.session_type().is_schema()
    }

    pub fn is_data(&self) -> bool {
        self.session_type().is_data()
    }

    /// Database of the open session, `None` once closed
    pub fn database(&self) -> Option<String> {
        self.database
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_open(&self) -> bool {
        self.is_open.get()
    }

    pub fn open_state(&self) -> watch::Receiver<bool> {
        self.is_open.subscribe()
    }

    pub fn transaction(&self) -> &Arc<TransactionState> {
        &self.transaction
    }

    /// Called with `is_new_db` after every successful open.
    pub fn on_open(&self, listener: impl Fn(bool) + Send + Sync + 'static) {
        self.on_open.register(listener);
    }

    /// Called with `will_reopen_same_db` at the start of every close.
    pub fn on_close(&self, listener: impl Fn(bool) + Send + Sync + 'static) {
        self.on_close.register(listener);
    }

    fn handle(&self) -> Option<Arc<dyn SessionHandle>> {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Open a session on `database`, replacing the current one.
    ///
    /// No-op when a session with the same database and type is already open.
    /// Failures are reported through the notifier and leave the session closed.
    pub async fn try_open(&self, database: &str, session_type: SessionType) {
        let _guard = self.open_lock.lock().await;

        let current = self.database();
        if self.is_open()
            && current.as_deref() == Some(database)
            && self.session_type() == session_type
        {
            return;
        }

        let is_new_db = current.as_deref() != Some(database);
        self.close_with(None, !is_new_db).await;

        let handle = match self.client.session(database, session_type).await {
            Ok(handle) => handle,
            Err(err) => {
                tracing::error!(database, %session_type, error = %err, "failed to open session");
                self.notifier.user_error(Message::FailedToOpenSession {
                    session_type,
                    database: database.to_string(),
                });
                self.is_open.set(false);
                return;
            }
        };

        let me = self.me.clone();
        let closed_database = database.to_string();
        handle.on_close(Box::new(move |_error: Option<DriverError>| {
            async move {
                if let Some(session) = me.upgrade() {
                    session
                        .close_with(
                            Some(Message::SessionClosedOnServer {
                                database: closed_database,
                            }),
                            false,
                        )
                        .await;
                }
            }
            .boxed()
        }));

        if !handle.is_open() {
            handle.close().await;
            self.notifier.user_error(Message::FailedToOpenSession {
                session_type,
                database: database.to_string(),
            });
            self.is_open.set(false);
            return;
        }

        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        *self
            .database
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(database.to_string());
        *self
            .session_type
            .write()
            .unwrap_or_else(PoisonError::into_inner) = session_type;
        self.is_open.set(true);
        tracing::info!(database, %session_type, is_new_db, "session opened");
        self.on_open.fire(is_new_db);
    }

    /// Open a remote transaction on the current session.
    ///
    /// Returns `Ok(None)` when no session is open.
    pub async fn open_transaction(
        &self,
        transaction_type: TransactionType,
        options: Option<TransactionOptions>,
    ) -> DriverResult<Option<Arc<dyn TransactionHandle>>> {
        match self.handle() {
            Some(handle) => handle
                .transaction(transaction_type, options)
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    /// Schema text of the current database, if a session is open.
    pub async fn type_schema(&self) -> Option<String> {
        let handle = self.handle()?;
        match handle.type_schema().await {
            Ok(schema) => Some(schema),
            Err(err) => {
                tracing::warn!(error = %err, "failed to read type schema");
                None
            }
        }
    }

    pub async fn close(&self) {
        self.close_with(None, false).await;
    }

    /// Close the session, its transaction and the remote handle.
    ///
    /// Only the caller that flips the open flag does the teardown, so
    /// concurrent closes report `message` at most once.
    pub async fn close_with(&self, message: Option<Message>, will_reopen_same_db: bool) {
        if !self.is_open.compare_and_set(true, false) {
            return;
        }

        self.on_close.fire(will_reopen_same_db);
        self.transaction.close(None).await;

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.close().await;
        }

        let database = self
            .database
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::info!(database = ?database, will_reopen_same_db, "session closed");

        if let Some(message) = message {
            self.notifier.user_error(message);
        }
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("database", &self.database())
            .field("session_type", &self.session_type())
            .field("is_open", &self.is_open())
            .field("transaction", &self.transaction)
            .finish()
    }
}
