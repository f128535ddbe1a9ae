// ============================================================================
// Transaction State
// ============================================================================
//
// Owns at most one remote transaction handle, opened lazily by the first
// query. Query execution is single-flight: `has_running_query` is the only
// admission gate, and a caller that loses the compare-and-set gets `None`.
// Each admission gets an epoch; the flag and the epoch only change together
// under the admission lock, and only the current epoch may release the flag.
//
// State transitions:
// ```text
// CLOSED ──query_runner (lazy open)──> OPEN
// OPEN ──commit / close / server close──> CLOSED
// OPEN ──query completes, snapshot off──> CLOSED
// ```
//
// ============================================================================

use super::runner::QueryRunner;
use super::session::SessionState;
use crate::core::{TRANSACTION_TIMEOUT, TransactionConfig, TransactionType};
use crate::driver::{DriverError, TransactionHandle, TransactionOptions};
use crate::state::{AtomicBooleanState, Listeners, Message, NotificationManager};
use futures::FutureExt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tokio::sync::watch;

/// Live view of one transaction toggle.
///
/// `activated` and `enabled` are recomputed on every call because they
/// depend on the other toggles, the transaction type and the session.
pub struct ConfigState<'a> {
    config: TransactionConfig,
    transaction: &'a TransactionState,
}

impl ConfigState<'_> {
    /// Raw stored value, before activation rules apply
    pub fn value(&self) -> bool {
        self.transaction.raw(self.config).get()
    }

    pub fn activated(&self) -> bool {
        self.transaction.activated(self.config)
    }

    pub fn enabled(&self) -> bool {
        self.transaction.enabled(self.config)
    }

    /// Flip the stored value and return it; no-op while disabled
    pub fn toggle(&self) -> bool {
        self.transaction.toggle(self.config)
    }
}

pub struct TransactionState {
    me: Weak<TransactionState>,
    session: Weak<SessionState>,
    notifier: NotificationManager,
    transaction_type: RwLock<TransactionType>,
    handle: Mutex<Option<Arc<dyn TransactionHandle>>>,
    is_open: AtomicBooleanState,
    has_stop_signal: AtomicBooleanState,
    has_running_query: AtomicBooleanState,
    /// Epoch of the latest admitted query
    admission: Mutex<u64>,
    snapshot: AtomicBooleanState,
    infer: AtomicBooleanState,
    explain: AtomicBooleanState,
    on_schema_write: Listeners<()>,
}

impl TransactionState {
    pub(crate) fn new(session: Weak<SessionState>, notifier: NotificationManager) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            session,
            notifier,
            transaction_type: RwLock::new(TransactionType::Read),
            handle: Mutex::new(None),
            is_open: AtomicBooleanState::new(false),
            has_stop_signal: AtomicBooleanState::new(false),
            has_running_query: AtomicBooleanState::new(false),
            admission: Mutex::new(0),
            snapshot: AtomicBooleanState::new(false),
            infer: AtomicBooleanState::new(false),
            explain: AtomicBooleanState::new(false),
            on_schema_write: Listeners::new(),
        })
    }

    pub fn transaction_type(&self) -> TransactionType {
        *self
            .transaction_type
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes effect the next time a remote transaction is opened.
    pub fn set_transaction_type(&self, transaction_type: TransactionType) {
        *self
            .transaction_type
            .write()
            .unwrap_or_else(PoisonError::into_inner) = transaction_type;
    }

    pub fn is_read(&self) -> bool {
        self.transaction_type().is_read()
    }

    pub fn is_write(&self) -> bool {
        self.transaction_type().is_write()
    }

    pub fn is_open(&self) -> bool {
        self.is_open.get()
    }

    pub fn has_stop_signal(&self) -> bool {
        self.has_stop_signal.get()
    }

    pub fn has_running_query(&self) -> bool {
        self.has_running_query.get()
    }

    pub fn open_state(&self) -> watch::Receiver<bool> {
        self.is_open.subscribe()
    }

    pub fn running_query_state(&self) -> watch::Receiver<bool> {
        self.has_running_query.subscribe()
    }

    pub fn stop_signal_state(&self) -> watch::Receiver<bool> {
        self.has_stop_signal.subscribe()
    }

    pub fn snapshot(&self) -> ConfigState<'_> {
        self.config(TransactionConfig::Snapshot)
    }

    pub fn infer(&self) -> ConfigState<'_> {
        self.config(TransactionConfig::Infer)
    }

    pub fn explain(&self) -> ConfigState<'_> {
        self.config(TransactionConfig::Explain)
    }

    pub fn config(&self, config: TransactionConfig) -> ConfigState<'_> {
        ConfigState {
            config,
            transaction: self,
        }
    }

    fn raw(&self, config: TransactionConfig) -> &AtomicBooleanState {
        match config {
            TransactionConfig::Snapshot => &self.snapshot,
            TransactionConfig::Infer => &self.infer,
            TransactionConfig::Explain => &self.explain,
        }
    }

    pub fn activated(&self, config: TransactionConfig) -> bool {
        let value = self.raw(config).get();
        match config {
            TransactionConfig::Snapshot => value || self.is_write(),
            TransactionConfig::Infer => value && !self.is_write(),
            TransactionConfig::Explain => {
                value
                    && self.activated(TransactionConfig::Infer)
                    && self.activated(TransactionConfig::Snapshot)
            }
        }
    }

    pub fn enabled(&self, config: TransactionConfig) -> bool {
        let session_open = self.session_is_open();
        match config {
            TransactionConfig::Snapshot | TransactionConfig::Infer => {
                session_open && !self.is_write()
            }
            TransactionConfig::Explain => {
                session_open
                    && self.activated(TransactionConfig::Infer)
                    && self.activated(TransactionConfig::Snapshot)
            }
        }
    }

    /// Flip the stored value of `config` and return it.
    ///
    /// A toggle that is not enabled keeps its value.
    pub fn toggle(&self, config: TransactionConfig) -> bool {
        if self.enabled(config) {
            self.raw(config).toggle()
        } else {
            self.raw(config).get()
        }
    }

    /// Options sent to the server when the transaction opens
    pub fn options(&self) -> TransactionOptions {
        TransactionOptions {
            infer: self.activated(TransactionConfig::Infer),
            explain: self.activated(TransactionConfig::Explain),
            transaction_timeout: TRANSACTION_TIMEOUT,
        }
    }

    pub fn on_schema_write(&self, listener: impl Fn(()) + Send + Sync + 'static) {
        self.on_schema_write.register(listener);
    }

    fn session_is_open(&self) -> bool {
        self.session.upgrade().is_some_and(|s| s.is_open())
    }

    fn handle(&self) -> Option<Arc<dyn TransactionHandle>> {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_handle(&self) -> Option<Arc<dyn TransactionHandle>> {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Ask a running query to stop at its next checkpoint.
    pub fn send_stop_signal(&self) {
        self.has_stop_signal.set(true);
    }

    /// Returns whether the transaction is open afterwards.
    async fn try_open(&self) -> bool {
        if self.is_open() {
            return true;
        }

        let transaction_type = self.transaction_type();
        let options = self.options();
        let opened = match self.session.upgrade() {
            Some(session) => session
                .open_transaction(transaction_type, Some(options))
                .await
                .and_then(|handle| {
                    handle.ok_or_else(|| DriverError::SessionClosed("no open session".into()))
                }),
            None => Err(DriverError::SessionClosed("no open session".into())),
        };

        let handle = match opened {
            Ok(handle) => handle,
            Err(err) => {
                self.notifier.user_error(Message::FailedToOpenTransaction {
                    reason: err.to_string(),
                });
                self.is_open.set(false);
                return false;
            }
        };

        let me = self.me.clone();
        handle.on_close(Box::new(move |error: Option<DriverError>| {
            async move {
                if let Some(transaction) = me.upgrade() {
                    let reason = error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "Unknown".to_string());
                    transaction
                        .close(Some(Message::TransactionClosedOnServer { reason }))
                        .await;
                }
            }
            .boxed()
        }));

        if !handle.is_open() {
            handle.close().await;
            self.notifier.user_error(Message::FailedToOpenTransaction {
                reason: "transaction was closed as soon as it opened".into(),
            });
            self.is_open.set(false);
            return false;
        }

        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        self.is_open.set(true);
        tracing::debug!(
            transaction_type = %transaction_type,
            infer = options.infer,
            explain = options.explain,
            "transaction opened"
        );
        true
    }

    /// Claim the query slot and return the new epoch.
    fn admit(&self) -> Option<u64> {
        let mut epoch = self.admission.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.has_running_query.compare_and_set(false, true) {
            return None;
        }
        *epoch += 1;
        self.has_stop_signal.set(false);
        Some(*epoch)
    }

    fn is_current(&self, epoch: u64) -> bool {
        *self.admission.lock().unwrap_or_else(PoisonError::into_inner) == epoch
    }

    /// Release the query slot if `epoch` still owns it.
    fn release(&self, epoch: u64) -> bool {
        let current = self.admission.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != epoch {
            return false;
        }
        self.has_stop_signal.set(false);
        self.has_running_query.compare_and_set(true, false)
    }

    /// Admit one query, opening the transaction if needed.
    ///
    /// Returns `None` while another query is running or when the transaction
    /// could not be opened. Callers must not queue or retry in a loop.
    pub async fn query_runner(&self, content: &str) -> Option<QueryRunner> {
        let Some(epoch) = self.admit() else {
            tracing::debug!("query rejected, another query is running");
            return None;
        };

        let opened = self.try_open().await;
        let handle = match self.handle().filter(|_| opened && self.is_open()) {
            Some(handle) => handle,
            None => {
                self.release(epoch);
                return None;
            }
        };

        let me = self.me.clone();
        let on_complete = Box::new(move || {
            async move {
                if let Some(transaction) = me.upgrade() {
                    transaction.complete_query(epoch).await;
                }
            }
            .boxed()
        });

        Some(QueryRunner::new(
            handle,
            content.to_string(),
            self.has_stop_signal.signal(),
            self.notifier.clone(),
            on_complete,
        ))
    }

    async fn complete_query(&self, epoch: u64) {
        if !self.is_current(epoch) {
            tracing::debug!(epoch, "ignoring completion of a superseded query");
            return;
        }

        if !self.activated(TransactionConfig::Snapshot) {
            self.close(None).await;
        } else if self.is_open() && self.handle().is_some_and(|h| !h.is_open()) {
            // Died on the server without the close hook reaching us
            self.close(Some(Message::TransactionClosedInQuery)).await;
        }

        if !self.release(epoch) {
            tracing::debug!(epoch, "query slot already released");
        }
    }

    pub async fn commit(&self) {
        self.send_stop_signal();
        if !self.is_open.compare_and_set(true, false) {
            return;
        }

        let result = match self.take_handle() {
            Some(handle) => {
                let result = handle.commit().await;
                if result.is_err() {
                    handle.close().await;
                }
                result
            }
            None => Err(DriverError::TransactionClosed("no transaction handle".into())),
        };

        match result {
            Ok(()) => {
                if self.session.upgrade().is_some_and(|s| s.is_schema()) {
                    self.on_schema_write.fire(());
                }
                self.notifier.info(Message::TransactionCommitSucceeded);
            }
            Err(err) => {
                self.notifier.user_error(Message::TransactionCommitFailed {
                    reason: err.to_string(),
                });
            }
        }
    }

    /// Discard uncommitted writes; the transaction stays open.
    pub async fn rollback(&self) {
        self.send_stop_signal();
        let handle = self.handle().filter(|_| self.is_open());
        if let Some(handle) = handle {
            if let Err(err) = handle.rollback().await {
                self.notifier.user_error(Message::TransactionRollbackFailed {
                    reason: err.to_string(),
                });
            }
        }
        self.notifier.user_warning(Message::TransactionRollback);
    }

    pub async fn close(&self, message: Option<Message>) {
        if self.is_open.compare_and_set(true, false) {
            self.send_stop_signal();
            if let Some(handle) = self.take_handle() {
                handle.close().await;
            }
            {
                let _admission = self.admission.lock().unwrap_or_else(PoisonError::into_inner);
                self.has_running_query.set(false);
            }
            if let Some(message) = message {
                self.notifier.user_error(message);
            }
        }
    }
}

impl std::fmt::Debug for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionState")
            .field("transaction_type", &self.transaction_type())
            .field("is_open", &self.is_open())
            .field("has_stop_signal", &self.has_stop_signal())
            .field("has_running_query", &self.has_running_query())
            .finish()
    }
}
