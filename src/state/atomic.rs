use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Boolean flag with atomic read-modify-write and an observable mirror.
///
/// The atomic value is what concurrent callers race on; the mirror is what
/// the UI watches. Every write runs inside the mirror's send lock, so a
/// reader of the mirror never sees a value other than the last successful
/// atomic write.
#[derive(Debug)]
pub struct AtomicBooleanState {
    atomic: Arc<AtomicBool>,
    state: watch::Sender<bool>,
}

impl AtomicBooleanState {
    pub fn new(init: bool) -> Self {
        let (state, _) = watch::channel(init);
        Self {
            atomic: Arc::new(AtomicBool::new(init)),
            state,
        }
    }

    /// Current atomic value
    pub fn get(&self) -> bool {
        self.atomic.load(Ordering::SeqCst)
    }

    /// Current value of the observable mirror
    pub fn state(&self) -> bool {
        *self.state.borrow()
    }

    pub fn set(&self, value: bool) {
        self.state.send_if_modified(|state| {
            self.atomic.store(value, Ordering::SeqCst);
            let changed = *state != value;
            *state = value;
            changed
        });
    }

    /// Store `new` only if the current value equals `expected`.
    ///
    /// Returns whether the swap happened.
    pub fn compare_and_set(&self, expected: bool, new: bool) -> bool {
        let mut swapped = false;
        self.state.send_if_modified(|state| {
            swapped = self
                .atomic
                .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
            if swapped && *state != new {
                *state = new;
                true
            } else {
                false
            }
        });
        swapped
    }

    /// Flip the value and return the new one.
    pub fn toggle(&self) -> bool {
        loop {
            let current = self.get();
            if self.compare_and_set(current, !current) {
                return !current;
            }
        }
    }

    /// Receiver notified whenever the mirror changes
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Read-only view of the atomic value, shared with query runners.
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            flag: Arc::clone(&self.atomic),
        }
    }
}

impl Default for AtomicBooleanState {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Cooperative cancellation flag observed by a running query.
#[derive(Debug, Clone)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
