use std::sync::{Arc, Mutex, PoisonError};

type Listener<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Ordered registry of callbacks.
///
/// Firing is synchronous and in registration order. The list is copied out
/// before the callbacks run, so a listener may register further listeners or
/// call back into the owning state without deadlocking.
pub struct Listeners<T> {
    inner: Mutex<Vec<Listener<T>>>,
}

impl<T: Clone> Listeners<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, listener: impl Fn(T) + Send + Sync + 'static) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    pub fn fire(&self, value: T) {
        let listeners = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.inner.lock().map(|l| l.len()).unwrap_or(0);
        f.debug_struct("Listeners").field("count", &count).finish()
    }
}
