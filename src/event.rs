//! Listener registry
//!
//! Every observable edge in the crate (bytes leaving the line discipline,
//! readiness changes on the slave, output chunks on the master) is an
//! `EventEmitter`. Listeners are plain `Fn` closures; state they need to
//! mutate lives behind their own `Cell`/`RefCell`.
//!
//! Dispatch works on a snapshot of the listener list, so a listener may
//! subscribe, dispose, or fire the same emitter again without deadlocking.
//! A listener that panics is reported through `tracing` and the remaining
//! listeners still run.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

type Listener<T> = Rc<dyn Fn(&T)>;
type Listeners<T> = RefCell<Vec<(u64, Listener<T>)>>;

/// A single-threaded event source
pub struct EventEmitter<T: ?Sized> {
    listeners: Rc<Listeners<T>>,
    next_id: Cell<u64>,
}

impl<T: ?Sized + 'static> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + 'static> EventEmitter<T> {
    /// Create an emitter with no listeners
    pub fn new() -> Self {
        Self {
            listeners: Rc::new(RefCell::new(Vec::new())),
            next_id: Cell::new(0),
        }
    }

    /// Register a listener; it stays registered until the returned
    /// subscription is disposed.
    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.listeners.borrow_mut().push((id, Rc::new(listener)));

        let listeners: Weak<Listeners<T>> = Rc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.borrow_mut().retain(|(other, _)| *other != id);
            }
        })
    }

    /// Invoke every listener with `arg`
    pub fn fire(&self, arg: &T) {
        let snapshot: Vec<Listener<T>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();

        for listener in snapshot {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(arg))) {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                tracing::error!("event listener panicked: {}", message);
            }
        }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }
}

/// Handle returned by [`EventEmitter::subscribe`]
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    fn new(dispose: impl FnOnce() + 'static) -> Self {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    /// Remove the listener from its emitter
    pub fn dispose(mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.dispose.is_some())
            .finish()
    }
}
