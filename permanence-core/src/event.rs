//! Typed publish/subscribe used everywhere the engine "fires an event".
//!
//! Replaces the string-keyed listener tables of a dynamic-language
//! implementation with one listener list per concrete payload type. Firing
//! holds the lock only long enough to clone the listener list so a listener
//! is free to take its time without blocking the next `fire`.

use std::sync::Mutex;

type Listener<E> = Box<dyn Fn(&E) + Send + Sync>;

pub struct EventSource<E> {
    listeners: Mutex<Vec<Listener<E>>>,
}

impl<E> EventSource<E> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener. Listeners accumulate for the life of the source;
    /// there is no `unobserve` because nothing in this engine ever needs one.
    pub fn observe<F>(&self, listener: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.listeners.lock().unwrap().push(Box::new(listener));
    }

    /// Invoke every listener with a reference to `event`, in registration order.
    pub fn fire(&self, event: E) {
        let listeners = self.listeners.lock().unwrap();
        for listener in listeners.iter() {
            listener(&event);
        }
    }
}

impl<E> Default for EventSource<E> {
    fn default() -> Self {
        Self::new()
    }
}
