//! Typed pub/sub primitive with synchronous FIFO dispatch.
//!
//! The engine serializes all emissions on its own execution context, so no
//! re-entrancy protection is needed here; handlers run inline, in
//! subscription order.

use std::sync::Mutex;

/// Token returned by [`EventEmitter::on`]; pass it to [`EventEmitter::off`]
/// to remove the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<E> = Box<dyn Fn(&E) + Send + Sync>;

/// A typed event stream with synchronously dispatched handlers.
pub struct EventEmitter<E> {
    handlers: Mutex<Vec<(HandlerId, Handler<E>)>>,
    next_id: Mutex<u64>,
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventEmitter<E> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
        }
    }

    /// Register a handler. Handlers run in registration order.
    pub fn on<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            HandlerId(*next)
        };
        self.handlers.lock().unwrap().push((id, Box::new(handler)));
        id
    }

    /// Remove a previously registered handler. Unknown ids are ignored.
    pub fn off(&self, id: HandlerId) {
        self.handlers.lock().unwrap().retain(|(hid, _)| *hid != id);
    }

    /// Dispatch `event` to every handler, FIFO.
    pub fn emit(&self, event: &E) {
        // Snapshot is not needed: handlers must not call back into the
        // emitter they are running on, matching the cooperative model.
        let handlers = self.handlers.lock().unwrap();
        for (_, handler) in handlers.iter() {
            handler(event);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn dispatches_in_subscription_order() {
        let emitter = EventEmitter::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            emitter.on(move |v: &u32| seen.lock().unwrap().push((tag, *v)));
        }

        emitter.emit(&7);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("first", 7), ("second", 7), ("third", 7)]
        );
    }

    #[test]
    fn off_removes_only_the_given_handler() {
        let emitter = EventEmitter::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let keep = count.clone();
        emitter.on(move |_| {
            keep.fetch_add(1, Ordering::SeqCst);
        });
        let drop_count = count.clone();
        let id = emitter.on(move |_| {
            drop_count.fetch_add(10, Ordering::SeqCst);
        });

        emitter.off(id);
        emitter.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.handler_count(), 1);
    }
}
