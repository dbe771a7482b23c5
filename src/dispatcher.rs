//! Marshals messages onto a [`WorkRunner`].

use std::sync::Arc;

use crate::runners::{run_isolated, WorkRunner};

/// Wraps a consumer so that every message is delivered on a specific runner.
///
/// The producer's thread never runs the consumer: [`accept`](Self::accept)
/// only posts. A panicking consumer is caught and reported through the
/// diagnostic hook, so a misbehaving consumer cannot take down a runner that
/// other consumers share.
pub struct MessageDispatcher<T> {
    runner: Box<dyn WorkRunner>,
    consumer: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T: Send + 'static> MessageDispatcher<T> {
    pub fn new<R, C>(runner: R, consumer: C) -> Self
    where
        R: WorkRunner + 'static,
        C: Fn(T) + Send + Sync + 'static,
    {
        Self {
            runner: Box::new(runner),
            consumer: Arc::new(consumer),
        }
    }

    pub fn accept(&self, message: T) {
        let consumer = self.consumer.clone();
        self.runner.post(Box::new(move || {
            run_isolated("message consumer", move || consumer(message));
        }));
    }
}

impl<T> MessageDispatcher<T> {
    /// Dispose the underlying runner. Messages not yet delivered are dropped.
    pub fn dispose(&self) {
        self.runner.dispose();
    }
}
