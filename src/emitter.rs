//! Event emitter handed to effect handlers, event sources and views.

use std::sync::Arc;

use flume::Sender;

/// Cloneable handle used to feed events (or any other output) into a consumer.
///
/// The loop gives an `Emitter` to its effect handler and to every event source;
/// the controller gives one to the connected view. Emitting is safe from any
/// thread, and emitting into something that has been disposed is a silent no-op.
///
/// # Example
///
/// ```rust
/// use oxide_loop::Emitter;
///
/// let (sender, receiver) = flume::unbounded();
/// let emitter = Emitter::from(sender);
///
/// emitter.emit("clicked");
/// assert_eq!(receiver.try_recv(), Ok("clicked"));
/// ```
pub struct Emitter<T>(Arc<dyn Fn(T) + Send + Sync>);

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Emitter<T> {
    /// Create an emitter that forwards every value to `consumer`.
    pub fn new<C>(consumer: C) -> Self
    where
        C: Fn(T) + Send + Sync + 'static,
    {
        Self(Arc::new(consumer))
    }

    /// Emit a value.
    pub fn emit(&self, value: T) {
        (self.0)(value);
    }
}

impl<T: Send + 'static> From<Sender<T>> for Emitter<T> {
    /// Emitter backed by a channel sender; values sent after the receiver is
    /// dropped are discarded.
    fn from(sender: Sender<T>) -> Self {
        Self::new(move |value| {
            sender.send(value).ok();
        })
    }
}

impl<T> core::fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Emitter").finish_non_exhaustive()
    }
}
