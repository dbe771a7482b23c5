//! Bidirectional channels between the loop and the outside world.
//!
//! A [`Connectable`] is connected once per loop (or per controller attach) and
//! yields a [`Connection`]: input goes in through [`Connection::accept`], output
//! comes back through the [`Emitter`] handed to `connect`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spin::Mutex;

use crate::{ConnectionError, Emitter};

/// Something that can be released.
pub trait Disposable: Send + Sync {
    /// Release the resource. Calling this more than once must be harmless.
    fn dispose(&self);
}

impl<D> Disposable for D
where
    D: Fn() + Send + Sync,
{
    fn dispose(&self) {
        self()
    }
}

/// A live input sink. Once disposed it ignores input and produces no output.
pub trait Connection<I>: Send + Sync {
    fn accept(&self, value: I);
    fn dispose(&self);
}

impl<I, C: Connection<I> + ?Sized> Connection<I> for Box<C> {
    fn accept(&self, value: I) {
        (**self).accept(value)
    }

    fn dispose(&self) {
        (**self).dispose()
    }
}

impl<I, C: Connection<I> + ?Sized> Connection<I> for Arc<C> {
    fn accept(&self, value: I) {
        (**self).accept(value)
    }

    fn dispose(&self) {
        (**self).dispose()
    }
}

/// Produces [`Connection`]s that accept `I` and emit `O`.
pub trait Connectable<I, O>: Send + Sync {
    /// Connect, giving the connection an emitter for its output.
    ///
    /// Fails with [`ConnectionError::LimitExceeded`] if this connectable does not
    /// support another concurrent connection.
    fn connect(&self, output: Emitter<O>) -> Result<Box<dyn Connection<I>>, ConnectionError>;
}

impl<I, O, C: Connectable<I, O> + ?Sized> Connectable<I, O> for Arc<C> {
    fn connect(&self, output: Emitter<O>) -> Result<Box<dyn Connection<I>>, ConnectionError> {
        (**self).connect(output)
    }
}

/// A connection built from two closures.
pub struct FnConnection<A, D> {
    on_accept: A,
    on_dispose: D,
}

impl<A, D> FnConnection<A, D> {
    pub fn new(on_accept: A, on_dispose: D) -> Self {
        Self {
            on_accept,
            on_dispose,
        }
    }
}

impl<I, A, D> Connection<I> for FnConnection<A, D>
where
    A: Fn(I) + Send + Sync,
    D: Fn() + Send + Sync,
{
    fn accept(&self, value: I) {
        (self.on_accept)(value)
    }

    fn dispose(&self) {
        (self.on_dispose)()
    }
}

/// A [`Connectable`] built from a closure producing connections.
pub struct FnConnectable<C>(C);

impl<C> FnConnectable<C> {
    pub fn new(connect: C) -> Self {
        Self(connect)
    }
}

impl<I, O, C> Connectable<I, O> for FnConnectable<C>
where
    C: Fn(Emitter<O>) -> Result<Box<dyn Connection<I>>, ConnectionError> + Send + Sync,
{
    fn connect(&self, output: Emitter<O>) -> Result<Box<dyn Connection<I>>, ConnectionError> {
        (self.0)(output)
    }
}

/// An external producer of events, independent of the effect handler.
pub trait EventSource<E>: Send + Sync {
    /// Start emitting events into `events` until the returned handle is disposed.
    fn subscribe(&self, events: Emitter<E>) -> Box<dyn Disposable>;
}

impl<E, S: EventSource<E> + ?Sized> EventSource<E> for Arc<S> {
    fn subscribe(&self, events: Emitter<E>) -> Box<dyn Disposable> {
        (**self).subscribe(events)
    }
}

/// Several event sources feeding one emitter.
pub struct MergedEventSource<E> {
    sources: Vec<Arc<dyn EventSource<E>>>,
}

impl<E> MergedEventSource<E> {
    pub fn new(sources: Vec<Arc<dyn EventSource<E>>>) -> Self {
        Self { sources }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl<E> Clone for MergedEventSource<E> {
    fn clone(&self) -> Self {
        Self {
            sources: self.sources.clone(),
        }
    }
}

impl<E: 'static> EventSource<E> for MergedEventSource<E> {
    fn subscribe(&self, events: Emitter<E>) -> Box<dyn Disposable> {
        let subscriptions: Vec<Box<dyn Disposable>> = self
            .sources
            .iter()
            .map(|source| source.subscribe(events.clone()))
            .collect();

        Box::new(move || {
            for subscription in &subscriptions {
                subscription.dispose();
            }
        })
    }
}

/// Wraps a [`Connectable`] so its connections honour disposal strictly.
///
/// After `dispose`, input is dropped before reaching the wrapped connection and
/// output is dropped before reaching the emitter, whatever the wrapped code does.
/// Disposal itself happens at most once.
pub struct SafeConnectable<C> {
    actual: C,
}

impl<C> SafeConnectable<C> {
    pub fn new(actual: C) -> Self {
        Self { actual }
    }
}

impl<I, O, C> Connectable<I, O> for SafeConnectable<C>
where
    I: 'static,
    O: 'static,
    C: Connectable<I, O>,
{
    fn connect(&self, output: Emitter<O>) -> Result<Box<dyn Connection<I>>, ConnectionError> {
        let disposed = Arc::new(AtomicBool::new(false));

        let gate = disposed.clone();
        let safe_output = Emitter::new(move |value| {
            if !gate.load(Ordering::Acquire) {
                output.emit(value);
            }
        });

        let connection = self.actual.connect(safe_output)?;
        Ok(Box::new(SafeConnection {
            connection,
            disposed,
        }))
    }
}

struct SafeConnection<I> {
    connection: Box<dyn Connection<I>>,
    disposed: Arc<AtomicBool>,
}

impl<I> Connection<I> for SafeConnection<I> {
    fn accept(&self, value: I) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        self.connection.accept(value);
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.connection.dispose();
    }
}

/// Buffers input until a delegate connection is supplied.
///
/// Lets a loop hand effects to its effect handler before the handler's
/// connection exists, since connecting requires the loop's event emitter.
pub(crate) struct QueuingConnection<I> {
    state: Mutex<QueueState<I>>,
}

struct QueueState<I> {
    queue: Vec<I>,
    delegate: Option<Arc<dyn Connection<I>>>,
    disposed: bool,
}

impl<I> QueuingConnection<I> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: Vec::new(),
                delegate: None,
                disposed: false,
            }),
        }
    }

    /// Install the delegate and flush anything queued so far into it.
    pub(crate) fn set_delegate(&self, delegate: Arc<dyn Connection<I>>) {
        let queued = {
            let mut state = self.state.lock();
            if state.delegate.is_some() {
                tracing::error!("attempt at setting a queuing connection delegate twice");
                return;
            }
            state.delegate = Some(delegate.clone());
            if state.disposed {
                drop(state);
                delegate.dispose();
                return;
            }
            core::mem::take(&mut state.queue)
        };

        for value in queued {
            delegate.accept(value);
        }
    }

    /// Drop queued input and dispose the delegate, if any.
    pub(crate) fn close(&self) {
        let delegate = {
            let mut state = self.state.lock();
            state.disposed = true;
            state.queue.clear();
            state.delegate.clone()
        };
        if let Some(delegate) = delegate {
            delegate.dispose();
        }
    }
}

impl<I: Send> Connection<I> for QueuingConnection<I> {
    fn accept(&self, value: I) {
        let delegate = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            match &state.delegate {
                Some(delegate) => delegate.clone(),
                None => {
                    state.queue.push(value);
                    return;
                }
            }
        };
        delegate.accept(value);
    }

    fn dispose(&self) {
        self.close();
    }
}
