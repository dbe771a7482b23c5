//! Renderer abstraction for views attached through a [`LoopController`](crate::LoopController).

use std::marker::PhantomData;
#[cfg(any(test, feature = "testing"))]
use std::sync::Arc;

use spin::Mutex;

use crate::connection::{Connectable, Connection};
use crate::{ConnectionError, Emitter};

/// Renderer abstraction for displaying models.
///
/// Implement this trait to integrate a loop with your rendering system
/// (UI framework, terminal, embedded display, etc.), then wrap a constructor
/// for it in a [`View`] to connect it to a controller.
///
/// # Example
///
/// ```rust
/// use oxide_loop::Renderer;
///
/// struct ConsoleRenderer;
///
/// impl Renderer<u32> for ConsoleRenderer {
///     fn render(&mut self, count: u32) {
///         println!("count: {count}");
///     }
/// }
/// ```
pub trait Renderer<M> {
    /// Render the given model.
    fn render(&mut self, model: M);
}

/// A [`Connectable`] view: models in, events out.
///
/// Every time the view is connected, `create` builds a fresh renderer from the
/// emitter the renderer should use to send events. Disposing the connection
/// drops the renderer, which should stop it emitting.
///
/// ```rust
/// use oxide_loop::{Emitter, Renderer, View};
///
/// struct Counter { on_click: Emitter<()> }
///
/// impl Renderer<u32> for Counter {
///     fn render(&mut self, _count: u32) {}
/// }
///
/// let view = View::new(|events: Emitter<()>| Counter { on_click: events });
/// # let _: View<_, u32, ()> = view;
/// ```
pub struct View<C, M, E> {
    create: C,
    _types: PhantomData<fn(M) -> E>,
}

impl<C, M, E> View<C, M, E> {
    pub fn new(create: C) -> Self {
        Self {
            create,
            _types: PhantomData,
        }
    }
}

impl<C, R, M, E> Connectable<M, E> for View<C, M, E>
where
    C: Fn(Emitter<E>) -> R + Send + Sync,
    R: Renderer<M> + Send + 'static,
    M: 'static,
    E: 'static,
{
    fn connect(&self, output: Emitter<E>) -> Result<Box<dyn Connection<M>>, ConnectionError> {
        Ok(Box::new(RendererConnection {
            renderer: Mutex::new(Some((self.create)(output))),
            _model: PhantomData,
        }))
    }
}

struct RendererConnection<R, M> {
    renderer: Mutex<Option<R>>,
    _model: PhantomData<fn(M)>,
}

impl<R, M> Connection<M> for RendererConnection<R, M>
where
    R: Renderer<M> + Send,
{
    fn accept(&self, model: M) {
        if let Some(renderer) = self.renderer.lock().as_mut() {
            renderer.render(model);
        }
    }

    fn dispose(&self) {
        drop(self.renderer.lock().take());
    }
}

#[cfg(any(test, feature = "testing"))]
/// Captures every model it is given, for assertions.
///
/// Only available with the `testing` feature.
///
/// Use [`observer`](Self::observer) to register it on a [`Loop`](crate::Loop), or use
/// it directly as a [`Renderer`].
///
/// # Example
///
/// ```rust
/// use oxide_loop::RecordingObserver;
///
/// let recorder = RecordingObserver::new();
/// let observer = recorder.observer();
///
/// observer(1);
/// observer(2);
///
/// recorder.with_models(|models| assert_eq!(models, &[1, 2]));
/// ```
pub struct RecordingObserver<M> {
    models: Arc<Mutex<Vec<M>>>,
}

#[cfg(any(test, feature = "testing"))]
impl<M> Clone for RecordingObserver<M> {
    fn clone(&self) -> Self {
        Self {
            models: self.models.clone(),
        }
    }
}

#[cfg(any(test, feature = "testing"))]
impl<M> Renderer<M> for RecordingObserver<M> {
    fn render(&mut self, model: M) {
        self.models.lock().push(model);
    }
}

#[cfg(any(test, feature = "testing"))]
impl<M: Send + 'static> Default for RecordingObserver<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "testing"))]
impl<M: Send + 'static> RecordingObserver<M> {
    pub fn new() -> Self {
        Self {
            models: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A consumer sharing this recorder's storage.
    pub fn observer(&self) -> impl Fn(M) + Send + Sync + 'static {
        let models = self.models.clone();
        move |model| models.lock().push(model)
    }

    /// Get the number of models received so far.
    pub fn count(&self) -> usize {
        self.models.lock().len()
    }

    /// Access the captured models with a closure.
    pub fn with_models<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[M]) -> R,
    {
        let models = self.models.lock();
        f(&models)
    }
}

#[cfg(any(test, feature = "testing"))]
impl<M: Clone + Send + 'static> RecordingObserver<M> {
    /// The most recently received model.
    pub fn last(&self) -> Option<M> {
        self.models.lock().last().cloned()
    }

    pub fn models(&self) -> Vec<M> {
        self.models.lock().clone()
    }
}
