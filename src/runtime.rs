//! The loop engine that orchestrates event processing.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use spin::Mutex;

use crate::connection::{
    Connectable, Connection, Disposable, EventSource, MergedEventSource, QueuingConnection,
};
use crate::error::panic_message;
use crate::runners::{self, run_isolated, RunnerFactory, WorkRunner};
use crate::{hooks, Emitter, Error, First, Init, LoopError, MessageDispatcher, Next, Update};

/// Observability hooks around init and update.
///
/// Every method defaults to doing nothing. Hooks run on the event runner, in the
/// same task as the function they observe, so they must not block.
pub trait Logger<M, E, F: Eq + Hash>: Send + Sync {
    fn before_init(&self, _model: &M) {}

    fn after_init(&self, _model: &M, _result: &First<M, F>) {}

    /// `Init` panicked. The loop is unusable from here on.
    fn exception_during_init(&self, _model: &M, _message: &str) {}

    fn before_update(&self, _model: &M, _event: &E) {}

    fn after_update(&self, _model: &M, _result: &Next<M, F>) {}

    /// `Update` panicked. The loop is unusable from here on.
    fn exception_during_update(&self, _model: &M, _message: &str) {}
}

/// A [`Logger`] that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl<M, E, F: Eq + Hash> Logger<M, E, F> for NoopLogger {}

/// A [`Logger`] emitting `tracing` events for every init and update.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl<M, E, F> Logger<M, E, F> for TracingLogger
where
    M: Debug,
    E: Debug,
    F: Debug + Eq + Hash,
{
    fn before_init(&self, model: &M) {
        tracing::debug!(?model, "initializing loop");
    }

    fn after_init(&self, model: &M, result: &First<M, F>) {
        tracing::debug!(?model, first = ?result.model(), effects = ?result.effects(), "loop initialized");
    }

    fn exception_during_init(&self, model: &M, message: &str) {
        tracing::error!(?model, panic = message, "error initializing loop");
    }

    fn before_update(&self, model: &M, event: &E) {
        tracing::debug!(?model, ?event, "updating model");
    }

    fn after_update(&self, model: &M, result: &Next<M, F>) {
        tracing::debug!(
            ?model,
            next = ?result.model(),
            effects = ?result.effects(),
            "model updated"
        );
    }

    fn exception_during_update(&self, model: &M, message: &str) {
        tracing::error!(?model, panic = message, "error updating model");
    }
}

/// Starts loops.
pub trait LoopFactory<M, E, F: Eq + Hash>: Send + Sync {
    /// Start a loop from `model`, running `Init` first if one is configured.
    fn start_from(&self, model: M) -> Result<Loop<M, E, F>, LoopError>;

    /// Start a loop from `model` with start effects, without running `Init`.
    fn start_with(&self, model: M, effects: HashSet<F>) -> Result<Loop<M, E, F>, LoopError>;
}

impl<M, E, F, L> LoopFactory<M, E, F> for Arc<L>
where
    F: Eq + Hash,
    L: LoopFactory<M, E, F> + ?Sized,
{
    fn start_from(&self, model: M) -> Result<Loop<M, E, F>, LoopError> {
        (**self).start_from(model)
    }

    fn start_with(&self, model: M, effects: HashSet<F>) -> Result<Loop<M, E, F>, LoopError> {
        (**self).start_with(model, effects)
    }
}

/// Immutable loop configuration. Every setter returns an updated builder, and
/// the builder can be shared and cloned freely; each
/// [`start_from`](LoopFactory::start_from) creates a new, independent loop.
///
/// By default events are processed on a dedicated thread and effects on an
/// elastic thread pool.
///
/// # Example
///
/// ```rust
/// use oxide_loop::{runners, Connection, ConnectionError, Emitter, FnConnectable, FnConnection,
///     LoopBuilder, LoopFactory, Next};
///
/// let effects = FnConnectable::new(|_events: Emitter<u32>| -> Result<Box<dyn Connection<()>>, ConnectionError> {
///     Ok(Box::new(FnConnection::new(|_effect: ()| {}, || {})))
/// });
///
/// let builder = LoopBuilder::new(|count: &u32, delta: u32| -> Next<u32, ()> { Next::next(count + delta) }, effects)
///     .event_runner(runners::factory(runners::immediate))
///     .effect_runner(runners::factory(runners::immediate));
///
/// let running = builder.start_from(0).unwrap();
/// running.dispatch_event(5).unwrap();
/// assert_eq!(running.most_recent_model(), Some(5));
/// running.dispose();
/// ```
pub struct LoopBuilder<M, E, F: Eq + Hash> {
    update: Arc<dyn Update<M, E, F>>,
    effect_handler: Arc<dyn Connectable<F, E>>,
    init: Option<Arc<dyn Init<M, F>>>,
    event_sources: Vec<Arc<dyn EventSource<E>>>,
    logger: Arc<dyn Logger<M, E, F>>,
    event_runner: RunnerFactory,
    effect_runner: RunnerFactory,
}

impl<M, E, F: Eq + Hash> Clone for LoopBuilder<M, E, F> {
    fn clone(&self) -> Self {
        Self {
            update: self.update.clone(),
            effect_handler: self.effect_handler.clone(),
            init: self.init.clone(),
            event_sources: self.event_sources.clone(),
            logger: self.logger.clone(),
            event_runner: self.event_runner.clone(),
            effect_runner: self.effect_runner.clone(),
        }
    }
}

impl<M, E, F> LoopBuilder<M, E, F>
where
    M: Clone + Send + 'static,
    E: Send + 'static,
    F: Eq + Hash + Send + 'static,
{
    pub fn new<U, C>(update: U, effect_handler: C) -> Self
    where
        U: Update<M, E, F> + 'static,
        C: Connectable<F, E> + 'static,
    {
        Self {
            update: Arc::new(update),
            effect_handler: Arc::new(effect_handler),
            init: None,
            event_sources: Vec::new(),
            logger: Arc::new(NoopLogger),
            event_runner: runners::factory(runners::single_thread),
            effect_runner: runners::factory(runners::cached_thread_pool),
        }
    }

    pub fn init<I: Init<M, F> + 'static>(mut self, init: I) -> Self {
        self.init = Some(Arc::new(init));
        self
    }

    /// Add an event source. Sources accumulate; all of them feed the loop.
    pub fn event_source<S: EventSource<E> + 'static>(mut self, source: S) -> Self {
        self.event_sources.push(Arc::new(source));
        self
    }

    pub fn logger<L: Logger<M, E, F> + 'static>(mut self, logger: L) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    pub fn event_runner(mut self, factory: RunnerFactory) -> Self {
        self.event_runner = factory;
        self
    }

    pub fn effect_runner(mut self, factory: RunnerFactory) -> Self {
        self.effect_runner = factory;
        self
    }

    fn start(
        &self,
        model: M,
        init: Option<Arc<dyn Init<M, F>>>,
        effects: HashSet<F>,
    ) -> Result<Loop<M, E, F>, LoopError> {
        let event_source = if self.event_sources.is_empty() {
            None
        } else {
            Some(MergedEventSource::new(self.event_sources.clone()))
        };

        Loop::start(LoopParts {
            update: self.update.clone(),
            logger: self.logger.clone(),
            effect_handler: self.effect_handler.clone(),
            event_source,
            event_runner: (self.event_runner)(),
            effect_runner: (self.effect_runner)(),
            model,
            init,
            effects,
        })
    }
}

impl<M, E, F> LoopFactory<M, E, F> for LoopBuilder<M, E, F>
where
    M: Clone + Send + 'static,
    E: Send + 'static,
    F: Eq + Hash + Send + 'static,
{
    fn start_from(&self, model: M) -> Result<Loop<M, E, F>, LoopError> {
        self.start(model, self.init.clone(), HashSet::new())
    }

    fn start_with(&self, model: M, effects: HashSet<F>) -> Result<Loop<M, E, F>, LoopError> {
        self.start(model, None, effects)
    }
}

struct LoopParts<M, E, F: Eq + Hash> {
    update: Arc<dyn Update<M, E, F>>,
    logger: Arc<dyn Logger<M, E, F>>,
    effect_handler: Arc<dyn Connectable<F, E>>,
    event_source: Option<MergedEventSource<E>>,
    event_runner: Box<dyn WorkRunner>,
    effect_runner: Box<dyn WorkRunner>,
    model: M,
    init: Option<Arc<dyn Init<M, F>>>,
    effects: HashSet<F>,
}

/// A running loop.
///
/// Owns the current model and applies [`Update`] to it one event at a time on
/// the event runner, no matter how many threads dispatch events. After each
/// accepted update it publishes the new model to observers, then hands the
/// resulting effects to the effect handler on the effect runner.
///
/// Cloning yields another handle to the same loop. The loop is disposed when
/// [`dispose`](Self::dispose) is called or the last handle is dropped; it
/// cannot be restarted. Start a new one from
/// [`most_recent_model`](Self::most_recent_model) instead.
pub struct Loop<M, E, F: Eq + Hash> {
    inner: Arc<LoopInner<M, E, F>>,
}

impl<M, E, F: Eq + Hash> Clone for Loop<M, E, F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct LoopInner<M, E, F: Eq + Hash> {
    disposed: Arc<AtomicBool>,
    engine: Arc<Engine<M, E, F>>,
    events: Arc<MessageDispatcher<E>>,
    subscription: Mutex<Option<Box<dyn Disposable>>>,
}

impl<M, E, F> Loop<M, E, F>
where
    M: Clone + Send + 'static,
    E: Send + 'static,
    F: Eq + Hash + Send + 'static,
{
    fn start(parts: LoopParts<M, E, F>) -> Result<Self, LoopError> {
        let disposed = Arc::new(AtomicBool::new(false));

        let effect_connection = Arc::new(QueuingConnection::<F>::new());
        let queue = effect_connection.clone();
        let effects = MessageDispatcher::new(parts.effect_runner, move |effect: F| {
            queue.accept(effect)
        });

        let engine = Arc::new(Engine {
            disposed: disposed.clone(),
            update: parts.update,
            logger: parts.logger,
            state: Mutex::new(EngineState {
                model: parts.model,
                initialised: false,
                failed: false,
                pending: Vec::new(),
            }),
            observers: Arc::new(Observers::new()),
            effects,
            effect_connection,
        });

        let event_runner: Arc<dyn WorkRunner> = Arc::from(parts.event_runner);
        let processing = engine.clone();
        let events = Arc::new(MessageDispatcher::new(event_runner.clone(), move |event: E| {
            processing.update(event)
        }));

        // Output of the effect handler and event sources. Holds the dispatcher
        // weakly so the handler's connection does not keep the loop alive.
        let dispatcher: Weak<MessageDispatcher<E>> = Arc::downgrade(&events);
        let gate = disposed.clone();
        let emitter = Emitter::new(move |event: E| {
            if gate.load(Ordering::Acquire) {
                return;
            }
            if let Some(events) = dispatcher.upgrade() {
                events.accept(event);
            }
        });

        let inner = Arc::new(LoopInner {
            disposed,
            engine: engine.clone(),
            events,
            subscription: Mutex::new(None),
        });

        // From here on, dropping `inner` on an error path disposes what was set up.
        let connection = parts.effect_handler.connect(emitter.clone())?;
        engine.effect_connection.set_delegate(Arc::from(connection));

        if let Some(source) = parts.event_source {
            *inner.subscription.lock() = Some(source.subscribe(emitter));
        }

        let init = parts.init;
        let start_effects = parts.effects;
        event_runner.post(Box::new(move || {
            run_isolated("loop initialisation", || engine.initialise(init, start_effects))
        }));

        Ok(Self { inner })
    }

    /// Queue an event for processing on the event runner.
    ///
    /// Fails with [`LoopError::Disposed`] once the loop has been disposed; the
    /// error is also reported to the [diagnostic hook](crate::hooks).
    pub fn dispatch_event(&self, event: E) -> Result<(), LoopError> {
        if self.inner.disposed.load(Ordering::Acquire) {
            hooks::handle_error(&Error::Loop(LoopError::Disposed));
            return Err(LoopError::Disposed);
        }
        self.inner.events.accept(event);
        Ok(())
    }

    /// Observe every model published from now on, on the event runner.
    ///
    /// If the loop already has a model, `observer` receives it before this
    /// returns. The returned handle removes just this observer.
    pub fn observe<O>(&self, observer: O) -> Result<Box<dyn Disposable>, LoopError>
    where
        O: Fn(M) + Send + Sync + 'static,
    {
        self.register(Box::new(observer), None)
    }

    /// Like [`observe`](Self::observe), but delivers models on `runner`.
    ///
    /// The runner is disposed when the observer is removed.
    pub fn observe_on<R, O>(&self, runner: R, observer: O) -> Result<Box<dyn Disposable>, LoopError>
    where
        R: WorkRunner + 'static,
        O: Fn(M) + Send + Sync + 'static,
    {
        let dispatcher = Arc::new(MessageDispatcher::new(runner, observer));
        let delivering = dispatcher.clone();
        self.register(
            Box::new(move |model| delivering.accept(model)),
            Some(Box::new(move || dispatcher.dispose())),
        )
    }

    fn register(
        &self,
        deliver: Box<dyn Fn(M) + Send + Sync>,
        release: Option<Box<dyn Fn() + Send + Sync>>,
    ) -> Result<Box<dyn Disposable>, LoopError> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(LoopError::Disposed);
        }

        let observers = self.inner.engine.observers.clone();
        let id = observers.add(deliver, release);
        Ok(Box::new(move || observers.remove(id)))
    }

    /// The last model published to observers, if any.
    pub fn most_recent_model(&self) -> Option<M> {
        self.inner.engine.observers.latest()
    }
}

impl<M, E, F: Eq + Hash> Loop<M, E, F> {
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Stop the loop. Safe to call from any thread, any number of times.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl<M, E, F: Eq + Hash> LoopInner<M, E, F> {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.events.dispose();
        self.engine.effects.dispose();
        self.engine.effect_connection.close();
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.dispose();
        }
        self.engine.observers.clear();
        tracing::debug!("loop disposed");
    }
}

impl<M, E, F: Eq + Hash> Drop for LoopInner<M, E, F> {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct EngineState<M, E> {
    model: M,
    initialised: bool,
    failed: bool,
    // Events that arrived before `initialise` ran.
    pending: Vec<E>,
}

/// The part of a loop that runs on the event runner.
struct Engine<M, E, F: Eq + Hash> {
    disposed: Arc<AtomicBool>,
    update: Arc<dyn Update<M, E, F>>,
    logger: Arc<dyn Logger<M, E, F>>,
    state: Mutex<EngineState<M, E>>,
    observers: Arc<Observers<M>>,
    effects: MessageDispatcher<F>,
    effect_connection: Arc<QueuingConnection<F>>,
}

impl<M, E, F> Engine<M, E, F>
where
    M: Clone + Send + 'static,
    E: Send + 'static,
    F: Eq + Hash + Send + 'static,
{
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn initialise(&self, init: Option<Arc<dyn Init<M, F>>>, start_effects: HashSet<F>) {
        if self.is_disposed() {
            return;
        }

        let (publication, effects) = {
            let mut state = self.state.lock();
            if state.initialised {
                tracing::error!("loop already initialised");
                return;
            }

            let (model, effects) = match init {
                Some(init) => {
                    let start = state.model.clone();
                    self.logger.before_init(&start);
                    let seed = start.clone();
                    match panic::catch_unwind(AssertUnwindSafe(|| init.init(seed))) {
                        Ok(first) => {
                            self.logger.after_init(&start, &first);
                            first.into_parts()
                        }
                        Err(payload) => {
                            state.failed = true;
                            let message = panic_message(payload.as_ref());
                            self.logger.exception_during_init(&start, &message);
                            panic::resume_unwind(payload);
                        }
                    }
                }
                None => (state.model.clone(), start_effects),
            };

            state.model = model.clone();
            state.initialised = true;
            (self.observers.record(model, &self.disposed), effects)
        };

        if let Some(publication) = publication {
            publication.deliver(&self.disposed);
        }
        self.dispatch_effects(effects);

        let pending = core::mem::take(&mut self.state.lock().pending);
        for event in pending {
            self.update(event);
        }
    }

    fn update(&self, event: E) {
        if self.is_disposed() {
            return;
        }

        let (publication, effects) = {
            let mut state = self.state.lock();
            if state.failed {
                tracing::error!("dropping event dispatched to a failed loop");
                return;
            }
            if !state.initialised {
                state.pending.push(event);
                return;
            }

            self.logger.before_update(&state.model, &event);
            let next = match panic::catch_unwind(AssertUnwindSafe(|| {
                self.update.update(&state.model, event)
            })) {
                Ok(next) => next,
                Err(payload) => {
                    state.failed = true;
                    let message = panic_message(payload.as_ref());
                    self.logger.exception_during_update(&state.model, &message);
                    panic::resume_unwind(payload);
                }
            };
            self.logger.after_update(&state.model, &next);

            let (model, effects) = next.into_parts();
            let publication = model.and_then(|model| {
                state.model = model.clone();
                self.observers.record(model, &self.disposed)
            });
            (publication, effects)
        };

        if let Some(publication) = publication {
            publication.deliver(&self.disposed);
        }
        self.dispatch_effects(effects);
    }

    fn dispatch_effects(&self, effects: HashSet<F>) {
        for effect in effects {
            if self.is_disposed() {
                return;
            }
            self.effects.accept(effect);
        }
    }
}

struct ObserverEntry<M> {
    id: u64,
    deliver: Box<dyn Fn(M) + Send + Sync>,
    release: Option<Box<dyn Fn() + Send + Sync>>,
    // Version of the newest model delivered; older ones are skipped.
    seen: AtomicU64,
}

impl<M> ObserverEntry<M> {
    fn offer(&self, version: u64, model: M) {
        if self.seen.fetch_max(version, Ordering::AcqRel) < version {
            run_isolated("model observer", || (self.deliver)(model));
        }
    }

    fn release(&self) {
        if let Some(release) = &self.release {
            release();
        }
    }
}

struct ObserverSet<M> {
    next_id: u64,
    version: u64,
    latest: Option<M>,
    entries: Arc<Vec<Arc<ObserverEntry<M>>>>,
}

/// Copy-on-write observer registry. Callbacks always run outside the lock, so
/// observers may add or remove observers while being notified.
struct Observers<M> {
    set: Mutex<ObserverSet<M>>,
}

impl<M> Observers<M> {
    fn clear(&self) {
        let entries = core::mem::take(&mut self.set.lock().entries);
        for entry in entries.iter() {
            entry.release();
        }
    }
}

impl<M: Clone> Observers<M> {
    fn new() -> Self {
        Self {
            set: Mutex::new(ObserverSet {
                next_id: 0,
                version: 0,
                latest: None,
                entries: Arc::new(Vec::new()),
            }),
        }
    }

    fn add(
        &self,
        deliver: Box<dyn Fn(M) + Send + Sync>,
        release: Option<Box<dyn Fn() + Send + Sync>>,
    ) -> u64 {
        let (entry, current) = {
            let mut set = self.set.lock();
            set.next_id += 1;
            let entry = Arc::new(ObserverEntry {
                id: set.next_id,
                deliver,
                release,
                seen: AtomicU64::new(0),
            });
            let mut entries = Vec::clone(&set.entries);
            entries.push(entry.clone());
            set.entries = Arc::new(entries);
            let current = set.latest.clone().map(|model| (set.version, model));
            (entry, current)
        };

        if let Some((version, model)) = current {
            entry.offer(version, model);
        }
        entry.id
    }

    fn remove(&self, id: u64) {
        let removed = {
            let mut set = self.set.lock();
            let position = set.entries.iter().position(|entry| entry.id == id);
            position.map(|position| {
                let mut entries = Vec::clone(&set.entries);
                let removed = entries.remove(position);
                set.entries = Arc::new(entries);
                removed
            })
        };
        if let Some(entry) = removed {
            entry.release();
        }
    }

    fn latest(&self) -> Option<M> {
        self.set.lock().latest.clone()
    }

    /// Make `model` the latest and stamp it with the next version.
    ///
    /// Called with the engine state locked, so versions follow update order
    /// even when the event runner has several threads.
    fn record(&self, model: M, disposed: &AtomicBool) -> Option<Publication<M>> {
        if disposed.load(Ordering::Acquire) {
            return None;
        }
        let mut set = self.set.lock();
        set.version += 1;
        set.latest = Some(model.clone());
        Some(Publication {
            version: set.version,
            model,
            entries: set.entries.clone(),
        })
    }
}

/// A recorded model waiting to be offered to the observers registered when it
/// was recorded.
struct Publication<M> {
    version: u64,
    model: M,
    entries: Arc<Vec<Arc<ObserverEntry<M>>>>,
}

impl<M: Clone> Publication<M> {
    fn deliver(self, disposed: &AtomicBool) {
        for entry in self.entries.iter() {
            if disposed.load(Ordering::Acquire) {
                return;
            }
            entry.offer(self.version, self.model.clone());
        }
    }
}
