//! Routes effects to handlers by tag.
//!
//! Effects are usually an enum; [`Tagged::tag`] maps each value to a fieldless
//! tag naming its variant. Tags may form a hierarchy through
//! [`EffectTag::parent`], in which case a handler registered for a parent tag
//! also receives effects tagged with any of its descendants.

use std::fmt::Debug;
use std::hash::Hash;
use std::iter;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::connection::{Connectable, Connection, FnConnectable, FnConnection, SafeConnectable};
use crate::error::panic_message;
use crate::runners::{RunnerFactory, WorkRunner};
use crate::{hooks, ConnectionError, Emitter, Error, RouterError};

/// A fieldless identifier for a family of effects.
pub trait EffectTag: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// The enclosing tag, if tags are arranged in a hierarchy.
    fn parent(&self) -> Option<Self> {
        None
    }
}

/// An effect that can be routed by tag.
pub trait Tagged {
    type Tag: EffectTag;

    fn tag(&self) -> Self::Tag;
}

type FatalErrorHandler = Arc<dyn Fn(ConnectionError) + Send + Sync>;

fn lineage<T: EffectTag>(tag: T) -> impl Iterator<Item = T> {
    iter::successors(Some(tag), T::parent)
}

struct Route<F: Tagged, E> {
    tag: F::Tag,
    connectable: Arc<dyn Connectable<F, E>>,
    runner: Option<RunnerFactory>,
}

impl<F: Tagged, E> Clone for Route<F, E> {
    fn clone(&self) -> Self {
        Self {
            tag: self.tag,
            connectable: self.connectable.clone(),
            runner: self.runner.clone(),
        }
    }
}

/// Collects effect handlers and builds an [`EffectRouter`].
///
/// # Example
///
/// ```rust
/// use oxide_loop::{EffectRouter, EffectTag, Tagged};
///
/// #[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// enum Effect { Load(u32), Log(String) }
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// enum EffectKind { Load, Log }
///
/// impl EffectTag for EffectKind {}
///
/// impl Tagged for Effect {
///     type Tag = EffectKind;
///     fn tag(&self) -> EffectKind {
///         match self {
///             Effect::Load(_) => EffectKind::Load,
///             Effect::Log(_) => EffectKind::Log,
///         }
///     }
/// }
///
/// enum Event { Loaded(u32) }
///
/// let router = EffectRouter::<Effect, Event>::builder()
///     .add_function(EffectKind::Load, |effect| match effect {
///         Effect::Load(id) => Event::Loaded(id),
///         _ => unreachable!(),
///     })
///     .and_then(|builder| builder.add_consumer(EffectKind::Log, |effect| println!("{effect:?}")))
///     .expect("tags do not collide")
///     .build();
/// # let _ = router;
/// ```
pub struct EffectRouterBuilder<F: Tagged, E> {
    routes: Vec<Route<F, E>>,
    error_handler: FatalErrorHandler,
}

impl<F, E> EffectRouterBuilder<F, E>
where
    F: Tagged + Debug + Send + 'static,
    E: Send + 'static,
{
    fn new() -> Self {
        Self {
            routes: Vec::new(),
            error_handler: Arc::new(|error: ConnectionError| {
                hooks::handle_error(&Error::Connection(error))
            }),
        }
    }

    /// Run `action` for every effect with this tag.
    pub fn add_action<A>(self, tag: F::Tag, action: A) -> Result<Self, RouterError>
    where
        A: Fn() + Send + Sync + 'static,
    {
        self.add_consumer(tag, move |_| action())
    }

    /// Pass every effect with this tag to `consumer`.
    pub fn add_consumer<C>(self, tag: F::Tag, consumer: C) -> Result<Self, RouterError>
    where
        C: Fn(F) + Send + Sync + 'static,
    {
        self.register(tag, None, consumer_connectable(consumer))
    }

    /// Like [`add_consumer`](Self::add_consumer), executing on runners produced by `runner`.
    pub fn add_consumer_on<C>(
        self,
        tag: F::Tag,
        runner: RunnerFactory,
        consumer: C,
    ) -> Result<Self, RouterError>
    where
        C: Fn(F) + Send + Sync + 'static,
    {
        self.register(tag, Some(runner), consumer_connectable(consumer))
    }

    /// Map every effect with this tag to an event fed back into the loop.
    pub fn add_function<M>(self, tag: F::Tag, function: M) -> Result<Self, RouterError>
    where
        M: Fn(F) -> E + Send + Sync + 'static,
    {
        self.register(tag, None, function_connectable(function))
    }

    /// Like [`add_function`](Self::add_function), executing on runners produced by `runner`.
    pub fn add_function_on<M>(
        self,
        tag: F::Tag,
        runner: RunnerFactory,
        function: M,
    ) -> Result<Self, RouterError>
    where
        M: Fn(F) -> E + Send + Sync + 'static,
    {
        self.register(tag, Some(runner), function_connectable(function))
    }

    /// Hand every effect with this tag to a full [`Connectable`].
    pub fn add_connectable<C>(self, tag: F::Tag, connectable: C) -> Result<Self, RouterError>
    where
        C: Connectable<F, E> + 'static,
    {
        self.register(tag, None, Arc::new(connectable))
    }

    /// Like [`add_connectable`](Self::add_connectable), executing on runners produced by `runner`.
    ///
    /// Each connection gets its own runner, so a slow handler does not hold up
    /// effects with other tags. The runner should be serial if effects with this
    /// tag must be handled in arrival order.
    pub fn add_connectable_on<C>(
        self,
        tag: F::Tag,
        runner: RunnerFactory,
        connectable: C,
    ) -> Result<Self, RouterError>
    where
        C: Connectable<F, E> + 'static,
    {
        self.register(tag, Some(runner), Arc::new(connectable))
    }

    /// Replace the handler for unknown effects and panicking handlers.
    ///
    /// The default reports to the [diagnostic hook](crate::hooks).
    pub fn with_fatal_error_handler<H>(mut self, handler: H) -> Self
    where
        H: Fn(ConnectionError) + Send + Sync + 'static,
    {
        self.error_handler = Arc::new(handler);
        self
    }

    /// Snapshot the registrations into a router. Later registrations on this
    /// builder do not affect the returned router.
    pub fn build(&self) -> EffectRouter<F, E> {
        EffectRouter {
            inner: SafeConnectable::new(RouterConnectable {
                routes: self.routes.clone().into(),
                error_handler: self.error_handler.clone(),
            }),
        }
    }

    fn register(
        mut self,
        tag: F::Tag,
        runner: Option<RunnerFactory>,
        connectable: Arc<dyn Connectable<F, E>>,
    ) -> Result<Self, RouterError> {
        for existing in &self.routes {
            let overlaps = lineage(tag).any(|ancestor| ancestor == existing.tag)
                || lineage(existing.tag).any(|ancestor| ancestor == tag);
            if overlaps {
                let collision = RouterError::HandlerCollision {
                    tag: format!("{tag:?}"),
                    existing: format!("{:?}", existing.tag),
                };
                hooks::handle_error(&Error::Router(collision.clone()));
                return Err(collision);
            }
        }

        self.routes.push(Route {
            tag,
            connectable,
            runner,
        });
        Ok(self)
    }
}

fn consumer_connectable<F, E, C>(consumer: C) -> Arc<dyn Connectable<F, E>>
where
    F: Send + 'static,
    E: 'static,
    C: Fn(F) + Send + Sync + 'static,
{
    let consumer = Arc::new(consumer);
    Arc::new(FnConnectable::new(
        move |_output: Emitter<E>| -> Result<Box<dyn Connection<F>>, ConnectionError> {
            let consumer = consumer.clone();
            Ok(Box::new(FnConnection::new(
                move |effect: F| consumer(effect),
                || {},
            )))
        },
    ))
}

fn function_connectable<F, E, M>(function: M) -> Arc<dyn Connectable<F, E>>
where
    F: Send + 'static,
    E: 'static,
    M: Fn(F) -> E + Send + Sync + 'static,
{
    let function = Arc::new(function);
    Arc::new(FnConnectable::new(
        move |output: Emitter<E>| -> Result<Box<dyn Connection<F>>, ConnectionError> {
            let function = function.clone();
            Ok(Box::new(FnConnection::new(
                move |effect: F| output.emit(function(effect)),
                || {},
            )))
        },
    ))
}

/// An immutable set of tag → handler registrations, usable as a loop's effect handler.
pub struct EffectRouter<F: Tagged, E> {
    inner: SafeConnectable<RouterConnectable<F, E>>,
}

impl<F, E> EffectRouter<F, E>
where
    F: Tagged + Debug + Send + 'static,
    E: Send + 'static,
{
    pub fn builder() -> EffectRouterBuilder<F, E> {
        EffectRouterBuilder::new()
    }
}

impl<F, E> Connectable<F, E> for EffectRouter<F, E>
where
    F: Tagged + Debug + Send + 'static,
    E: Send + 'static,
{
    fn connect(&self, output: Emitter<E>) -> Result<Box<dyn Connection<F>>, ConnectionError> {
        self.inner.connect(output)
    }
}

struct RouterConnectable<F: Tagged, E> {
    routes: Arc<[Route<F, E>]>,
    error_handler: FatalErrorHandler,
}

impl<F, E> Connectable<F, E> for RouterConnectable<F, E>
where
    F: Tagged + Debug + Send + 'static,
    E: Send + 'static,
{
    fn connect(&self, output: Emitter<E>) -> Result<Box<dyn Connection<F>>, ConnectionError> {
        let mut connections: Vec<(F::Tag, Arc<dyn Connection<F>>)> =
            Vec::with_capacity(self.routes.len());

        for route in self.routes.iter() {
            let connection = match route.connectable.connect(output.clone()) {
                Ok(connection) => connection,
                Err(error) => {
                    for (_, connected) in &connections {
                        connected.dispose();
                    }
                    return Err(error);
                }
            };

            let connection: Arc<dyn Connection<F>> = match &route.runner {
                Some(runner) => Arc::new(RunnerConnection {
                    tag: route.tag,
                    runner: runner(),
                    connection: Arc::from(connection),
                    error_handler: self.error_handler.clone(),
                }),
                None => Arc::from(connection),
            };
            connections.push((route.tag, connection));
        }

        Ok(Box::new(RouterConnection {
            connections,
            error_handler: self.error_handler.clone(),
        }))
    }
}

struct RouterConnection<F: Tagged> {
    connections: Vec<(F::Tag, Arc<dyn Connection<F>>)>,
    error_handler: FatalErrorHandler,
}

impl<F: Tagged> RouterConnection<F> {
    fn route_for(&self, tag: F::Tag) -> Option<&Arc<dyn Connection<F>>> {
        lineage(tag).find_map(|ancestor| {
            self.connections
                .iter()
                .find(|(registered, _)| *registered == ancestor)
                .map(|(_, connection)| connection)
        })
    }
}

impl<F> Connection<F> for RouterConnection<F>
where
    F: Tagged + Debug + Send + 'static,
{
    fn accept(&self, effect: F) {
        let tag = effect.tag();
        let Some(connection) = self.route_for(tag) else {
            (self.error_handler)(ConnectionError::UnknownEffect {
                effect: format!("{effect:?}"),
            });
            return;
        };
        guarded_accept(connection.as_ref(), tag, effect, &self.error_handler);
    }

    fn dispose(&self) {
        for (_, connection) in &self.connections {
            connection.dispose();
        }
    }
}

/// Executes one route's connection on that route's own runner.
struct RunnerConnection<F: Tagged> {
    tag: F::Tag,
    runner: Box<dyn WorkRunner>,
    connection: Arc<dyn Connection<F>>,
    error_handler: FatalErrorHandler,
}

impl<F> Connection<F> for RunnerConnection<F>
where
    F: Tagged + Send + 'static,
{
    fn accept(&self, effect: F) {
        let tag = self.tag;
        let connection = self.connection.clone();
        let error_handler = self.error_handler.clone();
        self.runner.post(Box::new(move || {
            guarded_accept(connection.as_ref(), tag, effect, &error_handler);
        }));
    }

    fn dispose(&self) {
        self.runner.dispose();
        self.connection.dispose();
    }
}

fn guarded_accept<F, T: Debug>(
    connection: &dyn Connection<F>,
    tag: T,
    effect: F,
    error_handler: &FatalErrorHandler,
) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| connection.accept(effect))) {
        error_handler(ConnectionError::HandlerPanicked {
            effect: format!("{tag:?}"),
            message: panic_message(payload.as_ref()),
        });
    }
}
