//! The pure functions driving a loop.

use std::hash::Hash;

use crate::{First, Next};

/// Reduce an event and the current model to a [`Next`].
///
/// All state changes must go through this function. It is always called on the
/// loop's event runner, one event at a time. A panic here is fatal for the loop.
///
/// Closures of the matching shape implement this trait:
///
/// ```rust
/// use oxide_loop::{Next, Update};
///
/// let update = |count: &u32, delta: u32| -> Next<u32, ()> { Next::next(count + delta) };
/// assert_eq!(update.update(&1, 2).model(), Some(&3));
/// ```
pub trait Update<M, E, F: Eq + Hash>: Send + Sync {
    fn update(&self, model: &M, event: E) -> Next<M, F>;
}

impl<M, E, F, U> Update<M, E, F> for U
where
    F: Eq + Hash,
    U: Fn(&M, E) -> Next<M, F> + Send + Sync,
{
    fn update(&self, model: &M, event: E) -> Next<M, F> {
        self(model, event)
    }
}

/// Derive the starting model and start effects from a model.
///
/// Called once per started loop, on the event runner, before any event is
/// processed. A panic here is fatal for the loop.
pub trait Init<M, F: Eq + Hash>: Send + Sync {
    fn init(&self, model: M) -> First<M, F>;
}

impl<M, F, I> Init<M, F> for I
where
    F: Eq + Hash,
    I: Fn(M) -> First<M, F> + Send + Sync,
{
    fn init(&self, model: M) -> First<M, F> {
        self(model)
    }
}
