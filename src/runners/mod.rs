//! Serialized execution contexts.
//!
//! A [`WorkRunner`] accepts units of [`Work`] and runs them on one logical thread,
//! in submission order, until it is disposed. After disposal, posted work is
//! dropped without running.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::{error::panic_message, hooks, Error};

mod immediate;
mod pool;
mod spawner;

pub use immediate::ImmediateWorkRunner;
pub use pool::{PoolConfig, WorkerPool};
pub use spawner::{Spawner, SpawnerWorkRunner};
#[cfg(any(test, feature = "testing"))]
pub use test::TestWorkRunner;

/// A unit of work posted to a [`WorkRunner`].
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Produces a fresh [`WorkRunner`] for every started loop or connection.
pub type RunnerFactory = Arc<dyn Fn() -> Box<dyn WorkRunner> + Send + Sync>;

/// A serialized, disposable execution context.
pub trait WorkRunner: Send + Sync {
    /// Queue or run `work`. Never runs it once the runner is disposed.
    fn post(&self, work: Work);

    /// Stop accepting work and discard anything still queued.
    ///
    /// Implementations may wait a bounded time for in-flight work but must never
    /// block indefinitely. Calling it again is a no-op.
    fn dispose(&self);
}

impl<R: WorkRunner + ?Sized> WorkRunner for Box<R> {
    fn post(&self, work: Work) {
        (**self).post(work)
    }

    fn dispose(&self) {
        (**self).dispose()
    }
}

impl<R: WorkRunner + ?Sized> WorkRunner for Arc<R> {
    fn post(&self, work: Work) {
        (**self).post(work)
    }

    fn dispose(&self) {
        (**self).dispose()
    }
}

/// Wrap a closure producing runners into a [`RunnerFactory`].
pub fn factory<R, P>(produce: P) -> RunnerFactory
where
    R: WorkRunner + 'static,
    P: Fn() -> R + Send + Sync + 'static,
{
    Arc::new(move || Box::new(produce()) as Box<dyn WorkRunner>)
}

/// Runs work synchronously on the posting thread.
pub fn immediate() -> ImmediateWorkRunner {
    ImmediateWorkRunner::new()
}

/// One dedicated worker thread.
pub fn single_thread() -> WorkerPool {
    WorkerPool::fixed(1, PoolConfig::default())
}

/// `size` worker threads sharing one queue.
pub fn fixed_thread_pool(size: usize) -> WorkerPool {
    WorkerPool::fixed(size, PoolConfig::default())
}

/// Worker threads created on demand and retired after the keep-alive period.
pub fn cached_thread_pool() -> WorkerPool {
    WorkerPool::cached(PoolConfig::default())
}

/// Run `work`, catching and reporting a panic instead of unwinding into the runner.
pub(crate) fn run_isolated<W: FnOnce()>(context: &'static str, work: W) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
        let message = panic_message(payload.as_ref());
        tracing::error!(context, panic = %message, "isolated panic");
        hooks::handle_error(&Error::Panicked { context, message });
    }
}
