use core::future::Future;
use core::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flume::{Receiver, Sender};
use spin::Mutex;

use super::{run_isolated, Work, WorkRunner};

/// A spawner trait for executing futures on a host event loop.
///
/// This abstraction lets a [`SpawnerWorkRunner`] run on whatever loop already
/// exists, such as a tokio runtime or a UI dispatcher.
///
/// Function pointers and closures automatically implement this trait via the blanket implementation.
pub trait Spawner {
    /// Spawn a future on the host loop.
    fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>);
}

/// Implement Spawner for any callable type that matches the signature.
///
/// This includes function pointers, closures, and function items.
impl<F> Spawner for F
where
    F: Fn(Pin<Box<dyn Future<Output = ()> + Send>>),
{
    fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
        self(future)
    }
}

/// A [`WorkRunner`] executing work on a host event loop.
///
/// A single future, spawned once at construction, drains the queue. Work
/// therefore runs in submission order on whichever thread the host loop polls
/// that future.
///
/// ```rust
/// use std::future::Future;
/// use std::pin::Pin;
///
/// use futures::executor::LocalPool;
/// use futures::task::SpawnExt;
/// use oxide_loop::runners::{SpawnerWorkRunner, WorkRunner};
///
/// let mut pool = LocalPool::new();
/// let spawner = pool.spawner();
/// let runner = SpawnerWorkRunner::new(&move |future: Pin<Box<dyn Future<Output = ()> + Send>>| {
///     spawner.spawn(future).expect("host loop is alive");
/// });
///
/// runner.post(Box::new(|| println!("on the host loop")));
/// pool.run_until_stalled();
/// runner.dispose();
/// ```
pub struct SpawnerWorkRunner {
    sender: Mutex<Option<Sender<Work>>>,
    receiver: Receiver<Work>,
    disposed: Arc<AtomicBool>,
}

impl SpawnerWorkRunner {
    pub fn new<S: Spawner + ?Sized>(spawner: &S) -> Self {
        let (sender, receiver) = flume::unbounded::<Work>();
        let disposed = Arc::new(AtomicBool::new(false));

        let queue = receiver.clone();
        let stopped = disposed.clone();
        spawner.spawn(Box::pin(async move {
            while let Ok(work) = queue.recv_async().await {
                if stopped.load(Ordering::Acquire) {
                    break;
                }
                run_isolated("host loop task", work);
            }
        }));

        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            disposed,
        }
    }
}

impl WorkRunner for SpawnerWorkRunner {
    fn post(&self, work: Work) {
        if self.disposed.load(Ordering::Acquire) {
            tracing::trace!("dropping work posted to a disposed host loop runner");
            return;
        }
        if let Some(sender) = self.sender.lock().as_ref() {
            sender.send(work).ok();
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        drop(self.sender.lock().take());

        let outstanding = self.receiver.drain().count();
        if outstanding > 0 {
            tracing::warn!(outstanding, "disposing host loop runner with outstanding tasks");
        }
    }
}
