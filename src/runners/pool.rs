use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use spin::Mutex;

use super::{run_isolated, Work, WorkRunner};

static THREAD_COUNT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    // Identity of the pool owning the current thread, 0 for non-worker threads.
    static CURRENT_POOL: Cell<usize> = const { Cell::new(0) };
}

/// Tuning for [`WorkerPool`]s.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Worker threads are named `<name_prefix>-<n>`.
    pub name_prefix: String,
    /// How long `dispose` waits for in-flight work before giving up.
    pub grace_period: Duration,
    /// How long an idle worker of a cached pool lingers before exiting.
    pub keep_alive: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name_prefix: "oxide-loop".to_string(),
            grace_period: Duration::from_millis(100),
            keep_alive: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Sizing {
    Fixed(usize),
    Cached,
}

struct Shared {
    disposed: AtomicBool,
    idle: AtomicUsize,
}

/// A [`WorkRunner`] backed by OS threads pulling from one FIFO queue.
///
/// A pool of one thread ([`single_thread`](super::single_thread)) executes work
/// strictly in submission order. Larger pools only guarantee that work starts in
/// submission order.
pub struct WorkerPool {
    sizing: Sizing,
    config: PoolConfig,
    shared: Arc<Shared>,
    sender: Mutex<Option<Sender<Work>>>,
    receiver: Receiver<Work>,
    // Every worker holds a clone; the channel disconnects once all have exited.
    exit_sender: Mutex<Option<Sender<()>>>,
    exit_receiver: Receiver<()>,
}

impl WorkerPool {
    /// A pool with exactly `size` workers, started immediately.
    pub fn fixed(size: usize, config: PoolConfig) -> Self {
        let pool = Self::new(Sizing::Fixed(size.max(1)), config);
        for _ in 0..size.max(1) {
            pool.spawn_worker();
        }
        pool
    }

    /// A pool that starts a worker whenever work arrives and none is idle.
    pub fn cached(config: PoolConfig) -> Self {
        Self::new(Sizing::Cached, config)
    }

    fn new(sizing: Sizing, config: PoolConfig) -> Self {
        let (sender, receiver) = flume::unbounded();
        let (exit_sender, exit_receiver) = flume::bounded(0);
        Self {
            sizing,
            config,
            shared: Arc::new(Shared {
                disposed: AtomicBool::new(false),
                idle: AtomicUsize::new(0),
            }),
            sender: Mutex::new(Some(sender)),
            receiver,
            exit_sender: Mutex::new(Some(exit_sender)),
            exit_receiver,
        }
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.shared) as usize
    }

    fn spawn_worker(&self) {
        let Some(exit_sender) = self.exit_sender.lock().clone() else {
            return;
        };
        let receiver = self.receiver.clone();
        let shared = self.shared.clone();
        let identity = self.identity();
        let keep_alive = match self.sizing {
            Sizing::Cached => Some(self.config.keep_alive),
            Sizing::Fixed(_) => None,
        };
        let name = format!(
            "{}-{}",
            self.config.name_prefix,
            THREAD_COUNT.fetch_add(1, Ordering::Relaxed) + 1
        );

        let spawned = thread::Builder::new().name(name).spawn(move || {
            CURRENT_POOL.with(|current| current.set(identity));
            work_until_closed(&receiver, &shared, keep_alive);
            drop(exit_sender);
        });

        if let Err(error) = spawned {
            tracing::error!(%error, "failed to spawn work runner thread");
        }
    }
}

fn work_until_closed(receiver: &Receiver<Work>, shared: &Shared, keep_alive: Option<Duration>) {
    loop {
        shared.idle.fetch_add(1, Ordering::SeqCst);
        let received = match keep_alive {
            Some(timeout) => receiver.recv_timeout(timeout),
            None => receiver
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };
        shared.idle.fetch_sub(1, Ordering::SeqCst);

        let work = match received {
            Ok(work) => work,
            // A poster may have counted us as idle just before we timed out.
            Err(RecvTimeoutError::Timeout) => match receiver.try_recv() {
                Ok(work) => work,
                Err(_) => return,
            },
            Err(RecvTimeoutError::Disconnected) => return,
        };

        if shared.disposed.load(Ordering::Acquire) {
            return;
        }
        run_isolated("worker pool task", work);
    }
}

impl WorkRunner for WorkerPool {
    fn post(&self, work: Work) {
        if self.shared.disposed.load(Ordering::Acquire) {
            tracing::trace!("dropping work posted to a disposed worker pool");
            return;
        }
        let Some(sender) = self.sender.lock().clone() else {
            return;
        };
        if sender.send(work).is_err() {
            return;
        }
        if matches!(self.sizing, Sizing::Cached) && self.shared.idle.load(Ordering::SeqCst) == 0 {
            self.spawn_worker();
        }
    }

    fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        drop(self.sender.lock().take());

        let outstanding = self.receiver.drain().count();
        if outstanding > 0 {
            tracing::warn!(outstanding, "disposing worker pool with outstanding tasks");
        }

        drop(self.exit_sender.lock().take());

        if CURRENT_POOL.with(Cell::get) == self.identity() {
            // Waiting here would wait on ourselves.
            tracing::debug!("worker pool disposed from one of its own workers");
            return;
        }

        let deadline = Instant::now() + self.config.grace_period;
        if let Err(RecvTimeoutError::Timeout) = self.exit_receiver.recv_deadline(deadline) {
            tracing::error!(
                grace_period = ?self.config.grace_period,
                "worker pool shutdown timed out; there are still tasks executing"
            );
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.dispose();
    }
}
