use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use super::{run_isolated, Work, WorkRunner};

/// Runs posted work on the posting thread.
///
/// Execution is still serialized: work posted while this runner is already
/// running something (from inside that work, or from another thread) is queued
/// and executed by the thread that is draining, right after the current item.
/// The draining thread keeps going until the queue is empty, so nested posts
/// complete before the outermost `post` returns.
pub struct ImmediateWorkRunner {
    queue: Mutex<VecDeque<Work>>,
    draining: AtomicBool,
    disposed: AtomicBool,
}

impl ImmediateWorkRunner {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    fn drain(&self) {
        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }

            loop {
                let next = self.queue.lock().pop_front();
                let Some(work) = next else { break };
                if self.disposed.load(Ordering::Acquire) {
                    let discarded = core::mem::take(&mut *self.queue.lock());
                    drop((work, discarded));
                    break;
                }
                run_isolated("immediate work runner task", work);
            }

            self.draining.store(false, Ordering::Release);

            // Another thread may have queued work between our last pop and the
            // store above without taking over the drain.
            if self.queue.lock().is_empty() {
                return;
            }
        }
    }
}

impl Default for ImmediateWorkRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkRunner for ImmediateWorkRunner {
    fn post(&self, work: Work) {
        if self.disposed.load(Ordering::Acquire) {
            tracing::trace!("dropping work posted to a disposed immediate runner");
            return;
        }
        self.queue.lock().push_back(work);
        self.drain();
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let discarded = core::mem::take(&mut *self.queue.lock());
        if !discarded.is_empty() {
            tracing::warn!(
                outstanding = discarded.len(),
                "disposing immediate runner with outstanding tasks"
            );
        }
        drop(discarded);
    }
}
