//! The per-node worker pool.
//!
//! A fixed set of worker threads drains one shared [`WorkQueue`]; every
//! dequeued item knows how to perform itself against the thread's context.
//! The pool does not know anything about the runtime; the context type is
//! the seam.

mod queue;

pub use queue::WorkQueue;

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::Result;

/// A unit of work executed on a pool thread.
pub trait Work: Send + 'static {
    type Context: Clone + Send + 'static;

    fn perform(self, ctx: &Self::Context);
}

////////////////////////////////////////////////////////////////////////////////
// WorkPool
////////////////////////////////////////////////////////////////////////////////

/// Fixed-size thread pool over a [`WorkQueue`].
///
/// Dropping the pool blocks until termination has been signalled, joins
/// every worker, and drains whatever was still queued without executing it.
#[derive(Debug)]
pub struct WorkPool<W: Work> {
    queue: Arc<WorkQueue<W>>,
    threads: Vec<JoinHandle<()>>,
}

impl<W: Work> WorkPool<W> {
    /// Spawn `size` workers, each owning a clone of `ctx`.
    pub fn new(size: usize, ctx: W::Context) -> Result<Self> {
        let queue = Arc::new(WorkQueue::<W>::new());
        let mut threads = Vec::with_capacity(size);
        for worker in 0..size {
            let queue = Arc::clone(&queue);
            let ctx = ctx.clone();
            let thread = std::thread::Builder::new()
                .name(format!("linda-worker-{worker}"))
                .spawn(move || {
                    while let Ok(work) = queue.dequeue() {
                        work.perform(&ctx);
                    }
                    log::trace!("worker {worker} leaving the pool");
                })?;
            threads.push(thread);
        }
        Ok(Self { queue, threads })
    }

    /// Shared handle for producers (the receive loop).
    pub fn queue(&self) -> Arc<WorkQueue<W>> {
        Arc::clone(&self.queue)
    }

    pub fn enqueue(&self, work: W) {
        self.queue.enqueue(work);
    }

    pub fn terminate(&self) {
        self.queue.terminate();
    }

    pub fn worker_count(&self) -> usize {
        self.threads.len()
    }
}

impl<W: Work> Drop for WorkPool<W> {
    fn drop(&mut self) {
        self.queue.await_terminated();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                log::error!("work pool thread panicked");
            }
        }
        let leftover = self.queue.drain();
        if !leftover.is_empty() {
            log::debug!("dropping {} unexecuted work item(s)", leftover.len());
        }
    }
}
