//! Runtime tunables.

use std::num::NonZeroUsize;
use std::time::Duration;

/// Knobs of a [`Runtime`](super::Runtime).
#[derive(Clone, Debug)]
pub struct Options {
    /// Worker threads in the pool. Defaults to the hardware concurrency.
    pub worker_threads: usize,

    /// How many times a withdrawal handler polls its consensus vote before
    /// failing closed.
    pub vote_poll_attempts: u32,

    /// Sleep between two consensus polls.
    pub vote_poll_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(4),
            vote_poll_attempts: 3,
            vote_poll_interval: Duration::from_millis(1),
        }
    }
}

impl Options {
    pub fn with_worker_threads(mut self, count: usize) -> Self {
        assert!(count > 0, "a pool needs at least one worker");
        self.worker_threads = count;
        self
    }

    pub fn with_vote_poll(mut self, attempts: u32, interval: Duration) -> Self {
        self.vote_poll_attempts = attempts;
        self.vote_poll_interval = interval;
        self
    }
}
