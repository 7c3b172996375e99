//! Load balancers.
//!
//! A balancer picks the destination peer for work that any worker peer can
//! serve. Today that is `eval`; in a multi-shard deployment it would also
//! place `out`. Rank 0 owns the store by convention, so balancers select
//! among the non-zero ranks only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::transport::Rank;
use crate::tuple::Tuple;

/// Chooses the destination peer for a tuple. Implementations must return a
/// rank in `[1, world_size)`.
pub trait Balancer: Send + Sync {
    fn send_to_rank(&self, tuple: &Tuple) -> Rank;
}

////////////////////////////////////////////////////////////////////////////////
// RoundRobinBalancer
////////////////////////////////////////////////////////////////////////////////

/// Cycles through the worker ranks, wrapping from `world_size - 1` back
/// to 1.
#[derive(Debug)]
pub struct RoundRobinBalancer {
    next: AtomicUsize,
    world_size: usize,
}

impl RoundRobinBalancer {
    pub fn new(world_size: usize) -> Self {
        debug_assert!(world_size > 1, "round robin needs at least one worker");
        Self {
            next: AtomicUsize::new(1),
            world_size,
        }
    }
}

impl Balancer for RoundRobinBalancer {
    fn send_to_rank(&self, _tuple: &Tuple) -> Rank {
        let mut value = self.next.load(Ordering::Acquire);
        loop {
            let candidate = value + 1;
            let wrapped = if candidate < self.world_size { candidate } else { 1 };
            match self.next.compare_exchange_weak(
                value,
                wrapped,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => return value,
                Err(current) => value = current,
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// UniformRandomBalancer
////////////////////////////////////////////////////////////////////////////////

/// Picks a worker rank uniformly at random from a fresh per-instance PRNG.
#[derive(Debug)]
pub struct UniformRandomBalancer {
    rng: Mutex<StdRng>,
    world_size: usize,
}

impl UniformRandomBalancer {
    pub fn new(world_size: usize) -> Self {
        debug_assert!(world_size > 1, "random balancing needs at least one worker");
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
            world_size,
        }
    }
}

impl Balancer for UniformRandomBalancer {
    fn send_to_rank(&self, _tuple: &Tuple) -> Rank {
        self.rng.lock().unwrap().gen_range(1..self.world_size)
    }
}
