//! The coordination runtime.
//!
//! One [`Runtime`] per peer ties the transport, the local shard, the work
//! pool and the withdrawal protocol together. Rank 0 owns the store in this
//! topology: its callers short-circuit to the local shard, every other peer
//! serializes its operation and ships it over; `eval` instead targets a
//! balancer-chosen worker peer.
//!
//! The receive loop is a single thread turning incoming messages into work
//! items; responses travel on the dedicated ack channel, correlated by a
//! sender-chosen id the handler echoes back.

pub mod options;
mod work;

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::balance::{Balancer, RoundRobinBalancer};
use crate::error::{Error, Result};
use crate::pool::{WorkPool, WorkQueue};
use crate::query::Query;
use crate::store::Store;
use crate::transport::{AckId, Concurrency, Rank, Tag, Transport};
use crate::tuple::Tuple;
use crate::wire;

pub use options::Options;

use work::{WorkContext, WorkItem};

/// Rank of the store-owning coordinator.
const OWNER: Rank = 0;

////////////////////////////////////////////////////////////////////////////////
// Core
////////////////////////////////////////////////////////////////////////////////

/// Shared innards of a runtime: everything the six primitives and the work
/// handlers touch. Held by the [`Runtime`], by every pool worker and by
/// [`RuntimeHandle`]s.
pub(crate) struct Core {
    transport: Arc<dyn Transport>,
    store: Store,
    balancer: Option<Box<dyn Balancer>>,
    options: Options,
    ack_source: AtomicU32,
    terminated: AtomicBool,
}

impl Core {
    #[inline]
    pub(crate) fn rank(&self) -> Rank {
        self.transport.rank()
    }

    #[inline]
    pub(crate) fn world_size(&self) -> usize {
        self.transport.world_size()
    }

    #[inline]
    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    #[inline]
    fn terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    fn next_ack(&self) -> AckId {
        self.ack_source.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn handle(self: &Arc<Self>) -> RuntimeHandle {
        RuntimeHandle {
            core: Arc::clone(self),
        }
    }

    /// Send a response on the ack channel; failures are logged, not fatal.
    pub(crate) fn ack(&self, to: Rank, ack: AckId, payload: Vec<u8>) {
        if let Err(error) = self.transport.send_ack(to, ack, payload) {
            log::error!("ack {ack} to rank {to} failed: {error}");
        }
    }

    /// Vote into the withdrawal reduction and poll it within the configured
    /// budget. An incomplete reduction fails closed.
    pub(crate) fn vote_commit(&self, vote: bool) -> bool {
        let mut handle = match self.transport.start_vote(vote) {
            Ok(handle) => handle,
            Err(error) => {
                log::error!("withdrawal vote failed to start: {error}");
                return false;
            }
        };
        for attempt in 0..self.options.vote_poll_attempts {
            if let Some(consensus) = handle.test() {
                return consensus;
            }
            if attempt + 1 < self.options.vote_poll_attempts {
                std::thread::sleep(self.options.vote_poll_interval);
            }
        }
        log::warn!(
            "withdrawal vote incomplete after {} poll(s); failing closed",
            self.options.vote_poll_attempts,
        );
        false
    }

    ////////////////////////////////////////////////////////////////////////
    // the six primitives
    ////////////////////////////////////////////////////////////////////////

    fn out(&self, tuple: Tuple) -> Result<()> {
        if self.terminated() {
            return Err(Error::Terminated);
        }
        log::debug!("out {tuple}");
        if self.rank() == OWNER {
            self.store.insert(tuple);
            return Ok(());
        }
        let payload = wire::encode_frame(0, &tuple);
        self.transport.send(OWNER, Tag::Insert, payload)
    }

    fn in_(&self, query: &Query) -> Tuple {
        if self.rank() == OWNER {
            return self.store.remove(query);
        }
        loop {
            assert!(
                !self.terminated(),
                "blocking `in` on a terminated runtime"
            );
            match self.remote_round(Tag::Delete, query) {
                // an absent ack means the withdrawal round failed closed
                // under contention; run a fresh round
                Ok(Some(tuple)) => return tuple,
                Ok(None) => continue,
                Err(error) => panic!("in {}: {error}", query.type_signature()),
            }
        }
    }

    fn inp(&self, query: &Query) -> Option<Tuple> {
        if self.terminated() {
            return None;
        }
        if self.rank() == OWNER {
            return self.store.try_remove(query);
        }
        self.remote_round(Tag::TryDelete, query)
            .unwrap_or_else(|error| {
                log::error!("inp {}: {error}", query.type_signature());
                None
            })
    }

    fn rd(&self, query: &Query) -> Tuple {
        if self.rank() == OWNER {
            return self.store.read(query);
        }
        assert!(!self.terminated(), "blocking `rd` on a terminated runtime");
        match self.remote_round(Tag::Search, query) {
            Ok(Some(tuple)) => tuple,
            // the owner side blocks until a match exists, so an ack is
            // always a hit
            Ok(None) => panic!("rd {}: empty ack", query.type_signature()),
            Err(error) => panic!("rd {}: {error}", query.type_signature()),
        }
    }

    fn rdp(&self, query: &Query) -> Option<Tuple> {
        if self.terminated() {
            return None;
        }
        if self.rank() == OWNER {
            return self.store.try_read(query);
        }
        self.remote_round(Tag::TrySearch, query)
            .unwrap_or_else(|error| {
                log::error!("rdp {}: {error}", query.type_signature());
                None
            })
    }

    fn eval(&self, call_tuple: Tuple) -> Result<()> {
        if self.terminated() {
            return Err(Error::Terminated);
        }
        let target = match &self.balancer {
            Some(balancer) => balancer.send_to_rank(&call_tuple),
            // single-peer world: the job loops back through our own pool
            None => self.rank(),
        };
        log::debug!("eval {call_tuple} on rank {target}");
        let ack = self.next_ack();
        self.transport
            .send(target, Tag::Eval, wire::encode_frame(ack, &call_tuple))?;
        // the ack designates receipt; the call itself completes behind an
        // `out` of the result tuple
        self.transport.recv_ack(target, ack)?;
        Ok(())
    }

    /// One request/response round against the owner: send the representing
    /// tuple, block for the correlated ack, decode an optional result.
    fn remote_round(&self, tag: Tag, query: &Query) -> Result<Option<Tuple>> {
        let ack = self.next_ack();
        let payload = wire::encode_frame(ack, &query.representing_tuple());
        self.transport.send(OWNER, tag, payload)?;
        let response = self.transport.recv_ack(OWNER, ack)?;
        if response.is_empty() {
            return Ok(None);
        }
        Ok(Some(wire::deserialize(&response)?))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Runtime
////////////////////////////////////////////////////////////////////////////////

/// A peer of the tuple space.
///
/// Dropping the runtime shuts it down: a terminate message to itself stops
/// the receive loop, the store aborts its waiters, and the pool is joined.
pub struct Runtime {
    core: Arc<Core>,
    pool: Option<WorkPool<WorkItem>>,
    receiver: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Bring up a peer with round-robin eval balancing.
    pub fn new(transport: Arc<dyn Transport>, options: Options) -> Result<Self> {
        let balancer: Option<Box<dyn Balancer>> = if transport.world_size() > 1 {
            Some(Box::new(RoundRobinBalancer::new(transport.world_size())))
        } else {
            None
        };
        Self::with_balancer(transport, options, balancer)
    }

    /// Bring up a peer with an explicit balancer (`None` only makes sense in
    /// a single-peer world).
    pub fn with_balancer(
        transport: Arc<dyn Transport>,
        options: Options,
        balancer: Option<Box<dyn Balancer>>,
    ) -> Result<Self> {
        if transport.concurrency() != Concurrency::Multiple {
            return Err(Error::UnsupportedConcurrency);
        }
        let core = Arc::new(Core {
            transport,
            store: Store::new(),
            balancer,
            options: options.clone(),
            ack_source: AtomicU32::new(1),
            terminated: AtomicBool::new(false),
        });
        let pool = WorkPool::new(
            options.worker_threads,
            WorkContext {
                core: Arc::clone(&core),
            },
        )?;
        let receiver = {
            let core = Arc::clone(&core);
            let queue = pool.queue();
            std::thread::Builder::new()
                .name(format!("linda-recv-{}", core.rank()))
                .spawn(move || receive_loop(&core, &queue))?
        };
        log::debug!(
            "runtime up: rank {} of {}, {} worker(s)",
            core.rank(),
            core.world_size(),
            pool.worker_count(),
        );
        Ok(Self {
            core,
            pool: Some(pool),
            receiver: Some(receiver),
        })
    }

    #[inline]
    pub fn rank(&self) -> Rank {
        self.core.rank()
    }

    #[inline]
    pub fn world_size(&self) -> usize {
        self.core.world_size()
    }

    /// The local shard. Populated on the owner only in this topology.
    pub fn store(&self) -> &Store {
        self.core.store()
    }

    /// A cheap clonable handle onto the same peer.
    pub fn handle(&self) -> RuntimeHandle {
        self.core.handle()
    }

    /// Insert a tuple into the space.
    pub fn out(&self, tuple: Tuple) -> Result<()> {
        self.core.out(tuple)
    }

    /// Blocking destructive match. Suspends until a matching tuple exists
    /// and this peer wins its withdrawal.
    pub fn in_(&self, query: &Query) -> Tuple {
        self.core.in_(query)
    }

    /// Non-blocking destructive match.
    pub fn inp(&self, query: &Query) -> Option<Tuple> {
        self.core.inp(query)
    }

    /// Blocking non-destructive match.
    pub fn rd(&self, query: &Query) -> Tuple {
        self.core.rd(query)
    }

    /// Non-blocking non-destructive match.
    pub fn rdp(&self, query: &Query) -> Option<Tuple> {
        self.core.rdp(query)
    }

    /// Ship a call tuple to a worker peer. Returns once the worker has
    /// acknowledged receipt; the result arrives later as an `out` of a tuple
    /// led by the result key.
    pub fn eval(&self, call_tuple: Tuple) -> Result<()> {
        self.core.eval(call_tuple)
    }

    /// Orderly shutdown. Equivalent to dropping the runtime, but explicit at
    /// call sites that care about ordering.
    pub fn shutdown(self) {
        drop(self);
    }

    fn shutdown_impl(&mut self) {
        if self.core.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("runtime rank {} shutting down", self.rank());
        if let Err(error) = self
            .core
            .transport
            .send(self.core.rank(), Tag::Terminate, Vec::new())
        {
            log::error!("terminate send failed: {error}");
        }
        if let Some(receiver) = self.receiver.take() {
            if receiver.join().is_err() {
                log::error!("receive thread panicked");
            }
        }
        // wake and abort store waiters before joining their threads
        self.core.store.terminate();
        if let Some(pool) = self.pool.take() {
            pool.terminate();
            drop(pool);
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown_impl();
    }
}

fn receive_loop(core: &Arc<Core>, queue: &WorkQueue<WorkItem>) {
    loop {
        let envelope = match core.transport.recv_any() {
            Ok(envelope) => envelope,
            Err(error) => {
                log::error!("receive loop stopping: {error}");
                break;
            }
        };
        log::trace!(
            "rank {} received {} from {}",
            core.rank(),
            envelope.tag,
            envelope.source,
        );
        if envelope.tag == Tag::Terminate {
            break;
        }
        if let Some(item) = WorkItem::from_envelope(envelope) {
            queue.enqueue(item);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// RuntimeHandle / current
////////////////////////////////////////////////////////////////////////////////

/// Clonable handle over a live [`Runtime`], exposing the same primitives.
///
/// Functions invoked through `eval` receive their hosting peer via
/// [`current`], which hands out one of these.
#[derive(Clone)]
pub struct RuntimeHandle {
    core: Arc<Core>,
}

impl RuntimeHandle {
    #[inline]
    pub fn rank(&self) -> Rank {
        self.core.rank()
    }

    #[inline]
    pub fn world_size(&self) -> usize {
        self.core.world_size()
    }

    pub fn out(&self, tuple: Tuple) -> Result<()> {
        self.core.out(tuple)
    }

    pub fn in_(&self, query: &Query) -> Tuple {
        self.core.in_(query)
    }

    pub fn inp(&self, query: &Query) -> Option<Tuple> {
        self.core.inp(query)
    }

    pub fn rd(&self, query: &Query) -> Tuple {
        self.core.rd(query)
    }

    pub fn rdp(&self, query: &Query) -> Option<Tuple> {
        self.core.rdp(query)
    }

    pub fn eval(&self, call_tuple: Tuple) -> Result<()> {
        self.core.eval(call_tuple)
    }
}

thread_local! {
    static CURRENT: RefCell<Option<RuntimeHandle>> = const { RefCell::new(None) };
}

/// The runtime hosting the current `eval` execution.
///
/// # Panics
/// Outside of an eval'd function, where no runtime is bound to the thread.
pub fn current() -> RuntimeHandle {
    CURRENT
        .with(|slot| slot.borrow().clone())
        .expect("no runtime bound to this thread; `current` serves eval'd functions")
}

pub(crate) struct CurrentGuard {
    previous: Option<RuntimeHandle>,
}

pub(crate) fn bind_current(handle: RuntimeHandle) -> CurrentGuard {
    let previous = CURRENT.with(|slot| slot.borrow_mut().replace(handle));
    CurrentGuard { previous }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|slot| *slot.borrow_mut() = previous);
    }
}
