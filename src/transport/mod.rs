//! The message transport seam.
//!
//! The runtime talks to its peers through the [`Transport`] trait only. An
//! implementation must give ordered, reliable point-to-point messaging with
//! non-blocking sends and a blocking receive, a dedicated ack channel with
//! source/id filtering, and a non-blocking boolean-AND all-reduce over the
//! auxiliary communicator used by the withdrawal protocol.
//!
//! [`local::LocalMesh`] is the in-process implementation used by the test
//! suite and demo setups; an MPI-backed implementation slots in behind the
//! same trait.

pub mod local;

use std::fmt::{self, Display, Formatter};

use crate::error::Result;

/// Peer identifier. Ranks are dense in `[0, world_size)`; rank 0 owns the
/// store shard in the standard topology.
pub type Rank = usize;

/// Sender-chosen ack correlation id, echoed back by the request handler.
pub type AckId = u32;

/// Thread support a transport was initialized with. The runtime requires
/// [`Concurrency::Multiple`]: it sends from worker threads, caller threads
/// and the receive thread concurrently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Concurrency {
    Single,
    Funneled,
    Multiple,
}

/// Message tags of the wire protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
    Insert,
    Delete,
    TryDelete,
    Search,
    TrySearch,
    Eval,
    Terminate,
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Insert => "insert",
            Self::Delete => "delete",
            Self::TryDelete => "try-delete",
            Self::Search => "search",
            Self::TrySearch => "try-search",
            Self::Eval => "eval",
            Self::Terminate => "terminate",
        };
        f.write_str(name)
    }
}

/// One received message.
#[derive(Debug)]
pub struct Envelope {
    pub source: Rank,
    pub tag: Tag,
    pub payload: Vec<u8>,
}

/// Poll handle of an in-flight all-reduce vote.
pub trait ReduceHandle: Send {
    /// `Some(consensus)` once every member of the auxiliary communicator has
    /// voted, `None` while the reduction is still in flight.
    fn test(&mut self) -> Option<bool>;
}

/// Point-to-point plus collective messaging against a fixed peer set.
pub trait Transport: Send + Sync + 'static {
    fn rank(&self) -> Rank;

    fn world_size(&self) -> usize;

    /// The thread support level the transport was brought up with.
    fn concurrency(&self) -> Concurrency;

    /// Non-blocking, ordered, reliable send on the primary channel.
    fn send(&self, to: Rank, tag: Tag, payload: Vec<u8>) -> Result<()>;

    /// Blocking receive of the next primary-channel message from any source.
    fn recv_any(&self) -> Result<Envelope>;

    /// Non-blocking send on the ack channel.
    fn send_ack(&self, to: Rank, ack: AckId, payload: Vec<u8>) -> Result<()>;

    /// Blocking receive on the ack channel, filtered by source and ack id.
    fn recv_ack(&self, from: Rank, ack: AckId) -> Result<Vec<u8>>;

    /// Start a boolean-AND all-reduce over the auxiliary communicator with
    /// this peer's `vote`. Fails if this peer is not a member.
    fn start_vote(&self, vote: bool) -> Result<Box<dyn ReduceHandle>>;
}
