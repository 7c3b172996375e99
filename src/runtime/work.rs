//! Work items executed by the pool on behalf of remote peers.
//!
//! The receive loop turns every non-terminate message into one [`WorkItem`];
//! a pool thread later decodes the payload and runs the operation against
//! the local shard. Decode failures are logged and the message dropped:
//! a corrupt message must not take the protocol down.

use crate::error::Error;
use crate::pool::Work;
use crate::query::Query;
use crate::store::Store;
use crate::transport::{AckId, Envelope, Rank, Tag};
use crate::tuple::Tuple;
use crate::value::Value;
use crate::wire;

use std::sync::Arc;

use super::Core;

#[derive(Debug)]
pub(crate) enum WorkItem {
    Insert { payload: Vec<u8> },
    Delete { sender: Rank, payload: Vec<u8> },
    TryDelete { sender: Rank, payload: Vec<u8> },
    Search { sender: Rank, payload: Vec<u8> },
    TrySearch { sender: Rank, payload: Vec<u8> },
    Eval { sender: Rank, payload: Vec<u8> },
}

impl WorkItem {
    /// `None` for tags that never reach the pool.
    pub(crate) fn from_envelope(envelope: Envelope) -> Option<Self> {
        let Envelope {
            source: sender,
            tag,
            payload,
        } = envelope;
        match tag {
            Tag::Insert => Some(Self::Insert { payload }),
            Tag::Delete => Some(Self::Delete { sender, payload }),
            Tag::TryDelete => Some(Self::TryDelete { sender, payload }),
            Tag::Search => Some(Self::Search { sender, payload }),
            Tag::TrySearch => Some(Self::TrySearch { sender, payload }),
            Tag::Eval => Some(Self::Eval { sender, payload }),
            Tag::Terminate => None,
        }
    }
}

/// Per-worker context: a shared handle onto the runtime internals.
#[derive(Clone)]
pub(crate) struct WorkContext {
    pub(crate) core: Arc<Core>,
}

impl Work for WorkItem {
    type Context = WorkContext;

    fn perform(self, ctx: &WorkContext) {
        let core = &ctx.core;
        match self {
            Self::Insert { payload } => match wire::decode_frame(&payload) {
                Ok((_, tuple)) => core.store().insert(tuple),
                Err(error) => log::error!("dropping corrupt insert message: {error}"),
            },
            Self::Delete { sender, payload } => {
                with_query(&payload, "delete", |ack, query| {
                    handle_delete(core, sender, ack, &query);
                });
            }
            Self::TryDelete { sender, payload } => {
                with_query(&payload, "try-delete", |ack, query| {
                    handle_try_delete(core, sender, ack, &query);
                });
            }
            Self::Search { sender, payload } => {
                with_query(&payload, "search", |ack, query| {
                    handle_search(core, sender, ack, &query);
                });
            }
            Self::TrySearch { sender, payload } => {
                with_query(&payload, "try-search", |ack, query| {
                    handle_try_search(core, sender, ack, &query);
                });
            }
            Self::Eval { sender, payload } => match wire::decode_frame(&payload) {
                Ok((ack, tuple)) => handle_eval(core, sender, ack, tuple),
                Err(error) => log::error!("dropping corrupt eval message: {error}"),
            },
        }
    }
}

fn with_query(payload: &[u8], kind: &str, run: impl FnOnce(AckId, Query)) {
    match wire::decode_frame(payload) {
        Ok((ack, representing)) => run(ack, Query::from_representing(&representing)),
        Err(error) => log::error!("dropping corrupt {kind} message: {error}"),
    }
}

////////////////////////////////////////////////////////////////////////////////
// handlers
////////////////////////////////////////////////////////////////////////////////

/// Two-phase distributed withdrawal for a blocking `in`.
///
/// The handler parks until the local shard holds a candidate, takes it out
/// tentatively without waking waiters, and votes the tentative outcome into
/// the boolean-AND reduction of the auxiliary communicator. Only unanimous
/// success commits; dissent and vote timeout both restore the tuple and ack
/// absent, upon which the caller retries a fresh round.
fn handle_delete(core: &Core, sender: Rank, ack: AckId, query: &Query) {
    if core.store().wait_read(query).is_none() {
        // shut down while parked; the caller is being torn down with us
        return;
    }
    run_withdrawal(core, sender, ack, query);
}

/// Single-round two-phase withdrawal for `inp`.
fn handle_try_delete(core: &Core, sender: Rank, ack: AckId, query: &Query) {
    run_withdrawal(core, sender, ack, query);
}

fn run_withdrawal(core: &Core, sender: Rank, ack: AckId, query: &Query) {
    let store: &Store = core.store();
    let tentative = store.remove_nosignal(query);
    log::debug!(
        "withdrawal of {} tentatively {}",
        query.type_signature(),
        if tentative.is_some() { "taken" } else { "missed" },
    );
    let consensus = core.vote_commit(tentative.is_some());
    match (consensus, tentative) {
        (true, Some(tuple)) => {
            core.ack(sender, ack, wire::serialize(&tuple));
        }
        (_, Some(tuple)) => {
            // dissent or timeout: restore the exact prior contents
            store.insert_nosignal(tuple);
            core.ack(sender, ack, Vec::new());
        }
        (_, None) => core.ack(sender, ack, Vec::new()),
    }
}

/// Blocking read: the owner side suspends until a match exists.
fn handle_search(core: &Core, sender: Rank, ack: AckId, query: &Query) {
    if let Some(tuple) = core.store().wait_read(query) {
        core.ack(sender, ack, wire::serialize(&tuple));
    }
}

fn handle_try_search(core: &Core, sender: Rank, ack: AckId, query: &Query) {
    let payload = match core.store().try_read(query) {
        Some(tuple) => wire::serialize(&tuple),
        None => Vec::new(),
    };
    core.ack(sender, ack, payload);
}

/// Run the deferred calls of an eval tuple and inject the result.
fn handle_eval(core: &Arc<Core>, sender: Rank, ack: AckId, call_tuple: Tuple) {
    // the ack designates receipt of the job, not its completion
    core.ack(sender, ack, Vec::new());

    let _bound = super::bind_current(core.handle());
    let result: Tuple = call_tuple
        .iter()
        .map(|value| match value {
            Value::FnCall(call) => call.execute(),
            concrete => concrete.clone(),
        })
        .collect();
    log::debug!("eval produced {result}");
    match core.out(result) {
        Ok(()) | Err(Error::Terminated) => {}
        Err(error) => log::error!("eval result injection failed: {error}"),
    }
}
