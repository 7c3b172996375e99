//! In-process mesh transport.
//!
//! [`LocalMesh::new`] builds the whole fixed peer set at once; every node is
//! a cheap handle onto shared per-peer mailboxes. Delivery is ordered and
//! reliable by construction (a mutexed deque per peer), sends never block,
//! and the reduce board matches votes by per-member round sequence: the
//! n-th vote of every member lands in round n, exactly like a sequence of
//! collective calls on a communicator.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{Error, Result};

use super::{AckId, Concurrency, Envelope, Rank, ReduceHandle, Tag, Transport};

#[derive(Debug)]
struct AckSlot {
    from: Rank,
    ack: AckId,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct Mailbox {
    inbox: Mutex<VecDeque<Envelope>>,
    arrived: Condvar,
    acks: Mutex<Vec<AckSlot>>,
    ack_arrived: Condvar,
}

#[derive(Debug, Default)]
struct Round {
    conjunction: bool,
    votes: usize,
    retrieved: usize,
}

#[derive(Debug, Default)]
struct ReduceBoard {
    rounds: Mutex<HashMap<u64, Round>>,
}

#[derive(Debug)]
struct Shared {
    mailboxes: Vec<Mailbox>,
    aux_group: Vec<Rank>,
    board: ReduceBoard,
}

////////////////////////////////////////////////////////////////////////////////
// LocalMesh
////////////////////////////////////////////////////////////////////////////////

/// Factory for a fully connected in-process peer set.
pub struct LocalMesh;

impl LocalMesh {
    /// A mesh whose auxiliary communicator contains only the store owner
    /// (rank 0), the standard single-shard topology.
    pub fn new(world_size: usize) -> Vec<LocalNode> {
        Self::with_aux_group(world_size, &[0])
    }

    /// A mesh with an explicit auxiliary communicator membership.
    pub fn with_aux_group(world_size: usize, aux_group: &[Rank]) -> Vec<LocalNode> {
        assert!(world_size > 0, "a mesh needs at least one peer");
        assert!(
            aux_group.iter().all(|&rank| rank < world_size),
            "aux communicator member out of range"
        );
        let shared = Arc::new(Shared {
            mailboxes: (0..world_size).map(|_| Mailbox::default()).collect(),
            aux_group: aux_group.to_vec(),
            board: ReduceBoard::default(),
        });
        (0..world_size)
            .map(|rank| LocalNode {
                rank,
                shared: Arc::clone(&shared),
                next_round: AtomicU64::new(0),
            })
            .collect()
    }
}

/// One peer's endpoint of a [`LocalMesh`].
#[derive(Debug)]
pub struct LocalNode {
    rank: Rank,
    shared: Arc<Shared>,
    next_round: AtomicU64,
}

impl Transport for LocalNode {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.shared.mailboxes.len()
    }

    fn concurrency(&self) -> Concurrency {
        Concurrency::Multiple
    }

    fn send(&self, to: Rank, tag: Tag, payload: Vec<u8>) -> Result<()> {
        let mailbox = self
            .shared
            .mailboxes
            .get(to)
            .ok_or_else(|| Error::Send(format!("no peer with rank {to}")))?;
        let mut inbox = mailbox.inbox.lock().unwrap();
        inbox.push_back(Envelope {
            source: self.rank,
            tag,
            payload,
        });
        drop(inbox);
        mailbox.arrived.notify_one();
        Ok(())
    }

    fn recv_any(&self) -> Result<Envelope> {
        let mailbox = &self.shared.mailboxes[self.rank];
        let mut inbox = mailbox.inbox.lock().unwrap();
        loop {
            if let Some(envelope) = inbox.pop_front() {
                return Ok(envelope);
            }
            inbox = mailbox.arrived.wait(inbox).unwrap();
        }
    }

    fn send_ack(&self, to: Rank, ack: AckId, payload: Vec<u8>) -> Result<()> {
        let mailbox = self
            .shared
            .mailboxes
            .get(to)
            .ok_or_else(|| Error::Send(format!("no peer with rank {to}")))?;
        let mut acks = mailbox.acks.lock().unwrap();
        acks.push(AckSlot {
            from: self.rank,
            ack,
            payload,
        });
        drop(acks);
        mailbox.ack_arrived.notify_all();
        Ok(())
    }

    fn recv_ack(&self, from: Rank, ack: AckId) -> Result<Vec<u8>> {
        let mailbox = &self.shared.mailboxes[self.rank];
        let mut acks = mailbox.acks.lock().unwrap();
        loop {
            if let Some(at) = acks
                .iter()
                .position(|slot| slot.from == from && slot.ack == ack)
            {
                return Ok(acks.swap_remove(at).payload);
            }
            acks = mailbox.ack_arrived.wait(acks).unwrap();
        }
    }

    fn start_vote(&self, vote: bool) -> Result<Box<dyn ReduceHandle>> {
        if !self.shared.aux_group.contains(&self.rank) {
            return Err(Error::Send(format!(
                "rank {} is not a member of the auxiliary communicator",
                self.rank
            )));
        }
        let round_no = self.next_round.fetch_add(1, Ordering::AcqRel);
        let mut rounds = self.shared.board.rounds.lock().unwrap();
        let round = rounds.entry(round_no).or_insert(Round {
            conjunction: true,
            votes: 0,
            retrieved: 0,
        });
        round.conjunction &= vote;
        round.votes += 1;
        drop(rounds);
        Ok(Box::new(LocalReduceHandle {
            shared: Arc::clone(&self.shared),
            round_no,
            retrieved: false,
        }))
    }
}

struct LocalReduceHandle {
    shared: Arc<Shared>,
    round_no: u64,
    retrieved: bool,
}

impl ReduceHandle for LocalReduceHandle {
    fn test(&mut self) -> Option<bool> {
        let group_size = self.shared.aux_group.len();
        let mut rounds = self.shared.board.rounds.lock().unwrap();
        let round = rounds.get_mut(&self.round_no)?;
        if round.votes < group_size {
            return None;
        }
        let consensus = round.conjunction;
        if !self.retrieved {
            self.retrieved = true;
            round.retrieved += 1;
            // once every member has read the result the round is spent;
            // abandoned handles leave their round parked on the board
            if round.retrieved == group_size {
                rounds.remove(&self.round_no);
            }
        }
        Some(consensus)
    }
}
