//! The per-transaction client-side driver.
//!
//! A coordinator runs one transaction at a time through the state machine
//! `Init -> Dispatching -> WaitingDeps -> Committing -> Done`: it
//! broadcasts the pieces in parallel to the partitions that own them,
//! merges every participant's returned subgraph into an accumulator,
//! marks the transaction decided, and broadcasts the commit message
//! carrying the merged graph. Transient send failures retransmit to that
//! participant only; the merge is idempotent by construction (vertices
//! union, edge masks OR), so duplicate deliveries are harmless.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use depcoord_core::codec::{self, decode_graph, encode_graph};
use depcoord_core::command::SimpleCommand;
use depcoord_core::graph::depgraph::DepGraph;
use depcoord_core::txn::{TxnId, TxnInfo, TxnStatus};
use derive_more::From;

use crate::communicator::{CommoError, Communicator};
use crate::scheduler::SchedError;

/// How many times a send to one participant is retried before the
/// transaction is handed back to the caller. Stands in for the outer
/// deadline a real deployment supplies.
pub const DEFAULT_MAX_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordState {
    Init,
    Dispatching,
    WaitingDeps,
    Committing,
    Done,
}

/// A transaction as submitted by a client: its id and the pieces to run,
/// each already routed to a partition.
#[derive(Debug, Clone)]
pub struct TxnRequest {
    pub tid: TxnId,
    pub pieces: Vec<SimpleCommand>,
}

/// Outcome of a committed transaction.
#[derive(Debug)]
pub struct TxnResult {
    pub tid: TxnId,
    pub participants: Vec<u32>,
    /// Commit acks received; always at least a quorum.
    pub acks: usize,
    /// Transactions participants executed while applying this commit.
    pub executed: Vec<TxnId>,
}

#[derive(Debug, From)]
pub enum CoordError {
    /// The protocol rejected a piece; the transaction is aborted and the
    /// client must not retry it as-is.
    Aborted { tid: TxnId },
    /// A participant stayed unreachable past the retry budget.
    Deadline { partition: u32, attempts: usize },
    /// Fewer than a quorum of participants acknowledged the commit.
    NoQuorum { acks: usize, needed: usize },
    /// A participant reply did not decode.
    #[from]
    Codec(codec::Error),
}

pub trait Coordinator: Send {
    /// Drive one transaction to completion.
    ///
    /// # Errors
    ///
    /// [`CoordError::Aborted`] for protocol rejections,
    /// [`CoordError::Deadline`] when a participant stays unreachable, and
    /// codec errors for undecodable replies.
    fn submit(&mut self, req: TxnRequest) -> Result<TxnResult, CoordError>;

    fn state(&self) -> CoordState;
}

/// Coordinator of the Janus-style dependency-graph protocol.
pub struct JanusCoordinator {
    coo_id: u32,
    commo: Arc<dyn Communicator>,
    max_attempts: usize,
    state: CoordState,
}

impl JanusCoordinator {
    #[must_use]
    pub fn new(coo_id: u32, commo: Arc<dyn Communicator>) -> Self {
        Self {
            coo_id,
            commo,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            state: CoordState::Init,
        }
    }

    #[must_use]
    pub const fn coo_id(&self) -> u32 {
        self.coo_id
    }

    pub fn set_max_attempts(&mut self, attempts: usize) {
        self.max_attempts = attempts;
    }

    /// Retry `send` against one participant until it succeeds, the
    /// protocol rejects, or the attempt budget runs out.
    fn send_with_retry<R>(
        &self,
        tid: TxnId,
        partition: u32,
        send: impl Fn() -> Result<R, CommoError>,
    ) -> Result<R, CoordError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match send() {
                Ok(reply) => return Ok(reply),
                Err(CommoError::Remote(SchedError::Rejected { tid, .. })) => {
                    return Err(CoordError::Aborted { tid });
                }
                Err(err) => {
                    tracing::warn!(
                        coo_id = self.coo_id,
                        tid,
                        partition,
                        attempts,
                        ?err,
                        "participant send failed"
                    );
                    if attempts >= self.max_attempts {
                        return Err(CoordError::Deadline {
                            partition,
                            attempts,
                        });
                    }
                }
            }
        }
    }
}

impl Coordinator for JanusCoordinator {
    fn submit(&mut self, req: TxnRequest) -> Result<TxnResult, CoordError> {
        let tid = req.tid;
        let participants: BTreeSet<u32> = req
            .pieces
            .iter()
            .map(|p| u32::try_from(p.partition_id).expect("partition ids are small"))
            .collect();
        tracing::debug!(
            coo_id = self.coo_id,
            tid,
            pieces = req.pieces.len(),
            participants = participants.len(),
            "transaction submitted"
        );

        self.state = CoordState::Dispatching;
        let this = &*self;
        let replies: Vec<Result<Vec<u8>, CoordError>> = thread::scope(|scope| {
            let workers: Vec<_> = req
                .pieces
                .iter()
                .map(|piece| {
                    scope.spawn(move || {
                        let partition =
                            u32::try_from(piece.partition_id).expect("partition ids are small");
                        this.send_with_retry(tid, partition, || {
                            this.commo.dispatch(partition, piece.clone())
                        })
                        .map(|reply| reply.graph)
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|w| w.join().expect("dispatch worker panicked"))
                .collect()
        });

        // Merge every participant's view of the dependencies.
        let mut accumulator: DepGraph<TxnInfo> = DepGraph::new();
        for reply in replies {
            let remote = decode_graph(&mut reply?.as_slice())?;
            accumulator.aggregate(&remote, false);
        }
        self.state = CoordState::WaitingDeps;

        // All participants answered: decide and broadcast the merged view.
        let v = accumulator.find_or_create(tid);
        accumulator
            .vertex_mut(v)
            .data
            .advance_status(TxnStatus::Decided);
        for &partition in &participants {
            accumulator.vertex_mut(v).data.add_partition(partition);
        }

        self.state = CoordState::Committing;
        let mut commit_msg = Vec::new();
        encode_graph(&accumulator, &mut commit_msg)?;

        let quorum = participants.len() / 2 + 1;
        let mut acks = 0;
        let mut executed: BTreeSet<TxnId> = BTreeSet::new();
        for &partition in &participants {
            match self.send_with_retry(tid, partition, || {
                self.commo.commit(partition, tid, &commit_msg)
            }) {
                Ok(reply) => {
                    acks += 1;
                    executed.extend(reply.executed);
                }
                Err(err @ CoordError::Aborted { .. }) => return Err(err),
                Err(err) => {
                    tracing::warn!(coo_id = self.coo_id, tid, partition, ?err, "commit not acked");
                }
            }
        }
        if acks < quorum {
            return Err(CoordError::NoQuorum {
                acks,
                needed: quorum,
            });
        }

        self.state = CoordState::Done;
        tracing::debug!(coo_id = self.coo_id, tid, acks, "transaction committed");
        Ok(TxnResult {
            tid,
            participants: participants.into_iter().collect(),
            acks,
            executed: executed.into_iter().collect(),
        })
    }

    fn state(&self) -> CoordState {
        self.state
    }
}
