//! Runtime half of the depcoord workspace: per-shard schedulers that own
//! the authoritative dependency graph, per-transaction coordinators that
//! collect and merge participant subgraphs, and the frame registry that
//! selects a protocol implementation at startup.
//!
//! The flow between the pieces:
//!
//! 1. A [`Coordinator`] broadcasts a transaction's pieces to the
//!    schedulers of the partitions that own their rows.
//! 2. Each [`Scheduler`] records conflicts against resident transactions
//!    as graph edges and replies with the induced local subgraph.
//! 3. The coordinator merges the replies into an accumulator graph, marks
//!    the transaction decided, and broadcasts the commit message carrying
//!    the merged graph.
//! 4. Receiving schedulers aggregate the graph and execute every strongly
//!    connected component that has become fully decided, in the
//!    deterministic order computed by
//!    [`DepGraph::find_sorted_scc`](depcoord_core::DepGraph::find_sorted_scc).
//!
//! Transports are out of scope: the [`Communicator`] seam has one
//! in-process implementation ([`LocalCommunicator`]) used by tests and
//! the CLI harness.
//!
//! [`Coordinator`]: coordinator::Coordinator
//! [`Scheduler`]: scheduler::Scheduler
//! [`Communicator`]: communicator::Communicator
//! [`LocalCommunicator`]: communicator::LocalCommunicator

pub mod cluster;
pub mod communicator;
pub mod coordinator;
pub mod frame;
pub mod row;
pub mod scheduler;

pub use cluster::LocalCluster;
pub use communicator::{Communicator, LocalCommunicator};
pub use coordinator::{Coordinator, JanusCoordinator, TxnRequest, TxnResult};
pub use frame::{default_registry, Frame, FrameRegistry, JanusFrame, MODE_JANUS};
pub use scheduler::{JanusScheduler, Scheduler};
