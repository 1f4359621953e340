//! Dependency-graph coordination primitives for distributed transactions.
//!
//! `depcoord_core` is the data plane shared by every replica of a
//! dependency-graph commit protocol: transactions are vertices, conflicts
//! are labelled directed edges, and the commit order inside a strongly
//! connected component is a deterministic linearization computed
//! identically on every replica that holds the same edges.
//!
//! The crate provides:
//!
//! 1. **Graph** -- an arena-backed dependency graph ([`DepGraph`]) with
//!    mirrored incoming/outgoing edge maps, OR-merge aggregation of remote
//!    subgraphs, and bounded predecessor traversal.
//! 2. **SCC engine** -- iterative Tarjan decomposition plus the
//!    deterministic intra-component order ([`DepGraph::find_sorted_scc`])
//!    that drives commit decisions.
//! 3. **Transaction model** -- [`TxnInfo`] vertex payloads with a monotonic
//!    status lattice, and the [`DTxn`] execution shell.
//! 4. **Commands** -- the [`SimpleCommand`] piece hierarchy dispatched to
//!    shards.
//! 5. **Codec** -- the fixed little-endian wire format for commands,
//!    values, and graphs ([`codec`]), including subgraph selection via
//!    [`GraphMarshaler`].
//!
//! Scheduling, coordination, and the protocol frame registry live in the
//! separate `depcoord_server` crate; this crate is `no_std` compatible
//! (requires `alloc`).
//!
//! # Crate features
//!
//! - **`serde`** -- enables `Serialize`/`Deserialize` derives on core types
//!   (commands, transaction metadata). The wire codec never goes through
//!   serde; its byte layout is normative.
//!
//! [`DepGraph`]: graph::depgraph::DepGraph
//! [`DepGraph::find_sorted_scc`]: graph::depgraph::DepGraph::find_sorted_scc
//! [`TxnInfo`]: txn::TxnInfo
//! [`DTxn`]: txn::DTxn
//! [`SimpleCommand`]: command::SimpleCommand
//! [`GraphMarshaler`]: codec::GraphMarshaler

#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub mod codec;
pub mod command;
pub mod graph;
pub mod txn;

pub use command::{ContainerCommand, SimpleCommand, Value};
pub use graph::depgraph::{DepGraph, VertexIdx};
pub use txn::{TxnId, TxnInfo, TxnStatus};
