//! Per-transaction state carried by graph vertices, and the server-side
//! execution shell.
//!
//! [`TxnInfo`] is the vertex payload: a monotonic status lattice
//! (`Undecided < Decided < Executed`), the set of partitions the
//! transaction touches, and a touch flag raised by graph aggregation so a
//! waiting scheduler can tell which vertices moved. [`DTxn`] holds what a
//! single shard knows about executing one transaction: its pending pieces
//! and their recorded outputs.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::String;
use alloc::vec::Vec;

use hashbrown::HashMap;

use crate::command::{SimpleCommand, Value};
use crate::graph::depgraph::{VertexData, RW, WW};

pub type TxnId = u64;

/// Decision state of a transaction, ordered. Merges take the maximum, so
/// the status never regresses.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TxnStatus {
    #[default]
    Undecided,
    Decided,
    Executed,
}

impl TxnStatus {
    #[must_use]
    pub const fn as_wire(self) -> i32 {
        match self {
            Self::Undecided => 0,
            Self::Decided => 1,
            Self::Executed => 2,
        }
    }

    #[must_use]
    pub const fn from_wire(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Undecided),
            1 => Some(Self::Decided),
            2 => Some(Self::Executed),
            _ => None,
        }
    }
}

/// Vertex payload for a transaction in the dependency graph.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnInfo {
    id: TxnId,
    status: TxnStatus,
    partitions: BTreeSet<u32>,
    touched: bool,
}

impl TxnInfo {
    #[must_use]
    pub const fn new(id: TxnId) -> Self {
        Self {
            id,
            status: TxnStatus::Undecided,
            partitions: BTreeSet::new(),
            touched: false,
        }
    }

    #[must_use]
    pub const fn id(&self) -> TxnId {
        self.id
    }

    #[must_use]
    pub const fn status(&self) -> TxnStatus {
        self.status
    }

    /// Advance the status; a lower status than the current one is ignored.
    pub fn advance_status(&mut self, status: TxnStatus) {
        if status > self.status {
            self.status = status;
        }
    }

    #[must_use]
    pub const fn partitions(&self) -> &BTreeSet<u32> {
        &self.partitions
    }

    pub fn add_partition(&mut self, partition: u32) {
        self.partitions.insert(partition);
    }

    /// Whether the last aggregate touched this vertex. Cleared by the
    /// scheduler once the vertex has been inspected.
    #[must_use]
    pub const fn touched(&self) -> bool {
        self.touched
    }

    pub fn clear_touched(&mut self) {
        self.touched = false;
    }
}

impl VertexData for TxnInfo {
    fn new(id: u64) -> Self {
        Self::new(id)
    }

    fn union_data(&mut self, other: &Self, is_client_view: bool, is_server: bool) {
        tracing::trace!(
            id = self.id,
            ours = ?self.status,
            theirs = ?other.status,
            is_client_view,
            is_server,
            "merging txn info"
        );
        self.advance_status(other.status);
        self.partitions.extend(other.partitions.iter().copied());
    }

    fn trigger(&mut self) {
        self.touched = true;
    }
}

/// How a piece touches a row.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// A single row access performed by a piece; the unit of conflict
/// detection.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowAccess {
    pub key: String,
    pub mode: AccessMode,
}

impl RowAccess {
    #[must_use]
    pub const fn read(key: String) -> Self {
        Self {
            key,
            mode: AccessMode::Read,
        }
    }

    #[must_use]
    pub const fn write(key: String) -> Self {
        Self {
            key,
            mode: AccessMode::Write,
        }
    }

    /// The relation bit contributed by two accesses of the same row, or
    /// `None` when they do not conflict (two reads).
    #[must_use]
    pub fn conflict_with(&self, other: &Self) -> Option<u8> {
        match (self.mode, other.mode) {
            (AccessMode::Write, AccessMode::Write) => Some(WW),
            (AccessMode::Read, AccessMode::Read) => None,
            _ => Some(RW),
        }
    }
}

/// Execution progress of a transaction on one shard.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ExecPhase {
    #[default]
    Pending,
    Executing,
    Finished,
}

/// Server-side execution shell: the pieces a shard holds for one
/// transaction and the outputs produced when the shard executed them.
#[derive(Debug, Clone)]
pub struct DTxn {
    tid: TxnId,
    epoch: u32,
    read_only: bool,
    pieces: Vec<SimpleCommand>,
    outputs: HashMap<i32, BTreeMap<i32, Value>>,
    pub phase: ExecPhase,
}

impl DTxn {
    #[must_use]
    pub fn new(epoch: u32, tid: TxnId, read_only: bool) -> Self {
        Self {
            tid,
            epoch,
            read_only,
            pieces: Vec::new(),
            outputs: HashMap::new(),
            phase: ExecPhase::Pending,
        }
    }

    #[must_use]
    pub const fn tid(&self) -> TxnId {
        self.tid
    }

    #[must_use]
    pub const fn epoch(&self) -> u32 {
        self.epoch
    }

    #[must_use]
    pub const fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn add_piece(&mut self, cmd: SimpleCommand) {
        self.pieces.push(cmd);
    }

    #[must_use]
    pub fn pieces(&self) -> &[SimpleCommand] {
        &self.pieces
    }

    pub fn record_output(&mut self, inn_id: i32, output: BTreeMap<i32, Value>) {
        self.outputs.insert(inn_id, output);
    }

    #[must_use]
    pub fn output(&self, inn_id: i32) -> Option<&BTreeMap<i32, Value>> {
        self.outputs.get(&inn_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_monotonic() {
        let mut info = TxnInfo::new(1);
        info.advance_status(TxnStatus::Decided);
        assert_eq!(info.status(), TxnStatus::Decided);
        info.advance_status(TxnStatus::Undecided);
        assert_eq!(info.status(), TxnStatus::Decided, "status never regresses");
        info.advance_status(TxnStatus::Executed);
        assert_eq!(info.status(), TxnStatus::Executed);
    }

    #[test]
    fn union_data_merges_monotonically() {
        let mut a = TxnInfo::new(1);
        a.add_partition(0);

        let mut b = TxnInfo::new(1);
        b.advance_status(TxnStatus::Decided);
        b.add_partition(2);

        a.union_data(&b, false, true);
        assert_eq!(a.status(), TxnStatus::Decided);
        assert_eq!(
            a.partitions().iter().copied().collect::<Vec<_>>(),
            vec![0, 2]
        );

        // Merging an older view must not undo anything.
        let stale = TxnInfo::new(1);
        a.union_data(&stale, false, true);
        assert_eq!(a.status(), TxnStatus::Decided);
        assert_eq!(a.partitions().len(), 2);
    }

    #[test]
    fn trigger_marks_touched() {
        let mut info = TxnInfo::new(9);
        assert!(!info.touched());
        info.trigger();
        assert!(info.touched());
        info.clear_touched();
        assert!(!info.touched());
    }

    #[test]
    fn conflict_bits() {
        let w = RowAccess::write(String::from("k"));
        let r = RowAccess::read(String::from("k"));
        assert_eq!(w.conflict_with(&w), Some(WW));
        assert_eq!(w.conflict_with(&r), Some(RW));
        assert_eq!(r.conflict_with(&w), Some(RW));
        assert_eq!(r.conflict_with(&r), None);
    }
}
