//! The command hierarchy dispatched from coordinators to shards.
//!
//! A transaction is broken into pieces; each piece travels as a
//! [`SimpleCommand`] addressed to the partition that owns its rows. The
//! wire layout of every field is normative and lives in [`crate::codec`].

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use crate::txn::{RowAccess, TxnId};

/// Encoding a command whose input map reaches this many entries is a
/// checked precondition failure; nothing legitimate carries inputs this
/// large.
pub const MAX_INPUT_ENTRIES: usize = 10_000;

/// A primitive wire value.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F64(f64),
    Str(String),
}

impl Value {
    #[must_use]
    pub const fn tag(&self) -> u8 {
        match self {
            Self::I32(_) => 0,
            Self::I64(_) => 1,
            Self::F64(_) => 2,
            Self::Str(_) => 3,
        }
    }
}

/// Identity and routing header shared by every command.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ContainerCommand {
    pub id: u64,
    pub kind: i32,
    /// Piece index within the owning transaction.
    pub inn_id: i32,
    /// Id of the owning transaction.
    pub root_id: TxnId,
    pub root_kind: i32,
}

/// A dispatchable piece: the container header plus its payload maps and
/// routing metadata.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SimpleCommand {
    pub head: ContainerCommand,
    pub input: BTreeMap<i32, Value>,
    pub output: BTreeMap<i32, Value>,
    pub output_size: i32,
    pub partition_id: i32,
    pub timestamp: i64,
}

impl SimpleCommand {
    #[must_use]
    pub fn new(head: ContainerCommand, partition_id: i32) -> Self {
        Self {
            head,
            partition_id,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn root_id(&self) -> TxnId {
        self.head.root_id
    }

    #[must_use]
    pub const fn inn_id(&self) -> i32 {
        self.head.inn_id
    }
}

/// Resolves a piece to the row accesses it performs.
///
/// The registry is how the scheduler learns what a command touches
/// without interpreting the payload itself: protocol deployments register
/// their piece definitions once at startup. `None` means the piece is
/// unknown, and the transaction is rejected back to the client.
pub trait PieceRegistry: Send + Sync {
    fn accesses(&self, cmd: &SimpleCommand) -> Option<Vec<RowAccess>>;
}
