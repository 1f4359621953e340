use std::collections::HashMap;

use chrono::{DateTime, Duration, Local};
use depcoord_core::command::{ContainerCommand, PieceRegistry, SimpleCommand, Value};
use depcoord_core::txn::{RowAccess, TxnId};
use rand::distr::{Distribution, Uniform};
use rand::RngExt;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// `root_kind` carried by generated transactions; the piece registry
/// rejects anything else.
pub const WORKLOAD_ROOT_KIND: i32 = 1;

#[derive(Clone, Debug, Default, Deserialize, Serialize, TypedBuilder)]
pub struct WorkloadParams {
    pub id: u64,
    pub n_txn: u64,
    pub n_partition: u32,
    pub n_key: u64,
    pub n_piece: u32,
    pub n_access: u32,
}

/// One row access of a generated piece.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PieceSpec {
    pub partition: u32,
    pub reads: Vec<String>,
    pub writes: Vec<String>,
}

/// One generated transaction.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TxnSpec {
    pub tid: TxnId,
    pub pieces: Vec<PieceSpec>,
}

impl TxnSpec {
    /// The wire commands for this transaction, one per piece, using the
    /// workload input convention: non-negative input slots carry read
    /// keys, negative slots carry write keys.
    #[must_use]
    pub fn commands(&self) -> Vec<SimpleCommand> {
        self.pieces
            .iter()
            .enumerate()
            .map(|(inn, piece)| {
                let inn_id = i32::try_from(inn).expect("piece count fits i32");
                let mut cmd = SimpleCommand::new(
                    ContainerCommand {
                        id: self.tid * 1_000 + u64::try_from(inn).expect("piece index"),
                        kind: 0,
                        inn_id,
                        root_id: self.tid,
                        root_kind: WORKLOAD_ROOT_KIND,
                    },
                    i32::try_from(piece.partition).expect("partition fits i32"),
                );
                for (slot, key) in piece.reads.iter().enumerate() {
                    let slot = i32::try_from(slot).expect("read count fits i32");
                    cmd.input.insert(slot, Value::Str(key.clone()));
                }
                for (slot, key) in piece.writes.iter().enumerate() {
                    let slot = -i32::try_from(slot + 1).expect("write count fits i32");
                    cmd.input.insert(slot, Value::Str(key.clone()));
                }
                cmd
            })
            .collect()
    }
}

/// A batch of generated transactions plus its provenance.
#[derive(Deserialize, Serialize, Debug)]
pub struct Workload {
    params: WorkloadParams,
    info: String,
    start: DateTime<Local>,
    end: DateTime<Local>,
    data: Vec<TxnSpec>,
}

impl Workload {
    #[must_use]
    pub const fn new(
        params: WorkloadParams,
        info: String,
        start: DateTime<Local>,
        end: DateTime<Local>,
        data: Vec<TxnSpec>,
    ) -> Self {
        Self {
            params,
            info,
            start,
            end,
            data,
        }
    }

    #[must_use]
    pub const fn get_id(&self) -> u64 {
        self.params.id
    }

    #[must_use]
    pub const fn get_data(&self) -> &Vec<TxnSpec> {
        &self.data
    }

    #[must_use]
    pub const fn get_params(&self) -> &WorkloadParams {
        &self.params
    }

    #[must_use]
    pub fn get_duration(&self) -> Duration {
        self.end - self.start
    }
}

/// The [`PieceRegistry`] for generated workloads: decodes the input-slot
/// convention produced by [`TxnSpec::commands`].
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkloadPieces;

impl PieceRegistry for WorkloadPieces {
    fn accesses(&self, cmd: &SimpleCommand) -> Option<Vec<RowAccess>> {
        if cmd.head.root_kind != WORKLOAD_ROOT_KIND {
            return None;
        }
        Some(
            cmd.input
                .iter()
                .filter_map(|(&slot, value)| {
                    let Value::Str(key) = value else { return None };
                    Some(if slot < 0 {
                        RowAccess::write(key.clone())
                    } else {
                        RowAccess::read(key.clone())
                    })
                })
                .collect(),
        )
    }
}

/// Generate a single workload of `n_txn` transactions.
///
/// Each transaction has `n_piece` pieces, each routed to a random
/// partition; a piece makes `n_access` accesses over that partition's
/// keyspace (`p{partition}:k{index}`), each a read or a write with equal
/// probability. Keys never cross partitions, so a piece's conflicts are
/// always visible to the scheduler that executes it.
///
/// Transaction ids start at 1 and are dense.
///
/// # Panics
///
/// Panics if `n_key` or `n_partition` is zero.
#[must_use]
pub fn generate_single_workload(
    n_txn: u64,
    n_partition: u32,
    n_key: u64,
    n_piece: u32,
    n_access: u32,
) -> Vec<TxnSpec> {
    let mut random_generator = rand::rng();
    let partition_range = Uniform::new(0, n_partition).unwrap();
    let key_range = Uniform::new(0, n_key).unwrap();

    (1..=n_txn)
        .map(|tid| {
            let pieces = (0..n_piece)
                .map(|_| {
                    let partition = partition_range.sample(&mut random_generator);
                    let mut reads = Vec::new();
                    let mut writes = Vec::new();
                    for _ in 0..n_access {
                        let key = format!("p{partition}:k{}", key_range.sample(&mut random_generator));
                        if random_generator.random::<bool>() {
                            reads.push(key);
                        } else {
                            writes.push(key);
                        }
                    }
                    PieceSpec {
                        partition,
                        reads,
                        writes,
                    }
                })
                .collect();
            TxnSpec { tid, pieces }
        })
        .collect()
}

/// Generate `n_workload` independent workloads in parallel.
#[must_use]
pub fn generate_mult_workloads(
    n_workload: u64,
    n_txn: u64,
    n_partition: u32,
    n_key: u64,
    n_piece: u32,
    n_access: u32,
) -> Vec<Workload> {
    (0..n_workload)
        .into_par_iter()
        .map(|id| {
            let start = Local::now();
            let data = generate_single_workload(n_txn, n_partition, n_key, n_piece, n_access);
            let end = Local::now();
            Workload {
                params: WorkloadParams {
                    id,
                    n_txn,
                    n_partition,
                    n_key,
                    n_piece,
                    n_access,
                },
                info: "generated".to_string(),
                start,
                end,
                data,
            }
        })
        .collect()
}

/// Count the transactions that touch each partition; handy for sizing
/// assertions in tests.
#[must_use]
pub fn partition_histogram(specs: &[TxnSpec]) -> HashMap<u32, u64> {
    let mut histogram = HashMap::new();
    for spec in specs {
        let mut seen: Vec<u32> = spec.pieces.iter().map(|p| p.partition).collect();
        seen.sort_unstable();
        seen.dedup();
        for partition in seen {
            *histogram.entry(partition).or_default() += 1;
        }
    }
    histogram
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_dense_from_one() {
        let specs = generate_single_workload(10, 2, 4, 2, 3);
        let tids: Vec<TxnId> = specs.iter().map(|s| s.tid).collect();
        assert_eq!(tids, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn keys_stay_inside_their_partition() {
        let specs = generate_single_workload(20, 3, 5, 2, 4);
        for spec in &specs {
            for piece in &spec.pieces {
                for key in piece.reads.iter().chain(&piece.writes) {
                    assert!(key.starts_with(&format!("p{}:", piece.partition)));
                }
            }
        }
    }

    #[test]
    fn commands_roundtrip_through_the_registry() {
        let spec = TxnSpec {
            tid: 3,
            pieces: vec![PieceSpec {
                partition: 1,
                reads: vec!["p1:k0".into()],
                writes: vec!["p1:k2".into()],
            }],
        };

        let cmds = spec.commands();
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].root_id(), 3);
        assert_eq!(cmds[0].partition_id, 1);

        let accesses = WorkloadPieces.accesses(&cmds[0]).expect("known piece");
        assert_eq!(accesses.len(), 2);
        assert!(accesses.iter().any(|a| a.key == "p1:k0"));
        assert!(accesses.iter().any(|a| a.key == "p1:k2"));

        let mut unknown = cmds[0].clone();
        unknown.head.root_kind = 9;
        assert!(WorkloadPieces.accesses(&unknown).is_none());
    }
}
