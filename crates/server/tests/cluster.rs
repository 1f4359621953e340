//! Whole-protocol runs over the in-process cluster: dispatch, merge,
//! commit, execute, and the cross-run determinism of the execution order.

use std::sync::Arc;

use depcoord_core::txn::TxnId;
use depcoord_server::cluster::LocalCluster;
use depcoord_server::coordinator::{
    CoordError, CoordState, Coordinator, JanusCoordinator, TxnRequest,
};
use depcoord_server::frame::JanusFrame;
use depcoord_server::scheduler::Scheduler;
use depcoord_testgen::{generate_single_workload, TxnSpec, WorkloadPieces};

fn cluster(partitions: u32) -> LocalCluster {
    LocalCluster::new(Arc::new(JanusFrame), partitions, Arc::new(WorkloadPieces))
}

fn request(spec: &TxnSpec) -> TxnRequest {
    TxnRequest {
        tid: spec.tid,
        pieces: spec.commands(),
    }
}

fn spec(tid: TxnId, pieces: &[(u32, &[&str], &[&str])]) -> TxnSpec {
    TxnSpec {
        tid,
        pieces: pieces
            .iter()
            .map(|&(partition, reads, writes)| depcoord_testgen::PieceSpec {
                partition,
                reads: reads.iter().map(|&k| k.to_owned()).collect(),
                writes: writes.iter().map(|&k| k.to_owned()).collect(),
            })
            .collect(),
    }
}

#[test]
fn single_transaction_commits_on_both_shards() {
    let cluster = cluster(2);
    let mut coord = cluster.coordinator(0);

    let txn = spec(1, &[(0, &[], &["p0:a"]), (1, &["p1:b"], &[])]);
    let result = coord.submit(request(&txn)).expect("transaction commits");

    assert_eq!(result.tid, 1);
    assert_eq!(result.participants, vec![0, 1]);
    assert_eq!(result.acks, 2);
    assert_eq!(result.executed, vec![1]);
    assert_eq!(coord.state(), CoordState::Done);

    assert_eq!(cluster.scheduler(0).execution_log(), vec![1]);
    assert_eq!(cluster.scheduler(1).execution_log(), vec![1]);
}

#[test]
fn conflicting_transactions_execute_in_dependency_order() {
    let cluster = cluster(1);
    let mut coord = cluster.coordinator(0);

    for txn in [
        spec(1, &[(0, &[], &["p0:x"])]),
        spec(2, &[(0, &["p0:x"], &["p0:x"])]),
        spec(3, &[(0, &["p0:x"], &[])]),
    ] {
        coord.submit(request(&txn)).expect("commits");
    }

    assert_eq!(
        cluster.scheduler(0).execution_log(),
        vec![1, 2, 3],
        "pieces arrived in submission order, so the graph is a chain"
    );
}

#[test]
fn rejected_piece_aborts_without_retry() {
    let cluster = cluster(1);
    let mut coord = cluster.coordinator(0);

    let txn = spec(4, &[(0, &[], &["p0:x"])]);
    let mut req = request(&txn);
    req.pieces[0].head.root_kind = 99;

    match coord.submit(req) {
        Err(CoordError::Aborted { tid }) => assert_eq!(tid, 4),
        other => panic!("expected abort, got {other:?}"),
    }
    assert!(cluster.scheduler(0).execution_log().is_empty());
}

#[test]
fn unreachable_partition_exhausts_the_retry_budget() {
    let cluster = cluster(1);
    let mut coord = JanusCoordinator::new(0, cluster.communicator());
    coord.set_max_attempts(3);

    // Partition 7 has no scheduler; dispatch retries then gives up.
    let txn = spec(5, &[(7, &[], &["p7:x"])]);
    match coord.submit(request(&txn)) {
        Err(CoordError::Deadline {
            partition,
            attempts,
        }) => {
            assert_eq!(partition, 7);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected deadline, got {other:?}"),
    }
}

#[test]
fn resubmitting_a_committed_transaction_is_idempotent() {
    let cluster = cluster(2);
    let mut coord = cluster.coordinator(0);

    let txn = spec(6, &[(0, &[], &["p0:k"]), (1, &[], &["p1:k"])]);
    coord.submit(request(&txn)).expect("first run commits");
    let second = coord.submit(request(&txn)).expect("retry commits");

    assert!(
        second.executed.is_empty(),
        "nothing re-executes on a duplicate commit"
    );
    assert_eq!(cluster.scheduler(0).execution_log(), vec![6]);
    assert_eq!(cluster.scheduler(1).execution_log(), vec![6]);
}

#[test]
fn identical_runs_produce_identical_execution_logs() {
    let specs = generate_single_workload(40, 3, 6, 2, 3);

    let run = |specs: &[TxnSpec]| -> Vec<Vec<TxnId>> {
        let cluster = cluster(3);
        let mut coord = cluster.coordinator(0);
        for spec in specs {
            coord.submit(request(spec)).expect("workload txn commits");
        }
        cluster.execution_logs()
    };

    let first = run(&specs);
    let second = run(&specs);
    assert_eq!(
        first, second,
        "same submission order must yield the same shard logs"
    );

    // Every submitted transaction executed somewhere.
    let mut all: Vec<TxnId> = first.into_iter().flatten().collect();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all, (1..=40).collect::<Vec<_>>());
}
