//! Per-shard scheduling: conflict detection, graph maintenance, and the
//! closed-component execution loop.
//!
//! A scheduler owns the authoritative [`DepGraph`] of its shard. Every
//! graph-mutating path -- piece ingest, commit aggregation, component
//! analysis, execution -- serializes on one mutex, which is what makes an
//! executed component atomic with respect to every other component on the
//! shard. A condvar is signalled whenever aggregation touches vertices,
//! so callers blocked in [`JanusScheduler::wait_executed`] wake up as the
//! graph moves.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use depcoord_core::codec::{self, decode_graph, encode_subgraph};
use depcoord_core::command::{PieceRegistry, SimpleCommand, Value};
use depcoord_core::graph::depgraph::DepGraph;
use depcoord_core::txn::{AccessMode, DTxn, ExecPhase, RowAccess, TxnId, TxnInfo, TxnStatus};
use derive_more::From;
use hashbrown::{HashMap, HashSet};

/// Errors a scheduler reports back over the wire.
#[derive(Debug, From)]
pub enum SchedError {
    /// Conflict detection cannot satisfy this piece; the transaction is
    /// aborted to the client and not retried.
    Rejected { tid: TxnId, inn_id: i32 },
    /// The request carried an undecodable graph or command.
    #[from]
    Codec(codec::Error),
}

/// Reply to a dispatched piece: the piece's vertex plus its direct
/// predecessors, as observed by this shard, in wire form.
#[derive(Debug)]
pub struct DispatchReply {
    pub graph: Vec<u8>,
}

/// Acknowledgement of a commit message, listing the transactions this
/// shard executed while advancing.
#[derive(Debug)]
pub struct CommitReply {
    pub executed: Vec<TxnId>,
}

/// Executes a piece once its component's turn has come.
pub trait Executor: Send + Sync {
    fn execute(&self, cmd: &SimpleCommand) -> BTreeMap<i32, Value>;
}

/// Default executor: a piece's output is its input. Stands in for a real
/// storage-backed executor, which deployments supply through their frame.
#[derive(Debug, Default)]
pub struct EchoExecutor;

impl Executor for EchoExecutor {
    fn execute(&self, cmd: &SimpleCommand) -> BTreeMap<i32, Value> {
        cmd.input.clone()
    }
}

/// Unexecuted accessors per row key, in arrival order.
pub type RowTracks = HashMap<String, Vec<(TxnId, AccessMode)>>;

/// A conflict one piece induces against a resident transaction: the
/// relation bit becomes (or widens) the edge `tid -> piece's txn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub tid: TxnId,
    pub key: String,
    pub relation: u8,
}

/// The server-side contract every protocol scheduler implements.
pub trait Scheduler: Send + Sync {
    fn partition(&self) -> u32;

    /// Ingest one piece: record conflicts, grow the graph, and reply with
    /// the induced local subgraph.
    ///
    /// # Errors
    ///
    /// [`SchedError::Rejected`] when the piece is unknown to the
    /// registry; codec errors when the reply cannot be encoded.
    fn dispatch(&self, cmd: SimpleCommand) -> Result<DispatchReply, SchedError>;

    /// Ingest a commit message carrying the coordinator's merged graph,
    /// then execute every component that became fully decided.
    ///
    /// # Errors
    ///
    /// Codec errors when `graph` does not decode.
    fn commit(&self, tid: TxnId, graph: &[u8]) -> Result<CommitReply, SchedError>;

    /// Extension point for protocol variants: the conflict set induced by
    /// `dtxn`'s piece `inn_id` against the resident accesses in `tracks`,
    /// or `None` when it cannot be produced synchronously (the piece is
    /// unknown and the transaction is rejected). [`dispatch`] applies
    /// exactly what this returns as graph edges, so swapping the
    /// detection swaps the edges it builds.
    ///
    /// [`dispatch`]: Scheduler::dispatch
    fn handle_conflicts(
        &self,
        dtxn: &DTxn,
        inn_id: i32,
        tracks: &RowTracks,
    ) -> Option<Vec<Conflict>>;

    /// The shard's execution log, in commit order.
    fn execution_log(&self) -> Vec<TxnId>;
}

struct ShardCore {
    graph: DepGraph<TxnInfo>,
    dtxns: HashMap<TxnId, DTxn>,
    tracks: RowTracks,
    executed: Vec<TxnId>,
}

/// The dependency-graph scheduler of the Janus-style protocol.
pub struct JanusScheduler {
    partition: u32,
    pieces: Arc<dyn PieceRegistry>,
    executor: Box<dyn Executor>,
    core: Mutex<ShardCore>,
    ready: Condvar,
}

impl JanusScheduler {
    #[must_use]
    pub fn new(
        partition: u32,
        pieces: Arc<dyn PieceRegistry>,
        executor: Box<dyn Executor>,
    ) -> Self {
        Self {
            partition,
            pieces,
            executor,
            core: Mutex::new(ShardCore {
                graph: DepGraph::new(),
                dtxns: HashMap::new(),
                tracks: RowTracks::new(),
                executed: Vec::new(),
            }),
            ready: Condvar::new(),
        }
    }

    /// Execution phase of a resident transaction's shell.
    #[must_use]
    pub fn dtxn_phase(&self, tid: TxnId) -> Option<ExecPhase> {
        let core = self.core.lock().expect("scheduler lock poisoned");
        core.dtxns.get(&tid).map(|dtxn| dtxn.phase)
    }

    /// Block until `tid` has executed on this shard, or `timeout` passes.
    pub fn wait_executed(&self, tid: TxnId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut core = self.core.lock().expect("scheduler lock poisoned");
        loop {
            let done = core
                .graph
                .find(tid)
                .is_some_and(|v| core.graph.vertex(v).data.status() == TxnStatus::Executed);
            if done {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .ready
                .wait_timeout(core, deadline - now)
                .expect("scheduler lock poisoned");
            core = guard;
        }
    }

    fn execute_txn(&self, core: &mut ShardCore, tid: TxnId) {
        if let Some(dtxn) = core.dtxns.get_mut(&tid) {
            dtxn.phase = ExecPhase::Executing;
            let outputs: Vec<(i32, BTreeMap<i32, Value>)> = dtxn
                .pieces()
                .iter()
                .map(|piece| (piece.inn_id(), self.executor.execute(piece)))
                .collect();
            for (inn_id, output) in outputs {
                dtxn.record_output(inn_id, output);
            }
            dtxn.phase = ExecPhase::Finished;
        }
        for track in core.tracks.values_mut() {
            track.retain(|&(t, _)| t != tid);
        }
    }

    /// Execute every strongly connected component whose members are all
    /// decided, in the deterministic intra-component order. Loops until a
    /// full pass makes no progress, since executing one component can
    /// close another.
    fn advance(&self, core: &mut ShardCore) -> Vec<TxnId> {
        let mut newly = Vec::new();
        loop {
            let mut progressed = false;

            let mut candidates: Vec<_> = core
                .graph
                .iter()
                .filter(|(_, v)| v.data.status() == TxnStatus::Decided)
                .map(|(i, _)| i)
                .collect();
            candidates.sort_unstable_by_key(|&v| core.graph.id_of(v));

            for v in candidates {
                if core.graph.vertex(v).data.status() != TxnStatus::Decided {
                    continue;
                }
                let scc = core.graph.find_scc(v);
                let closed = scc
                    .iter()
                    .all(|&m| core.graph.vertex(m).data.status() >= TxnStatus::Decided);
                if !closed {
                    continue;
                }

                let order = core.graph.find_sorted_scc(v);
                tracing::debug!(
                    partition = self.partition,
                    component = order.len(),
                    "executing closed component"
                );
                for m in order {
                    if core.graph.vertex(m).data.status() == TxnStatus::Executed {
                        continue;
                    }
                    let tid = core.graph.id_of(m);
                    self.execute_txn(core, tid);
                    core.graph
                        .vertex_mut(m)
                        .data
                        .advance_status(TxnStatus::Executed);
                    core.executed.push(tid);
                    newly.push(tid);
                }
                progressed = true;
            }

            if !progressed {
                return newly;
            }
        }
    }
}

impl Scheduler for JanusScheduler {
    fn partition(&self) -> u32 {
        self.partition
    }

    fn dispatch(&self, cmd: SimpleCommand) -> Result<DispatchReply, SchedError> {
        let tid = cmd.root_id();
        let inn_id = cmd.inn_id();
        let Some(accesses) = self.pieces.accesses(&cmd) else {
            tracing::warn!(partition = self.partition, tid, inn_id, "piece rejected");
            return Err(SchedError::Rejected { tid, inn_id });
        };

        let mut core = self.core.lock().expect("scheduler lock poisoned");

        let dtxn = core
            .dtxns
            .entry(tid)
            .or_insert_with(|| DTxn::new(0, tid, false));
        let first_delivery = dtxn.pieces().iter().all(|p| p.inn_id() != inn_id);
        if first_delivery {
            dtxn.add_piece(cmd);
        }

        // Conflict detection is delegated to the extension point; the
        // edges built below are exactly what it reports.
        let dtxn = core.dtxns.get(&tid).expect("resident transaction");
        let Some(conflicts) = self.handle_conflicts(dtxn, inn_id, &core.tracks) else {
            return Err(SchedError::Rejected { tid, inn_id });
        };

        let vertex = core.graph.find_or_create(tid);
        core.graph.vertex_mut(vertex).data.add_partition(self.partition);
        for conflict in &conflicts {
            let prior = core.graph.find_or_create(conflict.tid);
            core.graph.or_edge(prior, vertex, conflict.relation);
        }
        if first_delivery {
            for access in &accesses {
                core.tracks
                    .entry(access.key.clone())
                    .or_default()
                    .push((tid, access.mode));
            }
        }
        tracing::debug!(
            partition = self.partition,
            tid,
            inn_id,
            conflicts = conflicts.len(),
            "piece dispatched"
        );

        // Reply with the piece's vertex and its direct predecessors.
        let mut ret_set: HashSet<u64> = HashSet::new();
        ret_set.insert(tid);
        core.graph.traverse_pred(vertex, 0, &mut |p| {
            ret_set.insert(core.graph.id_of(p));
            true
        });

        let mut graph = Vec::new();
        encode_subgraph(&core.graph, &ret_set, &mut graph)?;
        Ok(DispatchReply { graph })
    }

    fn commit(&self, tid: TxnId, graph: &[u8]) -> Result<CommitReply, SchedError> {
        let remote: DepGraph<TxnInfo> = decode_graph(&mut &*graph)?;

        let mut core = self.core.lock().expect("scheduler lock poisoned");
        let touched = core.graph.aggregate(&remote, true);
        for v in touched {
            core.graph.vertex_mut(v).data.clear_touched();
        }
        if let Some(v) = core.graph.find(tid) {
            core.graph
                .vertex_mut(v)
                .data
                .advance_status(TxnStatus::Decided);
        }

        let executed = self.advance(&mut core);
        tracing::debug!(
            partition = self.partition,
            tid,
            executed = executed.len(),
            "commit applied"
        );
        drop(core);
        self.ready.notify_all();
        Ok(CommitReply { executed })
    }

    fn handle_conflicts(
        &self,
        dtxn: &DTxn,
        inn_id: i32,
        tracks: &RowTracks,
    ) -> Option<Vec<Conflict>> {
        let piece = dtxn.pieces().iter().find(|p| p.inn_id() == inn_id)?;
        let accesses = self.pieces.accesses(piece)?;

        let mut conflicts = Vec::new();
        for access in &accesses {
            let Some(track) = tracks.get(&access.key) else {
                continue;
            };
            for &(prior_tid, prior_mode) in track {
                if prior_tid == dtxn.tid() {
                    continue;
                }
                let prior = RowAccess {
                    key: access.key.clone(),
                    mode: prior_mode,
                };
                if let Some(relation) = prior.conflict_with(access) {
                    conflicts.push(Conflict {
                        tid: prior_tid,
                        key: access.key.clone(),
                        relation,
                    });
                }
            }
        }
        Some(conflicts)
    }

    fn execution_log(&self) -> Vec<TxnId> {
        self.core
            .lock()
            .expect("scheduler lock poisoned")
            .executed
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depcoord_core::command::ContainerCommand;

    /// Registry for tests: input entries with non-negative keys are read
    /// row keys, negative keys are write row keys.
    struct KeyedPieces;

    impl PieceRegistry for KeyedPieces {
        fn accesses(&self, cmd: &SimpleCommand) -> Option<Vec<RowAccess>> {
            if cmd.head.root_kind < 0 {
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

    fn piece(tid: TxnId, inn_id: i32, reads: &[&str], writes: &[&str]) -> SimpleCommand {
        let mut cmd = SimpleCommand::new(
            ContainerCommand {
                id: tid * 10 + u64::try_from(inn_id).unwrap(),
                kind: 0,
                inn_id,
                root_id: tid,
                root_kind: 0,
            },
            0,
        );
        for (i, key) in reads.iter().enumerate() {
            cmd.input
                .insert(i32::try_from(i).unwrap(), Value::Str((*key).into()));
        }
        for (i, key) in writes.iter().enumerate() {
            let slot = -i32::try_from(i + 1).unwrap();
            cmd.input.insert(slot, Value::Str((*key).into()));
        }
        cmd
    }

    fn scheduler() -> JanusScheduler {
        JanusScheduler::new(0, Arc::new(KeyedPieces), Box::new(EchoExecutor))
    }

    fn commit_graph(sched: &JanusScheduler, tid: TxnId) -> Vec<u8> {
        // Build the commit message the coordinator would send: the
        // dispatch reply graph with the root marked decided.
        let reply = sched
            .dispatch(piece(tid, 0, &[], &[]))
            .expect("empty piece dispatches");
        let mut graph: DepGraph<TxnInfo> =
            decode_graph(&mut reply.graph.as_slice()).expect("reply decodes");
        let v = graph.find(tid).expect("root vertex in reply");
        graph
            .vertex_mut(v)
            .data
            .advance_status(TxnStatus::Decided);
        let mut buf = Vec::new();
        depcoord_core::codec::encode_graph(&graph, &mut buf).expect("graph encodes");
        buf
    }

    #[test]
    fn conflicting_pieces_grow_edges() {
        let sched = scheduler();
        sched.dispatch(piece(1, 0, &[], &["x"])).unwrap();
        let reply = sched.dispatch(piece(2, 0, &["x"], &[])).unwrap();

        let graph: DepGraph<TxnInfo> = decode_graph(&mut reply.graph.as_slice()).unwrap();
        assert_eq!(graph.len(), 2, "reply holds the vertex and its predecessor");
        let (a, b) = (graph.find(1).unwrap(), graph.find(2).unwrap());
        assert_eq!(graph.edge(a, b), Some(depcoord_core::graph::depgraph::RW));
    }

    #[test]
    fn unknown_piece_is_rejected() {
        let sched = scheduler();
        let mut cmd = piece(1, 0, &[], &[]);
        cmd.head.root_kind = -1;
        assert!(matches!(
            sched.dispatch(cmd),
            Err(SchedError::Rejected { tid: 1, inn_id: 0 })
        ));
    }

    #[test]
    fn commit_executes_exactly_once() {
        let sched = scheduler();
        sched.dispatch(piece(7, 0, &[], &["k"])).unwrap();
        assert_eq!(sched.dtxn_phase(7), Some(ExecPhase::Pending));
        let msg = commit_graph(&sched, 7);

        let first = sched.commit(7, &msg).unwrap();
        assert_eq!(first.executed, vec![7]);
        assert_eq!(
            sched.dtxn_phase(7),
            Some(ExecPhase::Finished),
            "the shell moved through its phases while the component ran"
        );

        let second = sched.commit(7, &msg).unwrap();
        assert!(second.executed.is_empty(), "a vertex executes at most once");
        assert_eq!(sched.execution_log(), vec![7]);
        assert_eq!(sched.dtxn_phase(7), Some(ExecPhase::Finished));
    }

    #[test]
    fn commit_waits_for_undecided_component_members() {
        use depcoord_core::graph::depgraph::{RW, WW};

        let sched = scheduler();
        // Locally 1 precedes 2 on x; another shard observed the reverse
        // write-write order, so the merged commit graph carries a cycle.
        sched.dispatch(piece(1, 0, &[], &["x"])).unwrap();
        sched.dispatch(piece(2, 0, &["x"], &["x"])).unwrap();

        let remote_view = |decided: &[TxnId]| {
            let mut g: DepGraph<TxnInfo> = DepGraph::new();
            let a = g.find_or_create(1);
            let b = g.find_or_create(2);
            g.add_edge(a, b, WW | RW);
            g.add_edge(b, a, WW);
            for &tid in decided {
                let v = g.find(tid).unwrap();
                g.vertex_mut(v).data.advance_status(TxnStatus::Decided);
            }
            let mut buf = Vec::new();
            depcoord_core::codec::encode_graph(&g, &mut buf).unwrap();
            buf
        };

        let reply = sched.commit(1, &remote_view(&[1])).unwrap();
        assert!(
            reply.executed.is_empty(),
            "component stays open while 2 is undecided"
        );

        let reply = sched.commit(2, &remote_view(&[1, 2])).unwrap();
        assert_eq!(reply.executed, vec![1, 2], "closing the component runs it all");
        assert_eq!(sched.execution_log(), vec![1, 2]);
        assert_eq!(sched.dtxn_phase(1), Some(ExecPhase::Finished));
        assert_eq!(sched.dtxn_phase(2), Some(ExecPhase::Finished));
    }

    #[test]
    fn handle_conflicts_reports_resident_conflicts() {
        use depcoord_core::graph::depgraph::RW;

        let sched = scheduler();

        let mut dtxn = DTxn::new(0, 2, false);
        dtxn.add_piece(piece(2, 0, &["x"], &["y"]));

        let mut tracks = RowTracks::new();
        tracks
            .entry(String::from("x"))
            .or_default()
            .push((1, AccessMode::Write));
        tracks
            .entry(String::from("y"))
            .or_default()
            .push((2, AccessMode::Write));

        let conflicts = sched
            .handle_conflicts(&dtxn, 0, &tracks)
            .expect("piece is resident");
        assert_eq!(
            conflicts,
            vec![Conflict {
                tid: 1,
                key: String::from("x"),
                relation: RW,
            }],
            "own accesses never conflict with themselves"
        );

        assert_eq!(sched.handle_conflicts(&dtxn, 9, &tracks), None, "unknown piece");
    }

    #[test]
    fn wait_executed_times_out_then_succeeds() {
        let sched = Arc::new(scheduler());
        sched.dispatch(piece(3, 0, &[], &["z"])).unwrap();
        assert!(!sched.wait_executed(3, Duration::from_millis(10)));

        let msg = commit_graph(&sched, 3);
        let waiter = {
            let sched = Arc::clone(&sched);
            std::thread::spawn(move || sched.wait_executed(3, Duration::from_secs(5)))
        };
        sched.commit(3, &msg).unwrap();
        assert!(waiter.join().unwrap());
    }
}
