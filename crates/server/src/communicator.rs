//! The transport seam between coordinators and schedulers.
//!
//! Real deployments put an RPC stack behind [`Communicator`]; the core
//! only needs request/reply semantics with distinguishable transient
//! failures. [`LocalCommunicator`] is the in-process implementation used
//! by the CLI harness and the integration tests: it drives registered
//! scheduler services directly on the caller's thread.

use std::sync::Arc;

use depcoord_core::command::SimpleCommand;
use depcoord_core::txn::TxnId;
use derive_more::From;
use hashbrown::HashMap;

use crate::scheduler::{CommitReply, DispatchReply, SchedError, Scheduler};

/// A request as carried by the transport.
#[derive(Debug)]
pub enum Request {
    Dispatch(SimpleCommand),
    Commit { tid: TxnId, graph: Vec<u8> },
}

/// The matching reply.
#[derive(Debug)]
pub enum Reply {
    Dispatch(DispatchReply),
    Commit(CommitReply),
}

/// A server-side request handler, as produced by a frame's
/// `create_services`.
pub trait Service: Send + Sync {
    /// # Errors
    ///
    /// Whatever the underlying scheduler reports.
    fn handle(&self, req: Request) -> Result<Reply, SchedError>;
}

/// Dispatches transport requests onto a scheduler.
pub struct SchedulerService {
    sched: Arc<dyn Scheduler>,
}

impl SchedulerService {
    #[must_use]
    pub fn new(sched: Arc<dyn Scheduler>) -> Self {
        Self { sched }
    }
}

impl Service for SchedulerService {
    fn handle(&self, req: Request) -> Result<Reply, SchedError> {
        match req {
            Request::Dispatch(cmd) => self.sched.dispatch(cmd).map(Reply::Dispatch),
            Request::Commit { tid, graph } => self.sched.commit(tid, &graph).map(Reply::Commit),
        }
    }
}

#[derive(Debug, From)]
pub enum CommoError {
    /// No service registered for the partition, or the send failed in
    /// transit. Retried by the coordinator.
    Unreachable { partition: u32 },
    /// The service answered with the wrong reply kind.
    UnexpectedReply { partition: u32 },
    /// The remote scheduler reported an error.
    #[from]
    Remote(SchedError),
}

/// Request/reply transport toward the scheduler of a partition.
pub trait Communicator: Send + Sync {
    /// # Errors
    ///
    /// [`CommoError::Unreachable`] for transient transport failures,
    /// [`CommoError::Remote`] for scheduler-reported errors.
    fn dispatch(&self, partition: u32, cmd: SimpleCommand) -> Result<DispatchReply, CommoError>;

    /// # Errors
    ///
    /// Same surface as [`dispatch`](Communicator::dispatch).
    fn commit(&self, partition: u32, tid: TxnId, graph: &[u8]) -> Result<CommitReply, CommoError>;
}

/// In-process communicator over a table of registered services.
#[derive(Default)]
pub struct LocalCommunicator {
    services: HashMap<u32, Arc<dyn Service>>,
}

impl LocalCommunicator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, partition: u32, service: Arc<dyn Service>) {
        let prev = self.services.insert(partition, service);
        assert!(prev.is_none(), "partition {partition} registered twice");
    }

    fn service(&self, partition: u32) -> Result<&Arc<dyn Service>, CommoError> {
        self.services
            .get(&partition)
            .ok_or(CommoError::Unreachable { partition })
    }
}

impl Communicator for LocalCommunicator {
    fn dispatch(&self, partition: u32, cmd: SimpleCommand) -> Result<DispatchReply, CommoError> {
        match self.service(partition)?.handle(Request::Dispatch(cmd))? {
            Reply::Dispatch(reply) => Ok(reply),
            Reply::Commit(_) => Err(CommoError::UnexpectedReply { partition }),
        }
    }

    fn commit(&self, partition: u32, tid: TxnId, graph: &[u8]) -> Result<CommitReply, CommoError> {
        let req = Request::Commit {
            tid,
            graph: graph.to_vec(),
        };
        match self.service(partition)?.handle(req)? {
            Reply::Commit(reply) => Ok(reply),
            Reply::Dispatch(_) => Err(CommoError::UnexpectedReply { partition }),
        }
    }
}
