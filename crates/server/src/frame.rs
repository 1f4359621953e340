//! Protocol frames and their registry.
//!
//! A frame is the factory bundle for one concurrency-control protocol:
//! everything a deployment instantiates -- coordinators, schedulers,
//! transaction shells, communicators, rows, services, executors -- goes
//! through it, so multiple protocols can share the graph and scheduler
//! machinery. The registry is an explicit value built in `main` and
//! threaded to whoever selects a protocol; there is no process-wide
//! global to race against.

use std::sync::Arc;

use depcoord_core::command::{PieceRegistry, Value};
use depcoord_core::txn::{DTxn, TxnId};
use hashbrown::HashMap;

use crate::communicator::{Communicator, LocalCommunicator, SchedulerService, Service};
use crate::coordinator::{Coordinator, JanusCoordinator};
use crate::row::{Row, Schema, VersionedRow};
use crate::scheduler::{EchoExecutor, Executor, JanusScheduler, Scheduler};

/// Numeric protocol mode id.
pub type Mode = i32;

/// The Janus-style dependency-graph commit protocol.
pub const MODE_JANUS: Mode = 6;

/// Factory bundle for one protocol implementation.
pub trait Frame: Send + Sync {
    fn name(&self) -> &'static str;

    fn create_scheduler(
        &self,
        partition: u32,
        pieces: Arc<dyn PieceRegistry>,
    ) -> Arc<dyn Scheduler>;

    fn create_coordinator(&self, coo_id: u32, commo: Arc<dyn Communicator>)
        -> Box<dyn Coordinator>;

    fn create_dtxn(&self, epoch: u32, tid: TxnId, read_only: bool) -> DTxn;

    fn create_communicator(
        &self,
        services: HashMap<u32, Arc<dyn Service>>,
    ) -> Arc<dyn Communicator>;

    fn create_services(&self, sched: Arc<dyn Scheduler>) -> Vec<Arc<dyn Service>>;

    fn create_row(&self, schema: &Schema, row_data: Vec<Value>) -> Box<dyn Row>;

    fn create_executor(&self) -> Box<dyn Executor>;
}

/// Frame of the Janus-style protocol.
#[derive(Debug, Default)]
pub struct JanusFrame;

impl Frame for JanusFrame {
    fn name(&self) -> &'static str {
        "janus"
    }

    fn create_scheduler(
        &self,
        partition: u32,
        pieces: Arc<dyn PieceRegistry>,
    ) -> Arc<dyn Scheduler> {
        Arc::new(JanusScheduler::new(partition, pieces, self.create_executor()))
    }

    fn create_coordinator(
        &self,
        coo_id: u32,
        commo: Arc<dyn Communicator>,
    ) -> Box<dyn Coordinator> {
        Box::new(JanusCoordinator::new(coo_id, commo))
    }

    fn create_dtxn(&self, epoch: u32, tid: TxnId, read_only: bool) -> DTxn {
        DTxn::new(epoch, tid, read_only)
    }

    fn create_communicator(
        &self,
        services: HashMap<u32, Arc<dyn Service>>,
    ) -> Arc<dyn Communicator> {
        let mut commo = LocalCommunicator::new();
        for (partition, service) in services {
            commo.register(partition, service);
        }
        Arc::new(commo)
    }

    fn create_services(&self, sched: Arc<dyn Scheduler>) -> Vec<Arc<dyn Service>> {
        vec![Arc::new(SchedulerService::new(sched))]
    }

    fn create_row(&self, schema: &Schema, row_data: Vec<Value>) -> Box<dyn Row> {
        Box::new(VersionedRow::create(schema, row_data))
    }

    fn create_executor(&self) -> Box<dyn Executor> {
        Box::new(EchoExecutor)
    }
}

/// Registry of protocol frames, keyed by numeric mode and by alias.
///
/// Built once during startup; duplicate registration of a mode or alias
/// is a hard error.
#[derive(Default)]
pub struct FrameRegistry {
    by_mode: HashMap<Mode, Arc<dyn Frame>>,
    aliases: HashMap<String, Mode>,
}

impl FrameRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    ///
    /// Panics when `mode` or any alias is already registered.
    pub fn register(&mut self, mode: Mode, aliases: &[&str], frame: Arc<dyn Frame>) {
        let prev = self.by_mode.insert(mode, frame);
        assert!(prev.is_none(), "frame mode {mode} registered twice");
        for &alias in aliases {
            let prev = self.aliases.insert(alias.to_owned(), mode);
            assert!(prev.is_none(), "frame alias {alias:?} registered twice");
        }
    }

    #[must_use]
    pub fn find(&self, mode: Mode) -> Option<Arc<dyn Frame>> {
        self.by_mode.get(&mode).cloned()
    }

    #[must_use]
    pub fn find_by_alias(&self, alias: &str) -> Option<Arc<dyn Frame>> {
        self.aliases
            .get(alias)
            .and_then(|mode| self.by_mode.get(mode))
            .cloned()
    }

    #[must_use]
    pub fn modes(&self) -> Vec<Mode> {
        let mut modes: Vec<Mode> = self.by_mode.keys().copied().collect();
        modes.sort_unstable();
        modes
    }
}

/// The registry a stock deployment starts from: the Janus frame under its
/// historical aliases.
#[must_use]
pub fn default_registry() -> FrameRegistry {
    let mut registry = FrameRegistry::new();
    registry.register(MODE_JANUS, &["brq", "baroque", "janus"], Arc::new(JanusFrame));
    registry
}
