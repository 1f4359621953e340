//! In-process multi-shard harness.
//!
//! Wires one scheduler per partition to a frame-created communicator, so
//! tests and the CLI can run whole transactions without a transport
//! stack.

use std::sync::Arc;

use depcoord_core::command::PieceRegistry;
use hashbrown::HashMap;

use crate::communicator::{Communicator, Service};
use crate::coordinator::Coordinator;
use crate::frame::Frame;
use crate::scheduler::Scheduler;

pub struct LocalCluster {
    frame: Arc<dyn Frame>,
    commo: Arc<dyn Communicator>,
    schedulers: Vec<Arc<dyn Scheduler>>,
}

impl LocalCluster {
    #[must_use]
    pub fn new(frame: Arc<dyn Frame>, partitions: u32, pieces: Arc<dyn PieceRegistry>) -> Self {
        let schedulers: Vec<Arc<dyn Scheduler>> = (0..partitions)
            .map(|partition| frame.create_scheduler(partition, Arc::clone(&pieces)))
            .collect();

        let mut services: HashMap<u32, Arc<dyn Service>> = HashMap::new();
        for sched in &schedulers {
            for service in frame.create_services(Arc::clone(sched)) {
                let prev = services.insert(sched.partition(), service);
                assert!(prev.is_none(), "one service per partition");
            }
        }
        let commo = frame.create_communicator(services);

        tracing::debug!(partitions, frame = frame.name(), "local cluster up");
        Self {
            frame,
            commo,
            schedulers,
        }
    }

    #[must_use]
    pub fn coordinator(&self, coo_id: u32) -> Box<dyn Coordinator> {
        self.frame
            .create_coordinator(coo_id, Arc::clone(&self.commo))
    }

    #[must_use]
    pub fn communicator(&self) -> Arc<dyn Communicator> {
        Arc::clone(&self.commo)
    }

    #[must_use]
    pub fn scheduler(&self, partition: u32) -> &Arc<dyn Scheduler> {
        &self.schedulers[partition as usize]
    }

    #[must_use]
    pub fn partitions(&self) -> u32 {
        u32::try_from(self.schedulers.len()).expect("partition count fits u32")
    }

    /// Per-shard execution logs, indexed by partition.
    #[must_use]
    pub fn execution_logs(&self) -> Vec<Vec<depcoord_core::txn::TxnId>> {
        self.schedulers.iter().map(|s| s.execution_log()).collect()
    }
}
