//! Random workload generation for depcoord tests, benches, and the CLI
//! harness.

pub mod generator;

pub use generator::{
    generate_mult_workloads, generate_single_workload, PieceSpec, TxnSpec, Workload,
    WorkloadParams, WorkloadPieces, WORKLOAD_ROOT_KIND,
};
