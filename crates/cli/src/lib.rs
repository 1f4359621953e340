//! depcoord CLI -- generate transaction workloads and run them through an
//! in-process cluster.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "depcoord",
    about = "Dependency-graph coordination for distributed transactions"
)]
pub struct App {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate random transaction workloads
    Generate(GenerateArgs),
    /// Run a workload through an in-process cluster and print the
    /// per-shard execution order
    Run(RunArgs),
    /// Run a workload several times and verify the shard execution
    /// orders agree across runs
    CheckDeterminism(CheckDeterminismArgs),
    /// List the registered protocol frames
    Modes,
}

#[derive(Debug, Parser)]
pub struct GenerateArgs {
    /// Number of workloads to generate
    #[arg(long)]
    pub n_wload: u64,
    /// Number of transactions per workload
    #[arg(long)]
    pub n_txn: u64,
    /// Number of partitions
    #[arg(long)]
    pub n_partition: u32,
    /// Number of keys per partition
    #[arg(long)]
    pub n_key: u64,
    /// Number of pieces per transaction
    #[arg(long)]
    pub n_piece: u32,
    /// Number of row accesses per piece
    #[arg(long)]
    pub n_access: u32,
    /// Output directory for generated workload files
    #[arg(long)]
    pub output_dir: PathBuf,
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Workload JSON file to execute
    #[arg(long)]
    pub input: PathBuf,
    /// Protocol frame alias (e.g. "janus", "brq", "baroque")
    #[arg(long, default_value = "janus")]
    pub frame: String,
}

#[derive(Debug, Parser)]
pub struct CheckDeterminismArgs {
    /// Workload JSON file to execute
    #[arg(long)]
    pub input: PathBuf,
    /// Protocol frame alias
    #[arg(long, default_value = "janus")]
    pub frame: String,
    /// Number of identical runs to compare
    #[arg(long, default_value_t = 3)]
    pub rounds: u32,
}
