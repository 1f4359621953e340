use std::sync::Arc;
use std::{fs, process};

use clap::Parser;
use depcoord_cli::{App, CheckDeterminismArgs, Command, GenerateArgs, RunArgs};
use depcoord_core::txn::TxnId;
use depcoord_server::cluster::LocalCluster;
use depcoord_server::coordinator::{Coordinator, TxnRequest};
use depcoord_server::frame::{default_registry, Frame};
use depcoord_testgen::{generate_mult_workloads, Workload, WorkloadPieces};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let app = App::parse();
    match &app.command {
        Command::Generate(args) => generate(args),
        Command::Run(args) => run(args),
        Command::CheckDeterminism(args) => check_determinism(args),
        Command::Modes => modes(),
    }
}

fn generate(args: &GenerateArgs) {
    fs::create_dir_all(&args.output_dir).unwrap_or_else(|e| {
        eprintln!("Failed to create output directory: {e}");
        process::exit(1);
    });

    let workloads = generate_mult_workloads(
        args.n_wload,
        args.n_txn,
        args.n_partition,
        args.n_key,
        args.n_piece,
        args.n_access,
    );

    for workload in &workloads {
        let path = args.output_dir.join(format!("{}.json", workload.get_id()));
        let file = fs::File::create(&path).unwrap_or_else(|e| {
            eprintln!("Failed to create {}: {e}", path.display());
            process::exit(1);
        });
        serde_json::to_writer_pretty(file, workload).unwrap_or_else(|e| {
            eprintln!("Failed to write {}: {e}", path.display());
            process::exit(1);
        });
    }

    println!(
        "Generated {} workloads to {}",
        workloads.len(),
        args.output_dir.display()
    );
}

fn load_workload(path: &std::path::Path) -> Workload {
    let file = fs::File::open(path).unwrap_or_else(|e| {
        eprintln!("Failed to open {}: {e}", path.display());
        process::exit(1);
    });
    serde_json::from_reader(file).unwrap_or_else(|e| {
        eprintln!("Failed to parse {}: {e}", path.display());
        process::exit(1);
    })
}

fn frame_by_alias(alias: &str) -> Arc<dyn Frame> {
    default_registry().find_by_alias(alias).unwrap_or_else(|| {
        eprintln!("Unknown frame alias {alias:?}; try `depcoord modes`");
        process::exit(1);
    })
}

fn execute_workload(workload: &Workload, frame: &Arc<dyn Frame>) -> Vec<Vec<TxnId>> {
    let cluster = LocalCluster::new(
        Arc::clone(frame),
        workload.get_params().n_partition,
        Arc::new(WorkloadPieces),
    );
    let mut coord = cluster.coordinator(0);

    for spec in workload.get_data() {
        let req = TxnRequest {
            tid: spec.tid,
            pieces: spec.commands(),
        };
        coord.submit(req).unwrap_or_else(|e| {
            eprintln!("Transaction {} failed: {e:?}", spec.tid);
            process::exit(1);
        });
    }
    cluster.execution_logs()
}

fn run(args: &RunArgs) {
    let workload = load_workload(&args.input);
    let frame = frame_by_alias(&args.frame);

    let logs = execute_workload(&workload, &frame);
    for (partition, log) in logs.iter().enumerate() {
        let order: Vec<String> = log.iter().map(ToString::to_string).collect();
        println!("partition {partition}: [{}]", order.join(", "));
    }
}

fn check_determinism(args: &CheckDeterminismArgs) {
    let workload = load_workload(&args.input);
    let frame = frame_by_alias(&args.frame);

    let reference = execute_workload(&workload, &frame);
    for round in 1..args.rounds {
        let logs = execute_workload(&workload, &frame);
        if logs != reference {
            println!("{}: FAIL (round {round} diverged)", args.input.display());
            process::exit(1);
        }
    }
    println!(
        "{}: PASS ({} identical runs)",
        args.input.display(),
        args.rounds
    );
}

fn modes() {
    let registry = default_registry();
    for mode in registry.modes() {
        let frame = registry.find(mode).expect("listed mode resolves");
        println!("{mode}: {}", frame.name());
    }
}
