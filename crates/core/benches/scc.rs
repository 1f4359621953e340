use criterion::{black_box, criterion_group, criterion_main, Criterion};
use depcoord_core::graph::depgraph::{DepGraph, RW, WW};
use depcoord_core::txn::TxnInfo;

/// Build a graph of `rings` disjoint components, each a cycle of
/// `ring_size` transactions: consecutive members conflict write-write,
/// and every member read-depends on the next-but-one, so the type-2
/// subgraph stays acyclic inside each component.
fn build_graph(rings: u64, ring_size: u64) -> DepGraph<TxnInfo> {
    let mut g = DepGraph::new();
    for ring in 0..rings {
        let base = ring * ring_size;
        for i in 0..ring_size {
            let u = g.find_or_create(base + i);
            let v = g.find_or_create(base + (i + 1) % ring_size);
            g.or_edge(u, v, WW);
            if i + 1 < ring_size {
                let w = g.find_or_create(base + i + 1);
                let anchor = g.find_or_create(base);
                g.or_edge(anchor, w, RW);
            }
        }
    }
    g
}

fn bench_scc(c: &mut Criterion) {
    let small = build_graph(4, 8);
    let medium = build_graph(16, 32);
    let large = build_graph(64, 64);

    let mut group = c.benchmark_group("scc");

    for (name, graph) in [("small", &small), ("medium", &medium), ("large", &large)] {
        group.bench_function(format!("all_scc_{name}"), |b| {
            b.iter(|| black_box(graph).all_scc())
        });

        let start = graph.find(0).expect("vertex 0 exists");
        group.bench_function(format!("find_sorted_scc_{name}"), |b| {
            b.iter(|| black_box(graph).find_sorted_scc(black_box(start)))
        });
    }

    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let remote = build_graph(16, 32);

    c.bench_function("aggregate_512_vertices", |b| {
        b.iter(|| {
            let mut local = build_graph(8, 32);
            local.aggregate(black_box(&remote), true);
            local
        })
    });
}

criterion_group!(benches, bench_scc, bench_aggregate);
criterion_main!(benches);
