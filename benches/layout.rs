use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use layerflow::config::Config;
use layerflow::graph::Edge;
use layerflow::layout::{order, rank};
use layerflow::protocol::RankRequest;
use layerflow::{compute_drawing, solver};
use std::hint::black_box;
use std::path::Path;

/// A chain `N0 -> N1 -> ...` with forward shortcuts and a few back edges.
fn dense_graph(nodes: usize, extra_edges: usize) -> RankRequest {
    let ids: Vec<String> = (0..nodes).map(|i| format!("N{i}")).collect();
    let mut edges = Vec::new();
    for i in 0..nodes.saturating_sub(1) {
        edges.push(Edge::new(&ids[i], &ids[i + 1]));
    }
    let mut count = 0usize;
    'outer: for i in 0..nodes {
        for j in (i + 2)..nodes {
            if count >= extra_edges {
                break 'outer;
            }
            if count % 7 == 3 {
                edges.push(Edge::new(&ids[j], &ids[i]));
            } else {
                edges.push(Edge::new(&ids[i], &ids[j]));
            }
            count += 1;
        }
    }
    RankRequest {
        widths: ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), 40.0 + (i % 4) as f64 * 10.0))
            .collect(),
        heights: ids.iter().map(|id| (id.clone(), 30.0)).collect(),
        nodes: ids,
        edges,
        head: None,
    }
}

fn fixture(name: &str) -> RankRequest {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(format!("{name}.json"));
    let input = std::fs::read_to_string(path).expect("fixture read failed");
    serde_json::from_str(&input).expect("fixture parse failed")
}

fn bench_fixtures(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout");
    let config = Config::default();
    for name in ["sample", "cycles", "disconnected", "weave", "headed"] {
        let request = fixture(name);
        group.bench_with_input(BenchmarkId::from_parameter(name), &request, |b, request| {
            b.iter(|| {
                let drawing = compute_drawing(black_box(request), &config).expect("layout failed");
                black_box(drawing.edges.len());
            });
        });
    }
    group.finish();
}

fn bench_stages(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout_stages");
    let config = Config::default();
    for (nodes, extra_edges) in [(12usize, 10usize), (20, 24), (30, 40)] {
        let name = format!("dense_{nodes}_{extra_edges}");
        let request = dense_graph(nodes, extra_edges);
        let ranked = rank(&request, &config).expect("rank failed");
        let ordered = order(&ranked, &config).expect("order failed");

        group.bench_with_input(BenchmarkId::new("rank", &name), &request, |b, request| {
            b.iter(|| black_box(rank(black_box(request), &config).expect("rank failed")));
        });
        group.bench_with_input(BenchmarkId::new("order", &name), &ranked, |b, ranked| {
            b.iter(|| black_box(order(black_box(ranked), &config).expect("order failed")));
        });
        group.bench_with_input(
            BenchmarkId::new("coordinates", &name),
            &ordered.lp.model,
            |b, model| {
                b.iter(|| {
                    black_box(solver::solve_lp(black_box(model), &config.solver).expect("solve failed"))
                });
            },
        );
        group.bench_with_input(BenchmarkId::new("full", &name), &request, |b, request| {
            b.iter(|| {
                let drawing = compute_drawing(black_box(request), &config).expect("layout failed");
                black_box(drawing.unrouted.len());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fixtures, bench_stages);
criterion_main!(benches);
