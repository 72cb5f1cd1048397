//! Benchmarks for count propagation over synthetic CFGs

use autofdo::annotate::propagate::{calculate_branch_probabilities, counts_to_frequencies};
use autofdo::ir::{BlockId, CfgAnalyses, FunctionBody};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// A chain of `n` diamonds. Only the join blocks and one arm per diamond
/// carry samples, so propagation has to infer the other arm.
fn diamond_chain(n: usize) -> FunctionBody {
    let mut body = FunctionBody::new();
    let mut prev = BlockId::ENTRY;
    for i in 0..n {
        let head = body.add_block();
        let left = body.add_block();
        let right = body.add_block();
        body.add_edge(prev, head);
        body.add_cond_edges(head, left, right);
        let join = body.add_block();
        body.add_edge(left, join);
        body.add_edge(right, join);

        let hot = 1_000 + (i as u64 % 7) * 10;
        for (block, count) in [(head, hot), (left, hot * 3 / 4), (join, hot)] {
            let bb = body.block_mut(block);
            bb.count = count;
            bb.annotated = true;
        }
        prev = join;
    }
    body.add_edge(prev, BlockId::EXIT);
    body
}

fn bench_propagation(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation");
    for n in [8usize, 64, 256] {
        let template = diamond_chain(n);
        group.bench_with_input(BenchmarkId::new("diamond_chain", n), &template, |b, template| {
            b.iter(|| {
                let mut body = template.clone();
                let cfg = CfgAnalyses::compute(&body);
                let changes = calculate_branch_probabilities(&mut body, &cfg, 100);
                counts_to_frequencies(&mut body);
                black_box(changes)
            })
        });
    }
    group.finish();
}

fn bench_analyses(c: &mut Criterion) {
    let body = diamond_chain(256);
    c.bench_function("cfg_analyses_256", |b| {
        b.iter(|| black_box(CfgAnalyses::compute(black_box(&body))))
    });
}

criterion_group!(benches, bench_propagation, bench_analyses);
criterion_main!(benches);
