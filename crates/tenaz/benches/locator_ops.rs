//! Locator Operations Benchmarks
//!
//! Benchmarks for locator parsing, chain construction, and chain resolution
//! over the in-memory target.
//!
//! Run with: `cargo bench --bench locator_ops`

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;
use tenaz::mock::{MockElement, MockTarget};
use tenaz::prelude::*;

fn bench_spec_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("spec_parsing");

    let inputs = vec![
        ("css_id", "css=#main-heading"),
        ("css_complex", "css=div.container > button.btn-primary:first-child"),
        ("xpath", "xpath=//form//input[@name='email']"),
        ("text", "text=Sign in"),
        ("role", "role=button"),
        ("id", "id=submit"),
    ];

    for (name, input) in inputs {
        group.bench_with_input(BenchmarkId::from_parameter(name), &input, |bench, s| {
            bench.iter(|| {
                let spec = LocatorSpec::parse(black_box(s)).unwrap();
                black_box(spec);
            });
        });
    }

    group.finish();
}

fn bench_chain_building(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_building");

    for len in [1_usize, 3, 8] {
        let inputs: Vec<String> = (0..len).map(|i| format!("css=#candidate-{i}")).collect();
        group.bench_with_input(BenchmarkId::new("parse_all", len), &inputs, |bench, inputs| {
            bench.iter(|| {
                let chain = LocatorChain::parse_all(black_box(inputs)).unwrap();
                black_box(chain);
            });
        });
    }

    group.bench_function("or_builder", |bench| {
        bench.iter(|| {
            let chain = LocatorChain::new(LocatorSpec::css("#main-heading"))
                .or(LocatorSpec::xpath("//h1"))
                .or(LocatorSpec::text("Welcome"));
            black_box(chain.to_string());
        });
    });

    group.finish();
}

fn bench_chain_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_resolution");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();

    for position in [0_usize, 2, 5] {
        let specs: Vec<LocatorSpec> = (0..6)
            .map(|i| LocatorSpec::css(format!("#candidate-{i}")))
            .collect();
        let target = Arc::new(MockTarget::new().with(specs[position].clone(), MockElement::new()));
        let chain = LocatorChain::try_from_iter(specs).unwrap();
        let resolver = Resolver::new(Duration::from_millis(50));

        group.bench_with_input(
            BenchmarkId::new("match_at", position),
            &chain,
            |bench, chain| {
                bench.iter(|| {
                    let handle = runtime
                        .block_on(resolver.resolve(&target, black_box(chain)))
                        .unwrap();
                    black_box(handle);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_spec_parsing,
    bench_chain_building,
    bench_chain_resolution
);
criterion_main!(benches);
