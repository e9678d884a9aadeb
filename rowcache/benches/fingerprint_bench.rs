//! Fingerprint Benchmarks
//!
//! Key derivation cost for query text and expression trees of growing size

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rowcache::core::{BinaryOp, ConstantValue};
use rowcache::{Expression, KeyDeriver, ResultShapeKind};
use serde_json::json;
use std::hint::black_box;

/// `row.c0 == 0 && row.c1 == 1 && ...` with `terms` comparisons
fn conjunction(terms: usize) -> Expression {
    let term = |i: usize| {
        Expression::binary(
            BinaryOp::Equal,
            Expression::member(Expression::parameter("row"), format!("c{}", i)),
            Expression::constant(ConstantValue::Int(i as i64)),
        )
    };
    let body = (1..terms).fold(term(0), |acc, i| {
        Expression::binary(BinaryOp::AndAlso, acc, term(i))
    });
    Expression::lambda(body, &["row"])
}

fn bench_query_keys(c: &mut Criterion) {
    let keys = KeyDeriver::default();
    let params = json!({ "id": 42, "name": "rowA", "active": true });
    let mut group = c.benchmark_group("query_key");

    for len in [32usize, 256, 2048] {
        let query = format!("SELECT * FROM T WHERE {}", "x".repeat(len));
        group.bench_with_input(BenchmarkId::new("no_params", len), &query, |b, query| {
            b.iter(|| {
                keys.derive_query_key(ResultShapeKind::FetchListByQuery, black_box(query), None)
                    .unwrap()
            })
        });
        group.bench_with_input(BenchmarkId::new("with_params", len), &query, |b, query| {
            b.iter(|| {
                keys.derive_query_key(
                    ResultShapeKind::FetchListByQuery,
                    black_box(query),
                    Some(black_box(&params)),
                )
                .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_expression_keys(c: &mut Criterion) {
    let keys = KeyDeriver::default();
    let selector = Expression::member(Expression::parameter("row"), "name");
    let mut group = c.benchmark_group("expression_key");

    for terms in [1usize, 8, 64] {
        let filter = conjunction(terms);
        group.bench_with_input(BenchmarkId::new("filter", terms), &filter, |b, filter| {
            b.iter(|| {
                keys.derive_expression_key(
                    ResultShapeKind::FetchListByExpression,
                    black_box(filter),
                    Some(&selector),
                    None,
                )
                .unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_query_keys, bench_expression_keys);
criterion_main!(benches);
