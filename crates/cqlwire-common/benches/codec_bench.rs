// Criterion benchmarks for the cqlwire-common codec
//
// Run benchmarks with:
//   cargo bench -p cqlwire-common
//
// For detailed output with plots:
//   cargo bench -p cqlwire-common -- --save-baseline main

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cqlwire_common::transport::FrameCodec;
use cqlwire_common::{
    values, ColumnSpec, ColumnType, Consistency, CqlValue, Frame, QueryRequest, Request,
    Response, Row, Rows,
};

fn bench_query_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_encoding");

    group.bench_function("no_values", |b| {
        let request = Request::Query(QueryRequest::new("SELECT * FROM system.local"));
        b.iter(|| FrameCodec::encode_request(black_box(1), black_box(&request)));
    });

    group.bench_function("with_values", |b| {
        let query = QueryRequest::new("INSERT INTO ks.t (id, name, tags) VALUES (?, ?, ?)")
            .with_consistency(Consistency::Quorum)
            .with_values(&values![42i64, "alice", vec!["a", "b", "c"]])
            .unwrap()
            .with_page_size(Some(5000));
        let request = Request::Query(query);
        b.iter(|| FrameCodec::encode_request(black_box(1), black_box(&request)));
    });

    group.finish();
}

fn role_rows(n: usize) -> Rows {
    let columns = vec![
        ColumnSpec::new("system_auth", "roles", "role", ColumnType::Text),
        ColumnSpec::new("system_auth", "roles", "can_login", ColumnType::Boolean),
        ColumnSpec::new("system_auth", "roles", "is_superuser", ColumnType::Boolean),
        ColumnSpec::new(
            "system_auth",
            "roles",
            "member_of",
            ColumnType::Set(Box::new(ColumnType::Text)),
        ),
    ];
    let rows = (0..n)
        .map(|i| {
            Row::new(vec![
                Some(CqlValue::Text(format!("role_{}", i))),
                Some(CqlValue::Boolean(i % 2 == 0)),
                Some(CqlValue::Boolean(false)),
                if i % 3 == 0 {
                    None
                } else {
                    Some(CqlValue::Set(vec![CqlValue::Text("readers".into())]))
                },
            ])
        })
        .collect();
    Rows::new(columns, rows).unwrap()
}

fn bench_rows_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("rows_decoding");

    for n in [1usize, 100, 5000] {
        let frame = FrameCodec::encode_response(1, &Response::Rows(role_rows(n))).unwrap();
        let wire = frame.to_bytes().unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(n), &wire, |b, wire| {
            b.iter(|| {
                let frame = Frame::from_slice(black_box(wire)).unwrap();
                FrameCodec::decode_response(&frame)
            });
        });
    }

    group.finish();
}

fn bench_rows_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("rows_encoding");

    let response = Response::Rows(role_rows(100));
    group.bench_function("100_rows", |b| {
        b.iter(|| black_box(&response).encode_body());
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_query_encoding,
    bench_rows_decoding,
    bench_rows_encoding
);
criterion_main!(benches);
