//! Benchmarks for result block decoding

use std::ffi::CString;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use native_bridge::bridge::decode::{decode_fields, decode_result, BlockFields};
use native_bridge::ffi::RawSqlResult;

fn query_payload(rows: usize) -> String {
    let rows: Vec<String> = (0..rows)
        .map(|i| format!(r#"{{"id":{i},"name":"user{i}","email":"user{i}@example.com","age":{}}}"#, 20 + i % 50))
        .collect();
    format!(r#"{{"rows":[{}],"count":{}}}"#, rows.join(","), rows.len())
}

fn fields(success: bool, rows_affected: i64) -> BlockFields {
    BlockFields {
        json: 0,
        error: 0,
        success,
        rows_affected,
    }
}

/// Benchmark payload decoding for varying row counts
fn bench_query_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_query");

    for &rows in &[1usize, 10, 100, 1000] {
        let payload = query_payload(rows);
        group.throughput(Throughput::Bytes(payload.len() as u64));

        group.bench_function(format!("{}_rows", rows), |b| {
            b.iter(|| {
                let result = decode_fields(&fields(true, rows as i64), Some(payload.as_bytes()), None);
                black_box(result)
            })
        });
    }

    group.finish();
}

/// Benchmark mutation and failure decoding
fn bench_small_results(c: &mut Criterion) {
    let mutation = br#"{"rows_affected":1,"last_insert_rowid":42}"#;
    c.bench_function("decode_mutation", |b| {
        b.iter(|| black_box(decode_fields(&fields(true, 1), Some(&mutation[..]), None)))
    });

    let error = b"Query prepare error: no such table: missing_table";
    c.bench_function("decode_failure", |b| {
        b.iter(|| black_box(decode_fields(&fields(false, 0), None, Some(&error[..]))))
    });
}

unsafe extern "C" fn free_block(result: *mut RawSqlResult) {
    let block = Box::from_raw(result);
    if !block.json_data.is_null() {
        drop(CString::from_raw(block.json_data));
    }
}

/// Benchmark the full path: snapshot, decode, release
fn bench_result_block(c: &mut Criterion) {
    let payload = query_payload(10);

    c.bench_function("decode_result_block", |b| {
        b.iter(|| {
            let block = Box::into_raw(Box::new(RawSqlResult {
                json_data: CString::new(payload.as_str()).unwrap().into_raw(),
                error_message: std::ptr::null_mut(),
                success: true,
                rows_affected: 10,
            }));
            black_box(unsafe { decode_result(block, free_block) })
        })
    });
}

criterion_group!(
    benches,
    bench_query_payload,
    bench_small_results,
    bench_result_block
);
criterion_main!(benches);
