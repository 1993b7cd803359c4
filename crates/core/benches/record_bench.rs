//! 레코드 타입 벤치마크
//!
//! Record 생성, 텍스트 직렬화/파싱, JSON 변환 성능을 측정합니다.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use chrono::{NaiveDate, NaiveDateTime};
use relaypost_core::types::{FieldRef, Record};

fn sample_ts() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2014, 12, 20)
        .unwrap()
        .and_hms_opt(13, 21, 9)
        .unwrap()
}

fn create_record() -> Record {
    Record::new(
        sample_ts(),
        "publicapi2",
        "nginx: 10.0.12.1 example.com GET /index.html HTTP/1.1 200 0.012",
    )
}

fn create_record_with_extras(n: usize) -> Record {
    let mut record = create_record();
    for i in 0..n {
        record.insert_extra(format!("field_{i}"), format!("value_{i}"));
    }
    record
}

fn bench_record_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_creation");
    group.throughput(Throughput::Elements(1));

    group.bench_function("record_new", |b| {
        b.iter(|| {
            Record::new(
                black_box(sample_ts()),
                black_box("publicapi2"),
                black_box("nginx: request line"),
            )
        })
    });

    group.bench_function("record_insert_extra", |b| {
        b.iter(|| {
            let mut record = create_record();
            record.insert_extra(black_box("status"), black_box("200"));
            record
        })
    });

    group.finish();
}

fn bench_record_text_codec(c: &mut Criterion) {
    let record = create_record();
    let line = record.to_string();

    let mut group = c.benchmark_group("record_text_codec");
    group.throughput(Throughput::Elements(1));

    group.bench_function("record_display", |b| {
        b.iter(|| {
            let _s = format!("{}", black_box(&record));
        })
    });

    group.bench_function("record_parse", |b| {
        b.iter(|| {
            let _parsed: Record = black_box(line.as_str()).parse().unwrap();
        })
    });

    group.finish();
}

fn bench_record_json(c: &mut Criterion) {
    let plain = create_record();
    let enriched = create_record_with_extras(10);

    let mut group = c.benchmark_group("record_json");
    group.throughput(Throughput::Elements(1));

    group.bench_function("to_json_no_extras", |b| {
        b.iter(|| black_box(&plain).to_json_value())
    });

    group.bench_function("to_json_10_extras", |b| {
        b.iter(|| black_box(&enriched).to_json_value())
    });

    group.finish();
}

fn bench_record_cloning(c: &mut Criterion) {
    let plain = create_record();
    let enriched = create_record_with_extras(10);

    let mut group = c.benchmark_group("record_cloning");
    group.throughput(Throughput::Elements(1));

    group.bench_function("clone_no_extras", |b| {
        b.iter(|| {
            let _ = black_box(&plain).clone();
        })
    });

    group.bench_function("clone_10_extras", |b| {
        b.iter(|| {
            let _ = black_box(&enriched).clone();
        })
    });

    group.finish();
}

fn bench_field_lookup(c: &mut Criterion) {
    let record = create_record_with_extras(10);
    let content_ref = FieldRef::parse("content").unwrap();
    let extra_ref = FieldRef::parse(".field_5").unwrap();

    let mut group = c.benchmark_group("record_field_lookup");
    group.throughput(Throughput::Elements(1));

    group.bench_function("attr_field", |b| {
        b.iter(|| {
            let _v = black_box(&record).field(black_box(&content_ref));
        })
    });

    group.bench_function("extra_field", |b| {
        b.iter(|| {
            let _v = black_box(&record).field(black_box(&extra_ref));
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_record_creation,
    bench_record_text_codec,
    bench_record_json,
    bench_record_cloning,
    bench_field_lookup
);
criterion_main!(benches);
