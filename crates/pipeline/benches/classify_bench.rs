//! 분류기 벤치마크
//!
//! 그룹 규칙 평가와 캡처 보강 성능, 그룹 수에 따른 스케일링, 정규식
//! 컴파일 비용을 측정합니다.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::NaiveDateTime;

use relaypost_core::{NamedSink, Node, NodeDecl, PipelineConfig, Record, RecordSink, StatePolicy};
use relaypost_pipeline::{BuildContext, RxClassifier, StateStore};

/// 받은 레코드를 버리는 벤치마크용 sink
struct NullSink;

impl RecordSink for NullSink {
    fn append(&self, _record: &Record) {}
}

fn sample_record(content: &str) -> Record {
    let ts = NaiveDateTime::parse_from_str("2014-12-20 13:21:09", "%Y-%m-%d %H:%M:%S").unwrap();
    Record::new(ts, "publicapi1", content)
}

fn context(dir: &std::path::Path) -> BuildContext {
    BuildContext {
        state: Arc::new(StateStore::open(dir.join("state.json"), StatePolicy::Preserve).unwrap()),
        pipeline: PipelineConfig::default(),
        resume: true,
        test_mode: false,
    }
}

fn classifier(params_toml: &str, ctx: &BuildContext) -> RxClassifier {
    let decl = NodeDecl {
        name: "bench".to_owned(),
        node_type: "rx_classifier".to_owned(),
        outputs: Vec::new(),
        params: toml::from_str(params_toml).unwrap(),
    };
    RxClassifier::from_decl(&decl, ctx).unwrap()
}

fn connect_null(clf: &RxClassifier, outputs: &[&str]) {
    clf.connect_outputs(
        outputs
            .iter()
            .map(|name| NamedSink::new(*name, Arc::new(NullSink) as _))
            .collect(),
    );
}

/// 일치하지 않는 그룹 `count - 1`개 뒤에 일치 그룹 하나가 오는 최악 경로
fn scaling_params(count: usize) -> String {
    let mut params = String::new();
    for i in 0..count.saturating_sub(1) {
        let _ = write!(
            params,
            "[[groups]]\n\
             name = \"miss_{i}\"\n\
             outputs = [\"out\"]\n\
             rx_list = [\"no-such-token-{i}\"]\n"
        );
    }
    params.push_str(
        "[[groups]]\n\
         name = \"web\"\n\
         outputs = [\"out\"]\n\
         rx_list = [\"nginx: .*\"]\n",
    );
    params
}

fn bench_single_group(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let clf = classifier(
        "[[groups]]\n\
         name = \"web\"\n\
         outputs = [\"out\"]\n\
         rx_list = [\"nginx: .*\"]\n",
        &ctx,
    );
    connect_null(&clf, &["out"]);

    let hit = sample_record("nginx: 127.26.132.12 GET /api/index/et/help 200");
    let miss = sample_record("postfix/smtp[2231]: queue empty");

    let mut group = c.benchmark_group("single_group");
    group.throughput(Throughput::Elements(1));

    group.bench_function("content_hit", |b| b.iter(|| clf.append(black_box(&hit))));
    group.bench_function("content_miss", |b| b.iter(|| clf.append(black_box(&miss))));

    group.finish();
}

fn bench_match_rule_tree(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let clf = classifier(
        "[[groups]]\n\
         name = \"public_web\"\n\
         outputs = [\"out\"]\n\
         match_rule = { all = [ { field = \"host\", pattern = \"^public\" }, { any = [ { pattern = \"nginx\" }, { pattern = \"apache\" } ] } ] }\n",
        &ctx,
    );
    connect_null(&clf, &["out"]);

    let record = sample_record("nginx: 127.26.132.12 GET /api 200");

    let mut group = c.benchmark_group("match_rule");
    group.throughput(Throughput::Elements(1));

    group.bench_function("all_any_tree", |b| {
        b.iter(|| clf.append(black_box(&record)))
    });

    group.finish();
}

fn bench_capture_enrichment(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let clf = classifier(
        "[[groups]]\n\
         name = \"web\"\n\
         outputs = [\"out\"]\n\
         rx_list = [\"nginx: (?P<client>[0-9.]+) (?P<method>\\\\S+) (?P<path>\\\\S+) (?P<status>[0-9]+)\"]\n\
         name_transform = \"web_{status}\"\n",
        &ctx,
    );
    connect_null(&clf, &["out"]);

    let record = sample_record("nginx: 127.26.132.12 GET /api/index/et/help 200");

    let mut group = c.benchmark_group("capture_enrichment");
    group.throughput(Throughput::Elements(1));

    // 캡처 4개를 extradata로 병합하고 그룹 이름을 치환하는 경로
    group.bench_function("four_captures_with_transform", |b| {
        b.iter(|| clf.append(black_box(&record)))
    });

    group.finish();
}

fn bench_group_scaling(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let record = sample_record("nginx: 127.26.132.12 GET /api 200");

    let mut group = c.benchmark_group("group_scaling");

    for group_count in [1usize, 10, 100].iter() {
        let clf = classifier(&scaling_params(*group_count), &ctx);
        connect_null(&clf, &["out"]);

        group.throughput(Throughput::Elements(*group_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(group_count),
            group_count,
            |b, _| b.iter(|| clf.append(black_box(&record))),
        );
    }

    group.finish();
}

fn bench_classifier_construction(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let small = scaling_params(2);
    let large = scaling_params(100);

    let mut group = c.benchmark_group("construction");

    group.bench_function("compile_2_groups", |b| {
        b.iter(|| classifier(black_box(&small), &ctx))
    });

    group.bench_function("compile_100_groups", |b| {
        b.iter(|| classifier(black_box(&large), &ctx))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_group,
    bench_match_rule_tree,
    bench_capture_enrichment,
    bench_group_scaling,
    bench_classifier_construction
);
criterion_main!(benches);
