#![no_main]

use std::sync::{Arc, OnceLock};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use toml::{Table, Value};

use relaypost_core::{NodeDecl, PipelineConfig, Record, RecordSink, StatePolicy};
use relaypost_pipeline::{BuildContext, RxClassifier, StateStore};

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    /// 그룹별 매치 규칙 (최대 8개로 제한)
    groups: Vec<FuzzRule>,
    match_first: bool,
    want_copy: bool,
    /// 분류 대상 레코드 필드값
    host: String,
    content: String,
}

/// 중첩 match_rule 트리
#[derive(Arbitrary, Debug)]
enum FuzzRule {
    Content { pattern: String },
    Field { field: String, pattern: String },
    All(Vec<FuzzRule>),
    Any(Vec<FuzzRule>),
}

impl FuzzRule {
    /// 깊이 8, 가지 4개로 제한해 TOML 값으로 변환한다
    fn to_toml(&self, depth: usize) -> Value {
        match self {
            FuzzRule::Content { pattern } => {
                let mut table = Table::new();
                table.insert("pattern".to_owned(), Value::String(pattern.clone()));
                Value::Table(table)
            }
            FuzzRule::Field { field, pattern } => {
                let mut table = Table::new();
                table.insert("field".to_owned(), Value::String(field.clone()));
                table.insert("pattern".to_owned(), Value::String(pattern.clone()));
                Value::Table(table)
            }
            FuzzRule::All(rules) | FuzzRule::Any(rules) if depth >= 8 => {
                let mut table = Table::new();
                table.insert(
                    "pattern".to_owned(),
                    Value::String(format!("depth_capped_{}", rules.len())),
                );
                Value::Table(table)
            }
            FuzzRule::All(rules) => {
                let children = rules.iter().take(4).map(|r| r.to_toml(depth + 1)).collect();
                let mut table = Table::new();
                table.insert("all".to_owned(), Value::Array(children));
                Value::Table(table)
            }
            FuzzRule::Any(rules) => {
                let children = rules.iter().take(4).map(|r| r.to_toml(depth + 1)).collect();
                let mut table = Table::new();
                table.insert("any".to_owned(), Value::Array(children));
                Value::Table(table)
            }
        }
    }
}

static CTX: OnceLock<BuildContext> = OnceLock::new();

fn shared_context() -> &'static BuildContext {
    CTX.get_or_init(|| {
        let state_path = std::env::temp_dir().join(format!(
            "relaypost_fuzz_state_{}.json",
            std::process::id()
        ));
        BuildContext {
            state: Arc::new(
                StateStore::open(state_path, StatePolicy::Preserve)
                    .expect("state store should open"),
            ),
            pipeline: PipelineConfig::default(),
            resume: true,
            test_mode: false,
        }
    })
}

fuzz_target!(|input: FuzzInput| {
    let group_values: Vec<Value> = input
        .groups
        .iter()
        .take(8)
        .enumerate()
        .map(|(i, rule)| {
            let mut group = Table::new();
            group.insert("name".to_owned(), Value::String(format!("g{i}")));
            group.insert("match_rule".to_owned(), rule.to_toml(0));
            Value::Table(group)
        })
        .collect();

    if group_values.is_empty() {
        return;
    }

    let mut params = Table::new();
    params.insert("groups".to_owned(), Value::Array(group_values));
    params.insert("match_first".to_owned(), Value::Boolean(input.match_first));
    params.insert("want_copy".to_owned(), Value::Boolean(input.want_copy));

    let decl = NodeDecl {
        name: "fuzz".to_owned(),
        node_type: "rx_classifier".to_owned(),
        outputs: Vec::new(),
        params,
    };

    // 잘못된 패턴은 Err이어야 하고, 어느 쪽이든 패닉은 안 된다
    let Ok(classifier) = RxClassifier::from_decl(&decl, shared_context()) else {
        return;
    };

    // 분류 역시 어떤 레코드에도 패닉 없이 끝나야 한다
    let record = Record::new(Default::default(), input.host, input.content);
    classifier.append(&record);
});
