//! 정규식 분류기 노드
//!
//! 레코드를 이름 있는 그룹 규칙에 평가해, 일치한 그룹의 출력들로
//! 사본을 내보냅니다. 그룹은 선언 순서대로 평가되며, 기본값은
//! 일치하는 모든 그룹이 전달하는 match-all입니다.
//!
//! 규칙은 두 형태 중 하나입니다: `rx_list`(OR, 첫 성공에서 중단) 또는
//! `all`/`any` 결합자를 중첩한 `match_rule` 트리. 패턴의 이름 있는
//! 캡처는 extradata로 병합되고, `name_transform` 템플릿의 `{캡처}`
//! 자리표시자를 채웁니다.
//!
//! 예약된 그룹 이름 [`FALLTHROUGH_GROUP`]은 규칙 없이 출력만 갖고,
//! 어느 그룹도 억제하지 않은 레코드를 원본 그대로 받습니다.

mod rule;
mod stats;

pub use rule::{MatchRuleDecl, RxEntry};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tracing::warn;

use relaypost_core::metrics as m;
use relaypost_core::{NamedSink, Node, NodeDecl, NodeError, Record, RecordSink};

use crate::registry::BuildContext;
use rule::{EvalContext, FieldMatcher, MatchRule, RegexCache};
use stats::StatsTracker;

/// 규칙 없이 출력만 갖는 예약 그룹 이름
pub const FALLTHROUGH_GROUP: &str = "_fallthrough";

/// 그룹 선언
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GroupDecl {
    name: String,
    #[serde(default)]
    outputs: Vec<String>,
    #[serde(default)]
    rx_list: Option<Vec<RxEntry>>,
    #[serde(default)]
    match_rule: Option<MatchRuleDecl>,
    /// true면 이 그룹의 일치가 fallthrough 전달을 막지 않습니다.
    /// 통계용 탭 그룹에 씁니다.
    #[serde(default)]
    disables_fallthrough: bool,
    /// 그룹 이름 템플릿. `{캡처}` 자리표시자가 치환됩니다.
    #[serde(default)]
    name_transform: Option<String>,
}

/// `rx_classifier` 노드 파라미터
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClassifierParams {
    groups: Vec<GroupDecl>,
    /// true면 첫 일치 그룹에서 평가를 멈춥니다.
    #[serde(default)]
    match_first: bool,
    /// true면 일치한 그룹마다 원본의 독립 사본을 만듭니다. false면
    /// 작업 사본 하나에 보강이 누적됩니다.
    #[serde(default)]
    want_copy: bool,
    /// 패턴별 성능 통계 수집 (보고서는 stats_dir에 쓰임)
    #[serde(default)]
    track_stats: bool,
}

enum GroupRule {
    RxList(Vec<FieldMatcher>),
    Tree(MatchRule),
}

struct Group {
    name: String,
    outputs: Vec<String>,
    rule: GroupRule,
    disables_fallthrough: bool,
    name_transform: Option<String>,
    matches: AtomicU64,
}

impl Group {
    fn try_match(&self, record: &Record, ctx: &mut EvalContext<'_>) -> bool {
        match &self.rule {
            GroupRule::RxList(matchers) => matchers.iter().any(|m| m.try_match(record, ctx)),
            GroupRule::Tree(tree) => tree.evaluate(record, ctx),
        }
    }

    /// 일치한 레코드에 그룹 이름과 캡처를 스탬프합니다.
    fn enrich(&self, record: &mut Record, captures: &[(String, String)]) {
        record.group = Some(self.formatted_name(captures));
        if !captures.is_empty() {
            record.merge_extras(captures.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    /// `name_transform`이 있으면 캡처로 치환한 이름을, 없으면 그룹
    /// 이름 그대로를 돌려줍니다. 캡처에 없는 자리표시자는 그대로
    /// 남습니다.
    fn formatted_name(&self, captures: &[(String, String)]) -> String {
        let Some(template) = &self.name_transform else {
            return self.name.clone();
        };
        let mut formatted = template.clone();
        for (key, value) in captures {
            formatted = formatted.replace(&format!("{{{key}}}"), value);
        }
        formatted
    }
}

struct Fallthrough {
    outputs: Vec<String>,
}

/// 레코드를 그룹 규칙으로 분류해 라우팅하는 중간 노드
pub struct RxClassifier {
    name: String,
    configured_outputs: Vec<String>,
    sinks: Mutex<HashMap<String, Arc<dyn RecordSink>>>,
    groups: Vec<Group>,
    fallthrough: Option<Fallthrough>,
    match_first: bool,
    want_copy: bool,
    stats: Option<Mutex<StatsTracker>>,
    missing_outputs: Mutex<HashSet<String>>,
}

impl RxClassifier {
    /// 노드 선언에서 분류기를 구성합니다. 모든 정규식이 여기서
    /// 컴파일되므로 잘못된 패턴은 그래프 구성 단계에서 걸러집니다.
    pub fn from_decl(decl: &NodeDecl, ctx: &BuildContext) -> Result<Self, NodeError> {
        let params: ClassifierParams =
            decl.params
                .clone()
                .try_into()
                .map_err(|err: toml::de::Error| NodeError::InvalidParams {
                    node: decl.name.clone(),
                    reason: err.to_string(),
                })?;

        let mut cache = RegexCache::new();
        let mut groups = Vec::new();
        let mut fallthrough = None;
        let mut configured_outputs: Vec<String> = Vec::new();

        for group_decl in &params.groups {
            for output in &group_decl.outputs {
                if !configured_outputs.contains(output) {
                    configured_outputs.push(output.clone());
                }
            }

            if group_decl.name == FALLTHROUGH_GROUP {
                if group_decl.rx_list.is_some() || group_decl.match_rule.is_some() {
                    return Err(NodeError::InvalidParams {
                        node: decl.name.clone(),
                        reason: format!("group '{FALLTHROUGH_GROUP}' cannot have a rule"),
                    });
                }
                if fallthrough.is_some() {
                    return Err(NodeError::InvalidParams {
                        node: decl.name.clone(),
                        reason: format!("duplicate '{FALLTHROUGH_GROUP}' group"),
                    });
                }
                fallthrough = Some(Fallthrough {
                    outputs: group_decl.outputs.clone(),
                });
                continue;
            }

            let pattern_error = |reason: String| NodeError::Pattern {
                node: decl.name.clone(),
                group: group_decl.name.clone(),
                reason,
            };
            let rule = match (&group_decl.rx_list, &group_decl.match_rule) {
                (Some(entries), None) => GroupRule::RxList(
                    entries
                        .iter()
                        .map(|entry| entry.compile(&mut cache))
                        .collect::<Result<_, _>>()
                        .map_err(pattern_error)?,
                ),
                (None, Some(tree)) => {
                    GroupRule::Tree(tree.compile(&mut cache).map_err(pattern_error)?)
                }
                (Some(_), Some(_)) => {
                    return Err(NodeError::InvalidParams {
                        node: decl.name.clone(),
                        reason: format!(
                            "group '{}' has both rx_list and match_rule",
                            group_decl.name
                        ),
                    });
                }
                (None, None) => {
                    return Err(NodeError::InvalidParams {
                        node: decl.name.clone(),
                        reason: format!(
                            "group '{}' has neither rx_list nor match_rule",
                            group_decl.name
                        ),
                    });
                }
            };

            groups.push(Group {
                name: group_decl.name.clone(),
                outputs: group_decl.outputs.clone(),
                rule,
                disables_fallthrough: group_decl.disables_fallthrough,
                name_transform: group_decl.name_transform.clone(),
                matches: AtomicU64::new(0),
            });
        }

        let stats = params.track_stats.then(|| {
            Mutex::new(StatsTracker::new(
                &decl.name,
                &ctx.pipeline.stats_dir,
                ctx.pipeline.stats_flush_every,
            ))
        });

        Ok(Self {
            name: decl.name.clone(),
            configured_outputs,
            sinks: Mutex::new(HashMap::new()),
            groups,
            fallthrough,
            match_first: params.match_first,
            want_copy: params.want_copy,
            stats,
            missing_outputs: Mutex::new(HashSet::new()),
        })
    }

    /// 그룹 출력 목록을 해석된 sink로 보냅니다. 이름을 해석하지 못한
    /// 출력은 한 번만 경고하고 건너뜁니다.
    fn forward(&self, group_name: &str, outputs: &[String], record: &Record) {
        // 다운스트림 append 동안 잠금을 잡지 않도록 참조만 복사한다
        let resolved: Vec<Option<Arc<dyn RecordSink>>> = {
            let sinks = self.sinks.lock().unwrap_or_else(|e| e.into_inner());
            outputs.iter().map(|name| sinks.get(name).cloned()).collect()
        };
        for (name, sink) in outputs.iter().zip(resolved) {
            match sink {
                Some(sink) => sink.append(record),
                None => self.warn_missing_output(name, group_name),
            }
        }
    }

    fn warn_missing_output(&self, output: &str, group: &str) {
        let mut missing = self.missing_outputs.lock().unwrap_or_else(|e| e.into_inner());
        if missing.insert(output.to_owned()) {
            warn!(
                node = %self.name,
                output = %output,
                group = %group,
                "unknown output, records dropped"
            );
        }
    }

    #[cfg(test)]
    fn group_matches(&self, group: &str) -> u64 {
        self.groups
            .iter()
            .find(|g| g.name == group)
            .map(|g| g.matches.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for RxClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RxClassifier")
            .field("name", &self.name)
            .field("group_count", &self.groups.len())
            .field("match_first", &self.match_first)
            .field("want_copy", &self.want_copy)
            .finish()
    }
}

impl Node for RxClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn node_type(&self) -> &'static str {
        "rx_classifier"
    }

    fn configured_outputs(&self) -> Vec<String> {
        self.configured_outputs.clone()
    }

    fn connect_outputs(&self, outputs: Vec<NamedSink>) {
        let mut sinks = self.sinks.lock().unwrap_or_else(|e| e.into_inner());
        *sinks = outputs
            .into_iter()
            .map(|named| (named.name, named.sink))
            .collect();
    }

    fn stop(&self) {
        if let Some(stats) = &self.stats {
            stats.lock().unwrap_or_else(|e| e.into_inner()).flush();
        }
    }

    fn as_sink(self: Arc<Self>) -> Option<Arc<dyn RecordSink>> {
        Some(self)
    }
}

impl RecordSink for RxClassifier {
    fn append(&self, record: &Record) {
        metrics::counter!(m::CLASSIFIER_RECORDS_TOTAL, m::LABEL_NODE => self.name.clone())
            .increment(1);
        let mut stats_guard = self
            .stats
            .as_ref()
            .map(|mutex| mutex.lock().unwrap_or_else(|e| e.into_inner()));

        let mut matched_any = false;
        let mut suppress_fallthrough = false;
        let mut working: Option<Record> = None;

        for group in &self.groups {
            let mut ctx = EvalContext::new(&self.name, &group.name, stats_guard.as_deref_mut());
            if !group.try_match(record, &mut ctx) {
                continue;
            }
            let captures = ctx.captures;

            matched_any = true;
            if !group.disables_fallthrough {
                suppress_fallthrough = true;
            }
            group.matches.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(
                m::CLASSIFIER_GROUP_MATCHES_TOTAL,
                m::LABEL_NODE => self.name.clone(),
                m::LABEL_GROUP => group.name.clone()
            )
            .increment(1);

            if self.want_copy {
                let mut copy = record.clone();
                copy.trace_depth += 1;
                group.enrich(&mut copy, &captures);
                self.forward(&group.name, &group.outputs, &copy);
            } else {
                let working = working.get_or_insert_with(|| {
                    let mut base = record.clone();
                    base.trace_depth += 1;
                    base
                });
                group.enrich(working, &captures);
                self.forward(&group.name, &group.outputs, working);
            }

            if self.match_first {
                break;
            }
        }

        if !matched_any {
            metrics::counter!(m::CLASSIFIER_FALLTHROUGH_TOTAL, m::LABEL_NODE => self.name.clone())
                .increment(1);
        }
        if !suppress_fallthrough {
            if let Some(fallthrough) = &self.fallthrough {
                // 원본을 고치지 않고 그대로 넘긴다
                self.forward(FALLTHROUGH_GROUP, &fallthrough.outputs, record);
            }
        }

        if let Some(stats) = stats_guard.as_deref_mut() {
            stats.on_record();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MemoryOutput;
    use crate::state::StateStore;
    use chrono::NaiveDateTime;
    use relaypost_core::{FieldValue, StatePolicy};

    fn record(content: &str) -> Record {
        let ts =
            NaiveDateTime::parse_from_str("2014-12-20 13:21:09", "%Y-%m-%d %H:%M:%S").unwrap();
        Record::new(ts, "publicapi1", content)
    }

    fn context(dir: &std::path::Path) -> BuildContext {
        BuildContext {
            state: Arc::new(
                StateStore::open(dir.join("state.json"), StatePolicy::Preserve).unwrap(),
            ),
            pipeline: relaypost_core::PipelineConfig::default(),
            resume: true,
            test_mode: false,
        }
    }

    fn classifier(params_toml: &str, ctx: &BuildContext) -> Result<RxClassifier, NodeError> {
        let decl = NodeDecl {
            name: "clf".to_owned(),
            node_type: "rx_classifier".to_owned(),
            outputs: Vec::new(),
            params: toml::from_str(params_toml).unwrap(),
        };
        RxClassifier::from_decl(&decl, ctx)
    }

    fn connect(clf: &RxClassifier, sinks: &[(&str, &Arc<MemoryOutput>)]) {
        clf.connect_outputs(
            sinks
                .iter()
                .map(|(name, mem)| NamedSink::new(*name, Arc::clone(mem) as _))
                .collect(),
        );
    }

    // --- 구성 검증 ---

    #[test]
    fn group_with_both_rule_forms_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = classifier(
            "[[groups]]\n\
             name = \"g\"\n\
             rx_list = [\"a\"]\n\
             match_rule = { pattern = \"a\" }\n",
            &context(dir.path()),
        );
        assert!(matches!(result, Err(NodeError::InvalidParams { .. })));
    }

    #[test]
    fn group_without_any_rule_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = classifier(
            "[[groups]]\nname = \"g\"\noutputs = [\"out\"]\n",
            &context(dir.path()),
        );
        assert!(matches!(result, Err(NodeError::InvalidParams { .. })));
    }

    #[test]
    fn fallthrough_group_with_rule_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = classifier(
            "[[groups]]\nname = \"_fallthrough\"\nrx_list = [\"a\"]\n",
            &context(dir.path()),
        );
        assert!(matches!(result, Err(NodeError::InvalidParams { .. })));
    }

    #[test]
    fn bad_pattern_reports_its_group() {
        let dir = tempfile::tempdir().unwrap();
        let result = classifier(
            "[[groups]]\nname = \"auth\"\nrx_list = [\"([unclosed\"]\n",
            &context(dir.path()),
        );
        match result {
            Err(NodeError::Pattern { group, .. }) => assert_eq!(group, "auth"),
            other => panic!("expected pattern error, got {other:?}"),
        }
    }

    #[test]
    fn missing_groups_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = classifier("match_first = true\n", &context(dir.path()));
        assert!(matches!(result, Err(NodeError::InvalidParams { .. })));
    }

    #[test]
    fn configured_outputs_union_group_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let clf = classifier(
            "[[groups]]\n\
             name = \"a\"\n\
             outputs = [\"alerts\", \"archive\"]\n\
             rx_list = [\"a\"]\n\
             [[groups]]\n\
             name = \"b\"\n\
             outputs = [\"archive\", \"console\"]\n\
             rx_list = [\"b\"]\n",
            &context(dir.path()),
        )
        .unwrap();
        assert_eq!(
            clf.configured_outputs(),
            vec!["alerts".to_owned(), "archive".to_owned(), "console".to_owned()]
        );
    }

    // --- 라우팅 ---

    fn two_group_params(match_first: bool) -> String {
        format!(
            "match_first = {match_first}\n\
             [[groups]]\n\
             name = \"nginx\"\n\
             outputs = [\"web\"]\n\
             rx_list = [\"nginx: .*\"]\n\
             [[groups]]\n\
             name = \"errors\"\n\
             outputs = [\"alerts\"]\n\
             rx_list = [\".* 500 .*\"]\n\
             [[groups]]\n\
             name = \"_fallthrough\"\n\
             outputs = [\"catchall\"]\n"
        )
    }

    #[test]
    fn match_all_forwards_to_every_matching_group() {
        let dir = tempfile::tempdir().unwrap();
        let clf = classifier(&two_group_params(false), &context(dir.path())).unwrap();
        let web = Arc::new(MemoryOutput::new("web"));
        let alerts = Arc::new(MemoryOutput::new("alerts"));
        let catchall = Arc::new(MemoryOutput::new("catchall"));
        connect(&clf, &[("web", &web), ("alerts", &alerts), ("catchall", &catchall)]);

        clf.append(&record("nginx: GET / 500 fail"));

        assert_eq!(web.len(), 1);
        assert_eq!(alerts.len(), 1);
        assert!(catchall.is_empty());
        assert_eq!(clf.group_matches("nginx"), 1);
        assert_eq!(clf.group_matches("errors"), 1);
    }

    #[test]
    fn match_first_forwards_only_to_first_group() {
        let dir = tempfile::tempdir().unwrap();
        let clf = classifier(&two_group_params(true), &context(dir.path())).unwrap();
        let web = Arc::new(MemoryOutput::new("web"));
        let alerts = Arc::new(MemoryOutput::new("alerts"));
        connect(&clf, &[("web", &web), ("alerts", &alerts)]);

        clf.append(&record("nginx: GET / 500 fail"));

        assert_eq!(web.len(), 1);
        assert!(alerts.is_empty());
        assert_eq!(clf.group_matches("errors"), 0);
    }

    #[test]
    fn unmatched_record_reaches_only_fallthrough() {
        let dir = tempfile::tempdir().unwrap();
        let clf = classifier(&two_group_params(false), &context(dir.path())).unwrap();
        let web = Arc::new(MemoryOutput::new("web"));
        let catchall = Arc::new(MemoryOutput::new("catchall"));
        connect(&clf, &[("web", &web), ("catchall", &catchall)]);

        clf.append(&record("postfix: queue empty"));

        assert!(web.is_empty());
        assert_eq!(catchall.len(), 1);
    }

    #[test]
    fn fallthrough_record_is_unmodified() {
        let dir = tempfile::tempdir().unwrap();
        let clf = classifier(&two_group_params(false), &context(dir.path())).unwrap();
        let catchall = Arc::new(MemoryOutput::new("catchall"));
        connect(&clf, &[("catchall", &catchall)]);

        let input = record("postfix: queue empty");
        clf.append(&input);

        let received = catchall.records();
        assert_eq!(received[0], input);
        assert!(received[0].group.is_none());
        assert_eq!(received[0].trace_depth, 0);
    }

    #[test]
    fn tap_group_does_not_suppress_fallthrough() {
        let dir = tempfile::tempdir().unwrap();
        let clf = classifier(
            "[[groups]]\n\
             name = \"status_tap\"\n\
             outputs = [\"stats\"]\n\
             rx_list = [\"nginx: .*\"]\n\
             disables_fallthrough = true\n\
             [[groups]]\n\
             name = \"_fallthrough\"\n\
             outputs = [\"catchall\"]\n",
            &context(dir.path()),
        )
        .unwrap();
        let stats = Arc::new(MemoryOutput::new("stats"));
        let catchall = Arc::new(MemoryOutput::new("catchall"));
        connect(&clf, &[("stats", &stats), ("catchall", &catchall)]);

        clf.append(&record("nginx: GET / 200"));

        // 탭 그룹은 전달하되 fallthrough도 막지 않는다
        assert_eq!(stats.len(), 1);
        assert_eq!(catchall.len(), 1);
        assert_eq!(stats.records()[0].group.as_deref(), Some("status_tap"));
        assert!(catchall.records()[0].group.is_none());
    }

    // --- 보강 ---

    #[test]
    fn enrichment_stamps_group_captures_and_depth() {
        let dir = tempfile::tempdir().unwrap();
        let clf = classifier(
            "[[groups]]\n\
             name = \"web\"\n\
             outputs = [\"out\"]\n\
             rx_list = [\"nginx: (?P<client>[0-9.]+) .*\"]\n",
            &context(dir.path()),
        )
        .unwrap();
        let out = Arc::new(MemoryOutput::new("out"));
        connect(&clf, &[("out", &out)]);

        clf.append(&record("nginx: 127.26.132.12 GET /api 200"));

        let received = &out.records()[0];
        assert_eq!(received.group.as_deref(), Some("web"));
        assert_eq!(
            received.extra("client"),
            Some(&FieldValue::from("127.26.132.12"))
        );
        assert_eq!(received.trace_depth, 1);
    }

    #[test]
    fn name_transform_substitutes_captures() {
        let dir = tempfile::tempdir().unwrap();
        let clf = classifier(
            "[[groups]]\n\
             name = \"auth\"\n\
             outputs = [\"out\"]\n\
             rx_list = [\"sshd: (?P<result>\\\\S+) login\"]\n\
             name_transform = \"auth_{result}_{missing}\"\n",
            &context(dir.path()),
        )
        .unwrap();
        let out = Arc::new(MemoryOutput::new("out"));
        connect(&clf, &[("out", &out)]);

        clf.append(&record("sshd: failed login from 10.0.0.1"));

        // 캡처에 없는 자리표시자는 그대로 남는다
        assert_eq!(
            out.records()[0].group.as_deref(),
            Some("auth_failed_{missing}")
        );
    }

    #[test]
    fn shared_working_clone_accumulates_enrichment() {
        let dir = tempfile::tempdir().unwrap();
        let clf = classifier(
            "[[groups]]\n\
             name = \"first\"\n\
             outputs = [\"a\"]\n\
             rx_list = [\"nginx: (?P<client>[0-9.]+) .*\"]\n\
             [[groups]]\n\
             name = \"second\"\n\
             outputs = [\"b\"]\n\
             rx_list = [\"nginx: .* (?P<status>[0-9]+)$\"]\n",
            &context(dir.path()),
        )
        .unwrap();
        let a = Arc::new(MemoryOutput::new("a"));
        let b = Arc::new(MemoryOutput::new("b"));
        connect(&clf, &[("a", &a), ("b", &b)]);

        clf.append(&record("nginx: 127.26.132.12 GET /api 200"));

        // 첫 그룹 출력은 자신의 보강까지만 본다
        let first = &a.records()[0];
        assert_eq!(first.group.as_deref(), Some("first"));
        assert!(first.extra("status").is_none());

        // 둘째 그룹 출력은 앞 그룹의 보강이 누적된 작업 사본을 본다
        let second = &b.records()[0];
        assert_eq!(second.group.as_deref(), Some("second"));
        assert_eq!(
            second.extra("client"),
            Some(&FieldValue::from("127.26.132.12"))
        );
        assert_eq!(second.extra("status"), Some(&FieldValue::from("200")));
        assert_eq!(second.trace_depth, 1);
    }

    #[test]
    fn want_copy_isolates_sibling_groups() {
        let dir = tempfile::tempdir().unwrap();
        let clf = classifier(
            "want_copy = true\n\
             [[groups]]\n\
             name = \"first\"\n\
             outputs = [\"a\"]\n\
             rx_list = [\"nginx: (?P<client>[0-9.]+) .*\"]\n\
             [[groups]]\n\
             name = \"second\"\n\
             outputs = [\"b\"]\n\
             rx_list = [\"nginx: .* (?P<status>[0-9]+)$\"]\n",
            &context(dir.path()),
        )
        .unwrap();
        let a = Arc::new(MemoryOutput::new("a"));
        let b = Arc::new(MemoryOutput::new("b"));
        connect(&clf, &[("a", &a), ("b", &b)]);

        clf.append(&record("nginx: 127.26.132.12 GET /api 200"));

        let second = &b.records()[0];
        assert!(second.extra("client").is_none());
        assert_eq!(second.extra("status"), Some(&FieldValue::from("200")));
    }

    #[test]
    fn groups_match_against_pristine_input() {
        let dir = tempfile::tempdir().unwrap();
        // 둘째 그룹은 첫 그룹이 덧붙인 extradata를 보지 못해야 한다
        let clf = classifier(
            "[[groups]]\n\
             name = \"first\"\n\
             outputs = [\"a\"]\n\
             rx_list = [\"nginx: (?P<client>[0-9.]+) .*\"]\n\
             [[groups]]\n\
             name = \"second\"\n\
             outputs = [\"b\"]\n\
             rx_list = [[\".client\", \".*\"]]\n",
            &context(dir.path()),
        )
        .unwrap();
        let a = Arc::new(MemoryOutput::new("a"));
        let b = Arc::new(MemoryOutput::new("b"));
        connect(&clf, &[("a", &a), ("b", &b)]);

        clf.append(&record("nginx: 127.26.132.12 GET /api 200"));

        assert_eq!(a.len(), 1);
        assert!(b.is_empty());
    }

    #[test]
    fn match_rule_group_routes_records() {
        let dir = tempfile::tempdir().unwrap();
        let clf = classifier(
            "[[groups]]\n\
             name = \"public_web\"\n\
             outputs = [\"out\"]\n\
             match_rule = { all = [ { field = \"host\", pattern = \"public\" }, { any = [ { pattern = \"nginx\" }, { pattern = \"apache\" } ] } ] }\n",
            &context(dir.path()),
        )
        .unwrap();
        let out = Arc::new(MemoryOutput::new("out"));
        connect(&clf, &[("out", &out)]);

        clf.append(&record("nginx: GET / 200"));
        clf.append(&record("sshd: login"));

        assert_eq!(out.len(), 1);
        assert_eq!(out.records()[0].content, "nginx: GET / 200");
    }

    #[test]
    fn unknown_output_is_skipped_and_rest_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let clf = classifier(
            "[[groups]]\n\
             name = \"web\"\n\
             outputs = [\"ghost\", \"out\"]\n\
             rx_list = [\"nginx: .*\"]\n",
            &context(dir.path()),
        )
        .unwrap();
        let out = Arc::new(MemoryOutput::new("out"));
        connect(&clf, &[("out", &out)]);

        clf.append(&record("nginx: GET / 200"));
        clf.append(&record("nginx: GET /again 200"));

        assert_eq!(out.len(), 2);
    }

    // --- 통계 ---

    #[test]
    fn stats_report_written_at_flush_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());
        ctx.pipeline.stats_dir = dir.path().display().to_string();
        ctx.pipeline.stats_flush_every = 2;

        let clf = classifier(
            "track_stats = true\n\
             [[groups]]\n\
             name = \"web\"\n\
             outputs = [\"out\"]\n\
             rx_list = [\"nginx: .*\"]\n",
            &ctx,
        )
        .unwrap();
        let out = Arc::new(MemoryOutput::new("out"));
        connect(&clf, &[("out", &out)]);

        let report = dir.path().join("relaypost_stats_clf.json");
        clf.append(&record("nginx: GET / 200"));
        assert!(!report.exists());
        clf.append(&record("sshd: miss"));
        assert!(report.exists());

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
        assert_eq!(parsed["web"]["nginx: .*"]["evaluations"], 2);
        assert_eq!(parsed["web"]["nginx: .*"]["matches"], 1);
    }

    #[test]
    fn stop_flushes_pending_stats() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());
        ctx.pipeline.stats_dir = dir.path().display().to_string();

        let clf = classifier(
            "track_stats = true\n\
             [[groups]]\n\
             name = \"web\"\n\
             outputs = [\"out\"]\n\
             rx_list = [\"nginx: .*\"]\n",
            &ctx,
        )
        .unwrap();
        let out = Arc::new(MemoryOutput::new("out"));
        connect(&clf, &[("out", &out)]);

        clf.append(&record("nginx: GET / 200"));
        let report = dir.path().join("relaypost_stats_clf.json");
        assert!(!report.exists());

        clf.stop();
        assert!(report.exists());
    }
}
