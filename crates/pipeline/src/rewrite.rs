//! 재작성 노드
//!
//! 레코드 필드의 문자열을 규칙 순서대로 바꿔 출력으로 넘기는 중간
//! 노드입니다. 규칙은 리터럴 치환(`replace`, 기본) 또는 정규식
//! 치환(`regexp`)이며, 분류기 패턴과 달리 필드 머리에 고정되지 않고
//! 모든 출현을 바꿉니다.
//!
//! 받은 레코드는 고치지 않습니다. 수정은 사본 위에서 일어나고
//! 사본이 브로드캐스트됩니다.

use std::sync::{Arc, Mutex};

use regex::Regex;
use serde::Deserialize;

use relaypost_core::{FieldRef, NamedSink, Node, NodeDecl, NodeError, Record, RecordAttr, RecordSink};

/// 치환 방식
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RuleKind {
    /// 리터럴 문자열 치환
    #[default]
    Replace,
    /// 정규식 치환. 치환문에서 `$1`, `$이름` 참조를 쓸 수 있습니다.
    Regexp,
}

/// 재작성 규칙 선언
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleDecl {
    /// 대상 필드. `.`으로 시작하면 extradata 키.
    field: String,
    pattern: String,
    replace: String,
    #[serde(default)]
    kind: RuleKind,
}

/// `rewriter` 노드 파라미터
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RewriterParams {
    rules: Vec<RuleDecl>,
}

enum Replacer {
    Literal(String),
    Regexp(Regex),
}

struct RewriteRule {
    field: FieldRef,
    replacer: Replacer,
    replacement: String,
}

impl RewriteRule {
    /// 대상 필드가 있으면 치환을 적용합니다. 없는 필드는 건너뜁니다.
    ///
    /// 값이 실제로 바뀔 때만 기록하므로, 일치하지 않은 숫자
    /// extradata는 숫자로 남습니다 (바뀌면 텍스트가 됩니다).
    fn apply(&self, record: &mut Record) {
        let rewritten = match record.field(&self.field) {
            Some(value) => {
                let new_value = match &self.replacer {
                    Replacer::Literal(pattern) => {
                        value.replace(pattern.as_str(), &self.replacement)
                    }
                    Replacer::Regexp(regex) => regex
                        .replace_all(value.as_ref(), self.replacement.as_str())
                        .into_owned(),
                };
                (new_value != value.as_ref()).then_some(new_value)
            }
            None => None,
        };
        if let Some(new_value) = rewritten {
            record.set_field(&self.field, new_value);
        }
    }
}

/// 필드 문자열을 치환해 전달하는 중간 노드
pub struct Rewriter {
    name: String,
    configured_outputs: Vec<String>,
    sinks: Mutex<Vec<NamedSink>>,
    rules: Vec<RewriteRule>,
}

impl Rewriter {
    /// 노드 선언에서 재작성기를 구성합니다. 타임스탬프는 치환 대상이
    /// 될 수 없고, 정규식은 여기서 컴파일됩니다.
    pub fn from_decl(decl: &NodeDecl) -> Result<Self, NodeError> {
        let params: RewriterParams =
            decl.params
                .clone()
                .try_into()
                .map_err(|err: toml::de::Error| NodeError::InvalidParams {
                    node: decl.name.clone(),
                    reason: err.to_string(),
                })?;

        let mut rules = Vec::with_capacity(params.rules.len());
        for rule in &params.rules {
            let field =
                FieldRef::parse(&rule.field).map_err(|err| NodeError::InvalidParams {
                    node: decl.name.clone(),
                    reason: format!("bad field '{}': {err}", rule.field),
                })?;
            if field == FieldRef::Attr(RecordAttr::Timestamp) {
                return Err(NodeError::InvalidParams {
                    node: decl.name.clone(),
                    reason: "timestamp cannot be rewritten".to_owned(),
                });
            }
            let replacer = match rule.kind {
                RuleKind::Replace => Replacer::Literal(rule.pattern.clone()),
                RuleKind::Regexp => Replacer::Regexp(Regex::new(&rule.pattern).map_err(
                    |err| NodeError::InvalidParams {
                        node: decl.name.clone(),
                        reason: format!("bad pattern '{}': {err}", rule.pattern),
                    },
                )?),
            };
            rules.push(RewriteRule {
                field,
                replacer,
                replacement: rule.replace.clone(),
            });
        }

        Ok(Self {
            name: decl.name.clone(),
            configured_outputs: decl.outputs.clone(),
            sinks: Mutex::new(Vec::new()),
            rules,
        })
    }
}

impl Node for Rewriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn node_type(&self) -> &'static str {
        "rewriter"
    }

    fn configured_outputs(&self) -> Vec<String> {
        self.configured_outputs.clone()
    }

    fn connect_outputs(&self, outputs: Vec<NamedSink>) {
        *self.sinks.lock().unwrap_or_else(|e| e.into_inner()) = outputs;
    }

    fn as_sink(self: Arc<Self>) -> Option<Arc<dyn RecordSink>> {
        Some(self)
    }
}

impl RecordSink for Rewriter {
    fn append(&self, record: &Record) {
        let mut rewritten = record.clone();
        for rule in &self.rules {
            rule.apply(&mut rewritten);
        }

        // 다운스트림 append 동안 잠금을 잡지 않는다
        let sinks: Vec<NamedSink> = self.sinks.lock().unwrap_or_else(|e| e.into_inner()).clone();
        for sink in &sinks {
            sink.sink.append(&rewritten);
        }
    }
}
