//! 분류 규칙 컴파일과 평가
//!
//! 그룹 선언의 `rx_list` 항목과 `match_rule` 트리를 컴파일된 매처로
//! 바꿉니다. 패턴은 필드 값의 머리에 고정되어 (`\A(?:...)`) 평가되며,
//! 같은 패턴 텍스트는 분류기 인스턴스 안에서 한 번만 컴파일됩니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use relaypost_core::{FieldRef, Record, RecordAttr};

use super::stats::{StatsTracker, SLOW_PATTERN_THRESHOLD};

/// `rx_list` 항목. 바로 쓴 패턴은 `content` 필드를 대상으로 하고,
/// `["필드", "패턴"]` 쌍은 대상 필드를 지정합니다.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RxEntry {
    Pattern(String),
    FieldPattern(String, String),
}

impl RxEntry {
    pub(crate) fn compile(&self, cache: &mut RegexCache) -> Result<FieldMatcher, String> {
        match self {
            RxEntry::Pattern(pattern) => FieldMatcher::new(None, pattern, cache),
            RxEntry::FieldPattern(field, pattern) => {
                FieldMatcher::new(Some(field), pattern, cache)
            }
        }
    }
}

/// `match_rule` 선언 트리
///
/// `all = [...]`, `any = [...]` 결합자와 `{field?, pattern}` 리프로
/// 이루어집니다. 같은 테이블에 여러 키가 있으면 `all`, `any`, 리프
/// 순서로 먼저 해석되는 형태가 이깁니다.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MatchRuleDecl {
    All {
        all: Vec<MatchRuleDecl>,
    },
    Any {
        any: Vec<MatchRuleDecl>,
    },
    Leaf {
        #[serde(default)]
        field: Option<String>,
        pattern: String,
    },
}

impl MatchRuleDecl {
    pub(crate) fn compile(&self, cache: &mut RegexCache) -> Result<MatchRule, String> {
        match self {
            MatchRuleDecl::All { all } => Ok(MatchRule::All(
                all.iter()
                    .map(|decl| decl.compile(cache))
                    .collect::<Result<_, _>>()?,
            )),
            MatchRuleDecl::Any { any } => Ok(MatchRule::Any(
                any.iter()
                    .map(|decl| decl.compile(cache))
                    .collect::<Result<_, _>>()?,
            )),
            MatchRuleDecl::Leaf { field, pattern } => Ok(MatchRule::Leaf(FieldMatcher::new(
                field.as_deref(),
                pattern,
                cache,
            )?)),
        }
    }
}

/// 분류기 인스턴스가 소유하는 정규식 캐시
///
/// 키는 선언에 쓴 패턴 텍스트 그대로이고, 값은 머리 고정 형태로
/// 컴파일된 정규식입니다.
pub(crate) struct RegexCache {
    compiled: HashMap<String, Arc<Regex>>,
}

impl RegexCache {
    pub(crate) fn new() -> Self {
        Self {
            compiled: HashMap::new(),
        }
    }

    pub(crate) fn compile(&mut self, pattern: &str) -> Result<Arc<Regex>, String> {
        if let Some(regex) = self.compiled.get(pattern) {
            return Ok(Arc::clone(regex));
        }
        let regex = Regex::new(&format!(r"\A(?:{pattern})"))
            .map(Arc::new)
            .map_err(|err| err.to_string())?;
        self.compiled.insert(pattern.to_owned(), Arc::clone(&regex));
        Ok(regex)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.compiled.len()
    }
}

/// 필드 하나를 패턴 하나와 비교하는 컴파일된 매처
pub(crate) struct FieldMatcher {
    field: FieldRef,
    pattern: String,
    regex: Arc<Regex>,
}

impl FieldMatcher {
    pub(crate) fn new(
        field: Option<&str>,
        pattern: &str,
        cache: &mut RegexCache,
    ) -> Result<Self, String> {
        let field = match field {
            Some(name) => FieldRef::parse(name).map_err(|err| err.to_string())?,
            None => FieldRef::Attr(RecordAttr::Content),
        };
        let regex = cache.compile(pattern)?;
        Ok(Self {
            field,
            pattern: pattern.to_owned(),
            regex,
        })
    }

    pub(crate) fn pattern(&self) -> &str {
        &self.pattern
    }

    /// 레코드의 대상 필드를 평가합니다. 일치하면 이름 있는 캡처가
    /// 컨텍스트에 쌓입니다. 비어 있는 필드는 일치하지 않습니다.
    pub(crate) fn try_match(&self, record: &Record, ctx: &mut EvalContext<'_>) -> bool {
        let started = ctx.timer();
        let matched = self.captures_into(record, &mut ctx.captures);
        ctx.observe(&self.pattern, started, matched);
        matched
    }

    fn captures_into(&self, record: &Record, captures: &mut Vec<(String, String)>) -> bool {
        let Some(value) = record.field(&self.field) else {
            return false;
        };
        let Some(caps) = self.regex.captures(&value) else {
            return false;
        };
        for name in self.regex.capture_names().flatten() {
            if let Some(found) = caps.name(name) {
                captures.push((name.to_owned(), found.as_str().to_owned()));
            }
        }
        true
    }
}

/// 컴파일된 `match_rule` 트리
pub(crate) enum MatchRule {
    All(Vec<MatchRule>),
    Any(Vec<MatchRule>),
    Leaf(FieldMatcher),
}

impl MatchRule {
    /// 게으른 단락 평가. 실제로 평가되어 일치한 리프의 캡처만
    /// 수집됩니다. 빈 `all`은 참, 빈 `any`는 거짓입니다.
    pub(crate) fn evaluate(&self, record: &Record, ctx: &mut EvalContext<'_>) -> bool {
        match self {
            MatchRule::Leaf(matcher) => matcher.try_match(record, ctx),
            MatchRule::All(rules) => {
                for rule in rules {
                    if !rule.evaluate(record, ctx) {
                        return false;
                    }
                }
                true
            }
            MatchRule::Any(rules) => {
                for rule in rules {
                    if rule.evaluate(record, ctx) {
                        return true;
                    }
                }
                false
            }
        }
    }
}

/// 규칙 평가 한 번의 공유 문맥
///
/// 일치한 리프의 캡처를 모으고, 통계가 켜져 있으면 패턴별 평가
/// 시간을 기록합니다.
pub(crate) struct EvalContext<'a> {
    node: &'a str,
    group: &'a str,
    pub(crate) captures: Vec<(String, String)>,
    stats: Option<&'a mut StatsTracker>,
}

impl<'a> EvalContext<'a> {
    pub(crate) fn new(node: &'a str, group: &'a str, stats: Option<&'a mut StatsTracker>) -> Self {
        Self {
            node,
            group,
            captures: Vec::new(),
            stats,
        }
    }

    /// 통계가 켜져 있을 때만 시간을 잽니다.
    fn timer(&self) -> Option<Instant> {
        self.stats.is_some().then(Instant::now)
    }

    fn observe(&mut self, pattern: &str, started: Option<Instant>, matched: bool) {
        let Some(started) = started else {
            return;
        };
        let elapsed = started.elapsed();
        if elapsed >= SLOW_PATTERN_THRESHOLD {
            warn!(
                node = %self.node,
                group = %self.group,
                pattern = %pattern,
                elapsed_ms = elapsed.as_millis() as u64,
                "pathologically slow pattern evaluation"
            );
        }
        if let Some(stats) = self.stats.as_mut() {
            stats.record(self.group, pattern, elapsed, matched);
        }
    }
}
