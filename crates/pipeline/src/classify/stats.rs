//! 분류기 패턴 성능 통계
//!
//! `track_stats`가 켜진 분류기가 패턴별 평가/일치 횟수와 누적 평가
//! 시간을 모았다가 주기적으로 JSON 보고서로 남깁니다. 운영 중 느린
//! 패턴을 찾아내는 용도입니다.
//!
//! 보고서는 `relaypost_stats_<노드>.json` 이름으로 통계 디렉터리에
//! 쓰이며, `{그룹: {패턴: {evaluations, matches, total_time}}}` 형태
//! 입니다.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

/// 평가 한 번이 이보다 오래 걸리면 즉시 경고합니다.
pub(crate) const SLOW_PATTERN_THRESHOLD: Duration = Duration::from_secs(1);

/// 패턴 하나의 누적 성능
#[derive(Debug, Default, Clone, Serialize)]
pub(crate) struct PatternStats {
    pub(crate) evaluations: u64,
    pub(crate) matches: u64,
    /// 누적 평가 시간 (초)
    pub(crate) total_time: f64,
}

/// 분류기 하나가 소유하는 패턴 통계 수집기
pub(crate) struct StatsTracker {
    node: String,
    report_path: PathBuf,
    flush_every: u64,
    since_flush: u64,
    groups: BTreeMap<String, BTreeMap<String, PatternStats>>,
}

impl StatsTracker {
    pub(crate) fn new(
        node: impl Into<String>,
        stats_dir: impl AsRef<Path>,
        flush_every: u64,
    ) -> Self {
        let node = node.into();
        let report_path = stats_dir
            .as_ref()
            .join(format!("relaypost_stats_{node}.json"));
        Self {
            node,
            report_path,
            flush_every: flush_every.max(1),
            since_flush: 0,
            groups: BTreeMap::new(),
        }
    }

    pub(crate) fn report_path(&self) -> &Path {
        &self.report_path
    }

    /// 패턴 평가 한 건을 기록합니다.
    pub(crate) fn record(&mut self, group: &str, pattern: &str, elapsed: Duration, matched: bool) {
        let entry = self
            .groups
            .entry(group.to_owned())
            .or_default()
            .entry(pattern.to_owned())
            .or_default();
        entry.evaluations += 1;
        if matched {
            entry.matches += 1;
        }
        entry.total_time += elapsed.as_secs_f64();
    }

    /// 레코드 한 건 처리를 알립니다. 플러시 주기가 찼으면 보고서를
    /// 씁니다.
    pub(crate) fn on_record(&mut self) {
        self.since_flush += 1;
        if self.since_flush >= self.flush_every {
            self.flush();
        }
    }

    /// 보고서 파일을 덮어씁니다. 실패는 경고로만 남기고 수집은
    /// 계속됩니다.
    pub(crate) fn flush(&mut self) {
        self.since_flush = 0;
        let json = match serde_json::to_string_pretty(&self.groups) {
            Ok(json) => json,
            Err(err) => {
                warn!(node = %self.node, error = %err, "failed to serialize stats report");
                return;
            }
        };
        if let Err(err) = fs::write(&self.report_path, json) {
            warn!(
                node = %self.node,
                path = %self.report_path.display(),
                error = %err,
                "failed to write stats report"
            );
        } else {
            debug!(
                node = %self.node,
                path = %self.report_path.display(),
                "stats report written"
            );
        }
    }
}
