//! 파일 소스 노드
//!
//! [`FileSource`]는 테일러가 올린 라인을 파싱해 레코드로 만들고, 연결된
//! 출력들에 동기적으로 브로드캐스트하는 워커 스레드를 소유합니다.
//!
//! # 캐치업
//!
//! 재시작 후에는 저장된 `last_msg_ts` 이전의 레코드를 건너뛰어 중복
//! 전달을 줄입니다. 타임스탬프는 초 단위 정밀도이므로 경계 초의
//! 레코드는 다시 전달될 수 있습니다 -- 유실 대신 중복을 택합니다
//! (at-least-once).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::{error, info, warn};

use relaypost_core::metrics as m;
use relaypost_core::{NamedSink, Node, NodeDecl, NodeError};

use crate::parser::ParserSet;
use crate::registry::BuildContext;
use crate::state::{StateStore, StateValue};
use crate::tail::{FileTail, TailConfig};

/// 재시작 직후의 중복 억제 필터
///
/// 저장된 `last_msg_ts`를 기준으로, 그보다 엄밀히 과거인 레코드를
/// 세면서 버립니다. 기준 이상의 레코드가 처음 나타나면 초기화 단계가
/// 끝나고 이후로는 모든 레코드를 통과시킵니다.
#[derive(Debug)]
pub struct CatchupFilter {
    threshold: Option<NaiveDateTime>,
    initializing: bool,
    skipped: u64,
}

impl CatchupFilter {
    /// 기준 타임스탬프로 필터를 만듭니다. `None`이면 필터링 없이
    /// 즉시 전달 모드로 시작합니다.
    pub fn new(threshold: Option<NaiveDateTime>) -> Self {
        Self {
            initializing: threshold.is_some(),
            threshold,
            skipped: 0,
        }
    }

    /// 이 타임스탬프의 레코드를 전달해야 하면 `true`
    ///
    /// 기준과 같은 초의 레코드는 전달합니다. `>` 대신 `>=`를 쓰면
    /// 같은 초에서 아직 못 본 라인을 잃을 수 있기 때문입니다.
    pub fn should_deliver(&mut self, timestamp: NaiveDateTime) -> bool {
        if !self.initializing {
            return true;
        }
        if let Some(threshold) = self.threshold {
            if timestamp < threshold {
                self.skipped += 1;
                return false;
            }
        }
        self.initializing = false;
        true
    }

    /// 아직 초기화(캐치업) 단계인지
    pub fn is_initializing(&self) -> bool {
        self.initializing
    }

    /// 지금까지 건너뛴 레코드 수
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

/// 소스 공통의 파싱-캐치업-브로드캐스트 경로
///
/// 파일 소스와 소켓 소스가 같은 전달 규칙을 공유합니다. 라인 하나가
/// 레코드가 되어 연결된 모든 출력에 선언 순서대로, 동기적으로
/// 전달됩니다. 전달된 레코드의 타임스탬프는 메모리 상태의
/// `last_msg_ts`에 남습니다 (플러시는 소스의 배치 주기를 따름).
pub(crate) struct Broadcaster {
    name: String,
    parsers: Arc<ParserSet>,
    sinks: Vec<NamedSink>,
    catchup: CatchupFilter,
    state: Arc<StateStore>,
}

impl Broadcaster {
    pub(crate) fn new(
        name: impl Into<String>,
        parsers: Arc<ParserSet>,
        sinks: Vec<NamedSink>,
        catchup: CatchupFilter,
        state: Arc<StateStore>,
    ) -> Self {
        Self {
            name: name.into(),
            parsers,
            sinks,
            catchup,
            state,
        }
    }

    pub(crate) fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub(crate) fn is_catching_up(&self) -> bool {
        self.catchup.is_initializing()
    }

    /// 원시 라인 하나를 처리합니다.
    pub(crate) fn handle_line(&mut self, line: &str) {
        metrics::counter!(m::SOURCE_LINES_READ_TOTAL, m::LABEL_NODE => self.name.clone())
            .increment(1);

        // 파싱 실패는 오류가 아니라 필터링
        let Some(record) = self.parsers.parse(line) else {
            metrics::counter!(m::SOURCE_PARSE_FAILURES_TOTAL, m::LABEL_NODE => self.name.clone())
                .increment(1);
            return;
        };
        metrics::counter!(m::SOURCE_RECORDS_PARSED_TOTAL, m::LABEL_NODE => self.name.clone())
            .increment(1);

        let was_initializing = self.catchup.is_initializing();
        if !self.catchup.should_deliver(record.timestamp) {
            metrics::counter!(m::SOURCE_RECORDS_SKIPPED_TOTAL, m::LABEL_NODE => self.name.clone())
                .increment(1);
            return;
        }
        if was_initializing {
            info!(
                node = %self.name,
                skipped = self.catchup.skipped(),
                "catch-up finished"
            );
        }

        for sink in &self.sinks {
            sink.sink.append(&record);
        }
        self.state.set(
            &self.name,
            "last_msg_ts",
            StateValue::Timestamp(record.timestamp),
        );
    }
}

/// `syslog_file` 노드 파라미터
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSourceParams {
    /// 감시 대상 경로. strftime 템플릿 가능, `-`는 stdin.
    path: String,
    /// EOF에서 워커를 깨끗하게 종료할지
    #[serde(default)]
    stop_on_eof: bool,
    /// 파서 포맷 이름. 생략하면 기본 파서들을 순서대로 시도합니다.
    #[serde(default)]
    parser: Option<String>,
    /// 저장된 위치에서 이어읽기할지 (전역 resume과 AND로 결합)
    #[serde(default = "default_resume")]
    resume: bool,
}

fn default_resume() -> bool {
    true
}

/// 로그 파일을 테일링해 레코드를 퍼뜨리는 소스 노드
pub struct FileSource {
    name: String,
    configured_outputs: Vec<String>,
    sinks: Mutex<Vec<NamedSink>>,
    tail: Mutex<Option<FileTail>>,
    parsers: Arc<ParserSet>,
    resume: bool,
    state: Arc<StateStore>,
    stop: Arc<AtomicBool>,
}

impl FileSource {
    /// 노드 선언에서 소스를 구성합니다.
    ///
    /// 경로 템플릿 검증과 파서 이름 해석이 여기서 일어나므로, 잘못된
    /// 선언은 그래프 구성 단계에서 걸러집니다.
    pub fn from_decl(decl: &NodeDecl, ctx: &BuildContext) -> Result<Self, NodeError> {
        let params: FileSourceParams =
            decl.params
                .clone()
                .try_into()
                .map_err(|err: toml::de::Error| NodeError::InvalidParams {
                    node: decl.name.clone(),
                    reason: err.to_string(),
                })?;

        let parsers = match &params.parser {
            Some(format) => {
                ParserSet::for_format(format).ok_or_else(|| NodeError::InvalidParams {
                    node: decl.name.clone(),
                    reason: format!("unknown parser format '{format}'"),
                })?
            }
            None => ParserSet::with_defaults(),
        };

        let stop = Arc::new(AtomicBool::new(false));
        let resume = ctx.resume && params.resume;
        let tail = FileTail::new(
            TailConfig {
                path: params.path,
                stop_on_eof: params.stop_on_eof,
                resume,
                persist_every_lines: ctx.pipeline.persist_every_lines,
                idle_sleep: Duration::from_secs(ctx.pipeline.idle_sleep_secs),
                reopen_backoff: Duration::from_secs(ctx.pipeline.reopen_backoff_secs),
            },
            decl.name.clone(),
            Arc::clone(&ctx.state),
            Arc::clone(&stop),
        )?;

        Ok(Self {
            name: decl.name.clone(),
            configured_outputs: decl.outputs.clone(),
            sinks: Mutex::new(Vec::new()),
            tail: Mutex::new(Some(tail)),
            parsers: Arc::new(parsers),
            resume,
            state: Arc::clone(&ctx.state),
            stop,
        })
    }

    /// 저장된 캐치업 기준 타임스탬프. resume이 꺼져 있으면 없음.
    fn catchup_threshold(&self) -> Option<NaiveDateTime> {
        if !self.resume {
            return None;
        }
        self.state
            .get(&self.name, "last_msg_ts")
            .and_then(|v| v.as_timestamp())
    }

    /// 워커 본체. 테일 -> 파싱 -> 캐치업 -> 브로드캐스트.
    fn run_worker(&self) {
        let Some(mut tail) = self
            .tail
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            error!(node = %self.name, "source started twice, worker not running");
            return;
        };

        let sinks: Vec<NamedSink> = self
            .sinks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if sinks.is_empty() {
            warn!(node = %self.name, "source has no connected outputs");
        }

        let mut broadcaster = Broadcaster::new(
            self.name.clone(),
            Arc::clone(&self.parsers),
            sinks,
            CatchupFilter::new(self.catchup_threshold()),
            Arc::clone(&self.state),
        );

        info!(
            node = %self.name,
            path = %tail.current_path(),
            outputs = broadcaster.sink_count(),
            catching_up = broadcaster.is_catching_up(),
            "source worker started"
        );

        while let Some(line) = tail.next_line() {
            broadcaster.handle_line(&line);
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
        }

        info!(node = %self.name, "source worker stopped");
    }
}

impl Node for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn node_type(&self) -> &'static str {
        "syslog_file"
    }

    fn configured_outputs(&self) -> Vec<String> {
        self.configured_outputs.clone()
    }

    fn connect_outputs(&self, outputs: Vec<NamedSink>) {
        *self.sinks.lock().unwrap_or_else(|e| e.into_inner()) = outputs;
    }

    fn start(self: Arc<Self>) -> Option<JoinHandle<()>> {
        let name = self.name.clone();
        match std::thread::Builder::new()
            .name(format!("source-{name}"))
            .spawn(move || self.run_worker())
        {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!(node = %name, error = %err, "failed to spawn source worker");
                None
            }
        }
    }

    fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
