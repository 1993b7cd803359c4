//! 설정 관리. relaypost.toml 파싱 및 런타임 설정
//!
//! [`RelaypostConfig`]는 데몬과 파이프라인 전체의 설정을 담는 최상위
//! 구조체입니다. 노드 토폴로지는 `[[node]]` 테이블 배열로 선언하며
//! 선언 순서가 곧 그래프 순회 순서입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`RELAYPOST_PIPELINE_STATE_FILE=/tmp/state.json` 형식)
//! 3. 설정 파일 (`relaypost.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # fn example() -> Result<(), relaypost_core::error::RelaypostError> {
//! use relaypost_core::config::RelaypostConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = RelaypostConfig::load("relaypost.toml")?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = RelaypostConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, RelaypostError};

/// Relaypost 통합 설정
///
/// `relaypost.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelaypostConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 파이프라인 전역 설정
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// 메트릭 노출 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// 노드 선언 목록 (`[[node]]`)
    #[serde(default, rename = "node")]
    pub nodes: Vec<NodeDecl>,
}

impl RelaypostConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RelaypostError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RelaypostError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RelaypostError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                RelaypostError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, RelaypostError> {
        toml::from_str(toml_str).map_err(|e| {
            RelaypostError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `RELAYPOST_{SECTION}_{FIELD}`
    /// 예: `RELAYPOST_PIPELINE_STATE_FILE=/tmp/state.json`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "RELAYPOST_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "RELAYPOST_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "RELAYPOST_GENERAL_PID_FILE");

        // Pipeline
        override_string(
            &mut self.pipeline.state_file,
            "RELAYPOST_PIPELINE_STATE_FILE",
        );
        override_string(&mut self.pipeline.stats_dir, "RELAYPOST_PIPELINE_STATS_DIR");
        override_u32(
            &mut self.pipeline.persist_every_lines,
            "RELAYPOST_PIPELINE_PERSIST_EVERY_LINES",
        );
        override_u64(
            &mut self.pipeline.stats_flush_every,
            "RELAYPOST_PIPELINE_STATS_FLUSH_EVERY",
        );
        override_u64(
            &mut self.pipeline.idle_sleep_secs,
            "RELAYPOST_PIPELINE_IDLE_SLEEP_SECS",
        );
        override_u64(
            &mut self.pipeline.reopen_backoff_secs,
            "RELAYPOST_PIPELINE_REOPEN_BACKOFF_SECS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "RELAYPOST_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "RELAYPOST_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "RELAYPOST_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// 노드 선언 자체는 여기서 검증하지 않습니다. 잘못된 노드는 그래프
    /// 구성 단계에서 에러 로그와 함께 건너뛰어 나머지 파이프라인이
    /// 계속 동작하도록 합니다.
    pub fn validate(&self) -> Result<(), RelaypostError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        // worker_model 검증: 설정 어휘로는 존재하지만 프로세스 모델은
        // 아직 구현되지 않았으므로 명시적으로 거부합니다.
        if self.pipeline.worker_model == WorkerModel::Processes {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.worker_model".to_owned(),
                reason: "'processes' is not implemented, use 'threads'".to_owned(),
            }
            .into());
        }

        if self.pipeline.state_file.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.state_file".to_owned(),
                reason: "must not be empty".to_owned(),
            }
            .into());
        }

        if self.pipeline.persist_every_lines == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.persist_every_lines".to_owned(),
                reason: "must be at least 1".to_owned(),
            }
            .into());
        }

        if self.pipeline.stats_flush_every == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.stats_flush_every".to_owned(),
                reason: "must be at least 1".to_owned(),
            }
            .into());
        }

        // 메트릭이 켜진 경우에만 수신 주소를 검증합니다.
        if self.metrics.enabled && self.metrics.listen_addr.parse::<std::net::IpAddr>().is_err() {
            return Err(ConfigError::InvalidValue {
                field: "metrics.listen_addr".to_owned(),
                reason: format!("'{}' is not a valid IP address", self.metrics.listen_addr),
            }
            .into());
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: "/var/run/relaypost.pid".to_owned(),
        }
    }
}

/// 워커 실행 모델
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerModel {
    /// 소스 노드마다 스레드 하나 (기본)
    #[default]
    Threads,
    /// 프로세스 분리 모델. 설정 어휘로만 예약되어 있습니다.
    Processes,
}

impl fmt::Display for WorkerModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerModel::Threads => f.write_str("threads"),
            WorkerModel::Processes => f.write_str("processes"),
        }
    }
}

/// 재시작 시 저장된 상태 처리 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatePolicy {
    /// 저장된 오프셋/타임스탬프에서 이어서 처리 (기본)
    #[default]
    Preserve,
    /// 저장된 상태를 버리고 처음부터 시작
    Reset,
}

impl fmt::Display for StatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatePolicy::Preserve => f.write_str("preserve"),
            StatePolicy::Reset => f.write_str("reset"),
        }
    }
}

/// 파이프라인 전역 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 상태 스냅샷 파일 경로
    pub state_file: String,
    /// 재시작 시 저장된 상태 처리 방식 (preserve, reset)
    pub state_policy: StatePolicy,
    /// 워커 실행 모델 (threads, processes)
    pub worker_model: WorkerModel,
    /// 분류기 통계 리포트 디렉토리
    pub stats_dir: String,
    /// 소스 오프셋을 저장하는 주기 (라인 수)
    pub persist_every_lines: u32,
    /// 분류기 통계 리포트 주기 (레코드 수)
    pub stats_flush_every: u64,
    /// 소스가 비어 있을 때 대기하는 시간 (초)
    pub idle_sleep_secs: u64,
    /// 대상 파일 확인 실패 후 재시도 대기 시간 (초)
    pub reopen_backoff_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            state_file: "relaypost_state.json".to_owned(),
            state_policy: StatePolicy::Preserve,
            worker_model: WorkerModel::Threads,
            stats_dir: ".".to_owned(),
            persist_every_lines: 100,
            stats_flush_every: 50_000,
            idle_sleep_secs: 2,
            reopen_backoff_secs: 1,
        }
    }
}

/// 메트릭 노출 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus HTTP 엔드포인트 활성화 여부
    pub enabled: bool,
    /// 수신 주소
    pub listen_addr: String,
    /// 수신 포트
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9184,
        }
    }
}

/// 노드 선언 한 건 (`[[node]]` 테이블)
///
/// `name`, `type`, `outputs`를 제외한 나머지 키는 노드 타입별
/// 파라미터로 그대로 전달됩니다. 이름/타입이 빠진 선언은 파싱
/// 단계에서는 통과하고 그래프 구성 단계에서 건너뜁니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeDecl {
    /// 그래프 안에서 유일한 노드 이름
    #[serde(default)]
    pub name: String,
    /// 노드 타입 태그
    #[serde(default, rename = "type")]
    pub node_type: String,
    /// 다운스트림 노드 이름 목록
    #[serde(default)]
    pub outputs: Vec<String>,
    /// 노드 타입별 파라미터 (남은 키 전부)
    #[serde(flatten)]
    pub params: toml::Table,
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
