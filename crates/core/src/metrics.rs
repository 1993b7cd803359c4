//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `relaypost_`
//! - 모듈명: `source_`, `classifier_`, `output_`, `state_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (gauge/시간), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(relaypost_core::metrics::SOURCE_LINES_READ_TOTAL, "node" => name).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 노드 이름 레이블 키
pub const LABEL_NODE: &str = "node";

/// 분류 그룹 레이블 키
pub const LABEL_GROUP: &str = "group";

// ─── Source 메트릭 ──────────────────────────────────────────────────

/// Source: 읽어들인 원본 라인 수 (counter, label: node)
pub const SOURCE_LINES_READ_TOTAL: &str = "relaypost_source_lines_read_total";

/// Source: 파싱에 성공한 레코드 수 (counter, label: node)
pub const SOURCE_RECORDS_PARSED_TOTAL: &str = "relaypost_source_records_parsed_total";

/// Source: 파싱에 실패한 라인 수 (counter, label: node)
pub const SOURCE_PARSE_FAILURES_TOTAL: &str = "relaypost_source_parse_failures_total";

/// Source: 따라잡기 필터가 버린 레코드 수 (counter, label: node)
pub const SOURCE_RECORDS_SKIPPED_TOTAL: &str = "relaypost_source_records_skipped_total";

/// Source: 대상 파일을 다시 연 횟수 (counter, label: node)
pub const SOURCE_REOPENS_TOTAL: &str = "relaypost_source_reopens_total";

// ─── Classifier 메트릭 ──────────────────────────────────────────────

/// Classifier: 수신한 레코드 수 (counter, label: node)
pub const CLASSIFIER_RECORDS_TOTAL: &str = "relaypost_classifier_records_total";

/// Classifier: 그룹별 매칭 수 (counter, labels: node, group)
pub const CLASSIFIER_GROUP_MATCHES_TOTAL: &str = "relaypost_classifier_group_matches_total";

/// Classifier: 어느 그룹에도 매칭되지 않은 레코드 수 (counter, label: node)
pub const CLASSIFIER_FALLTHROUGH_TOTAL: &str = "relaypost_classifier_fallthrough_total";

// ─── Output 메트릭 ──────────────────────────────────────────────────

/// Output: 기록한 레코드 수 (counter, label: node)
pub const OUTPUT_RECORDS_WRITTEN_TOTAL: &str = "relaypost_output_records_written_total";

/// Output: 기록 실패 수 (counter, label: node)
pub const OUTPUT_WRITE_FAILURES_TOTAL: &str = "relaypost_output_write_failures_total";

// ─── State 메트릭 ───────────────────────────────────────────────────

/// State: 상태 스냅샷 저장 수 (counter)
pub const STATE_FLUSHES_TOTAL: &str = "relaypost_state_flushes_total";

/// State: 상태 스냅샷 저장 실패 수 (counter)
pub const STATE_FLUSH_FAILURES_TOTAL: &str = "relaypost_state_flush_failures_total";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "relaypost_daemon_uptime_seconds";

/// Daemon: 실행 중인 워커 노드 수 (gauge)
pub const DAEMON_NODES_RUNNING: &str = "relaypost_daemon_nodes_running";

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "relaypost_daemon_build_info";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// `metrics::describe_counter!()`, `describe_gauge!()`를 호출하여
/// Prometheus HELP 텍스트를 설정합니다.
///
/// 이 함수는 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `relaypost-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    // Source
    describe_counter!(
        SOURCE_LINES_READ_TOTAL,
        "Total number of raw lines read from tailed files and sockets"
    );
    describe_counter!(
        SOURCE_RECORDS_PARSED_TOTAL,
        "Total number of lines successfully parsed into records"
    );
    describe_counter!(
        SOURCE_PARSE_FAILURES_TOTAL,
        "Total number of lines that failed to parse"
    );
    describe_counter!(
        SOURCE_RECORDS_SKIPPED_TOTAL,
        "Total number of already-processed records dropped during catch-up"
    );
    describe_counter!(
        SOURCE_REOPENS_TOTAL,
        "Total number of times a tailed file was reopened"
    );

    // Classifier
    describe_counter!(
        CLASSIFIER_RECORDS_TOTAL,
        "Total number of records received by classifiers"
    );
    describe_counter!(
        CLASSIFIER_GROUP_MATCHES_TOTAL,
        "Total number of group matches per classifier group"
    );
    describe_counter!(
        CLASSIFIER_FALLTHROUGH_TOTAL,
        "Total number of records that matched no classifier group"
    );

    // Output
    describe_counter!(
        OUTPUT_RECORDS_WRITTEN_TOTAL,
        "Total number of records written by output nodes"
    );
    describe_counter!(
        OUTPUT_WRITE_FAILURES_TOTAL,
        "Total number of failed writes in output nodes"
    );

    // State
    describe_counter!(
        STATE_FLUSHES_TOTAL,
        "Total number of state snapshots written to disk"
    );
    describe_counter!(
        STATE_FLUSH_FAILURES_TOTAL,
        "Total number of failed state snapshot writes"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Relaypost daemon uptime in seconds");
    describe_gauge!(
        DAEMON_NODES_RUNNING,
        "Number of worker nodes currently running"
    );
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}
