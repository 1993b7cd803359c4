#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`state`]: 소스 위치를 기록하는 프로세스 전역 상태 저장소 (원자적 스냅샷)
//! - [`tail`]: 로테이션/절단을 감지하는 파일 추적기
//! - [`parser`]: syslog 계열 파서와 레코드 텍스트 파서, 파서 집합
//! - [`source`]: 파일/stdin 소스 노드, 따라잡기 필터, 브로드캐스트 루프
//! - [`socket`]: UDP/TCP syslog 소스 노드
//! - [`classify`]: 정규식 그룹 분류기 (`rx_list` / `match_rule`, 폴스루, 통계)
//! - [`rewrite`]: 필드 재작성 노드
//! - [`output`]: 콘솔/파일/메모리 출력 노드
//! - [`registry`]: 타입 태그 → 생성자 테이블
//! - [`graph`]: 2단계 그래프 구성과 시작/정지
//!
//! # 아키텍처
//!
//! ```text
//! syslog_file ──┐
//!               ├─> rx_classifier ──> console_output / file_output
//! syslog_socket─┘        │  └──> rewriter ──> …
//!      |                 |
//!  FileTail+ParserSet  RegexCache + 그룹 평가
//! ```

pub mod graph;
pub mod registry;
pub mod state;

pub mod classify;
pub mod output;
pub mod parser;
pub mod rewrite;
pub mod socket;
pub mod source;
pub mod tail;

// --- 주요 타입 re-export ---

// 그래프 구성
pub use graph::Graph;
pub use registry::{BuildContext, NodeKind, NodeRegistry};

// 상태 저장소
pub use state::{StateStore, StateValue};

// 파서
pub use parser::{Parser, ParserSet};

// 노드
pub use classify::RxClassifier;
pub use output::{ConsoleOutput, FileOutput, MemoryOutput};
pub use rewrite::Rewriter;
pub use socket::SocketSource;
pub use source::FileSource;

// 파일 추적기
pub use tail::{FileTail, TailConfig};
