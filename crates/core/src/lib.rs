#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod metrics;
pub mod node;
pub mod types;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{ConfigError, NodeError, ParseError, RelaypostError, StateError};

// 설정
pub use config::{NodeDecl, PipelineConfig, RelaypostConfig, StatePolicy, WorkerModel};

// 노드 trait
pub use node::{NamedSink, Node, RecordSink};

// 도메인 타입
pub use types::{FieldRef, FieldValue, Record, RecordAttr};
