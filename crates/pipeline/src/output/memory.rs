//! 메모리 출력 노드

use std::sync::Mutex;

use serde::Deserialize;

use relaypost_core::metrics as m;
use relaypost_core::{Node, NodeDecl, NodeError, Record, RecordSink};

/// `memory_output` 노드 파라미터 (받는 파라미터 없음)
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MemoryOutputParams {}

/// 받은 레코드를 메모리에 쌓아 두는 수집 출력 노드
///
/// 통합 테스트와 파이프라인 점검에서 말단 수집기로 씁니다. 버퍼는
/// 무한히 자라므로 상시 운영 경로에는 적합하지 않습니다.
pub struct MemoryOutput {
    name: String,
    received: Mutex<Vec<Record>>,
}

impl MemoryOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            received: Mutex::new(Vec::new()),
        }
    }

    /// 노드 선언에서 메모리 출력을 구성합니다.
    pub fn from_decl(decl: &NodeDecl) -> Result<Self, NodeError> {
        let _params: MemoryOutputParams =
            decl.params
                .clone()
                .try_into()
                .map_err(|err: toml::de::Error| NodeError::InvalidParams {
                    node: decl.name.clone(),
                    reason: err.to_string(),
                })?;
        Ok(Self::new(decl.name.clone()))
    }

    /// 지금까지 받은 레코드의 사본
    pub fn records(&self) -> Vec<Record> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 받은 레코드를 모두 꺼내고 버퍼를 비웁니다.
    pub fn take_records(&self) -> Vec<Record> {
        std::mem::take(&mut *self.received.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.received.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Node for MemoryOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn node_type(&self) -> &'static str {
        "memory_output"
    }

    fn as_sink(self: std::sync::Arc<Self>) -> Option<std::sync::Arc<dyn RecordSink>> {
        Some(self)
    }
}

impl RecordSink for MemoryOutput {
    fn append(&self, record: &Record) {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        metrics::counter!(m::OUTPUT_RECORDS_WRITTEN_TOTAL, m::LABEL_NODE => self.name.clone())
            .increment(1);
    }
}
