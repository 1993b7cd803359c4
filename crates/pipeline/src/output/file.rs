//! 파일 출력 노드

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use serde::Deserialize;
use tracing::warn;

use relaypost_core::metrics as m;
use relaypost_core::{Node, NodeDecl, NodeError, Record, RecordSink};

/// `file_output` 노드 파라미터
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileOutputParams {
    /// 기록 대상 경로. 없으면 만들고, 있으면 끝에 덧붙입니다.
    path: String,
}

/// 레코드를 텍스트 직렬화 형식으로 파일에 덧붙이는 출력 노드
///
/// 파일은 첫 레코드가 도착할 때 열립니다. 열기나 쓰기에 실패하면
/// 레코드를 버리고 핸들을 닫은 뒤, 다음 레코드에서 다시 시도합니다.
/// 출력 실패가 업스트림 워커를 멈추지 않습니다.
pub struct FileOutput {
    name: String,
    path: String,
    file: Mutex<Option<File>>,
}

impl FileOutput {
    /// 노드 선언에서 파일 출력을 구성합니다.
    pub fn from_decl(decl: &NodeDecl) -> Result<Self, NodeError> {
        let params: FileOutputParams =
            decl.params
                .clone()
                .try_into()
                .map_err(|err: toml::de::Error| NodeError::InvalidParams {
                    node: decl.name.clone(),
                    reason: err.to_string(),
                })?;
        Ok(Self {
            name: decl.name.clone(),
            path: params.path,
            file: Mutex::new(None),
        })
    }

    fn write_failed(&self, action: &str, err: &std::io::Error) {
        metrics::counter!(m::OUTPUT_WRITE_FAILURES_TOTAL, m::LABEL_NODE => self.name.clone())
            .increment(1);
        warn!(
            node = %self.name,
            path = %self.path,
            error = %err,
            "{action} failed, record dropped"
        );
    }
}

impl Node for FileOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn node_type(&self) -> &'static str {
        "file_output"
    }

    fn as_sink(self: std::sync::Arc<Self>) -> Option<std::sync::Arc<dyn RecordSink>> {
        Some(self)
    }
}

impl RecordSink for FileOutput {
    fn append(&self, record: &Record) {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());

        if guard.is_none() {
            match OpenOptions::new().create(true).append(true).open(&self.path) {
                Ok(file) => *guard = Some(file),
                Err(err) => {
                    self.write_failed("open", &err);
                    return;
                }
            }
        }

        // 위에서 채웠으므로 여기서는 항상 Some
        let Some(file) = guard.as_mut() else {
            return;
        };
        if let Err(err) = writeln!(file, "{record}") {
            self.write_failed("write", &err);
            *guard = None;
            return;
        }

        metrics::counter!(m::OUTPUT_RECORDS_WRITTEN_TOTAL, m::LABEL_NODE => self.name.clone())
            .increment(1);
    }
}
