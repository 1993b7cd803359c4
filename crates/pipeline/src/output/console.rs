//! 콘솔 출력 노드
//!
//! 레코드를 표준 출력 또는 표준 에러로 내보냅니다. extradata가 있으면
//! 레코드 본문 앞에 한 줄로 먼저 보여줍니다.
//!
//! 테스트 모드에서는 [`ConsoleOutput::for_test_mode`]로 만든 추적
//! 변형이 모든 출력 노드를 대체하여, 레코드가 분류기를 거친 깊이만큼
//! 들여쓴 `<노드> received: <레코드>` 형식으로 흐름을 보여줍니다.

use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::Deserialize;
use tracing::warn;

use relaypost_core::metrics as m;
use relaypost_core::{FieldValue, Node, NodeDecl, NodeError, Record, RecordSink};

/// 출력 대상 스트림
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OutStream {
    #[default]
    Stdout,
    Stderr,
}

/// `console_output` 노드 파라미터
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConsoleOutputParams {
    /// `stdout` 또는 `stderr`
    #[serde(default)]
    stream: OutStream,
}

/// 레코드를 콘솔로 내보내는 출력 노드
pub struct ConsoleOutput {
    name: String,
    stream: OutStream,
    trace: bool,
}

impl ConsoleOutput {
    /// 노드 선언에서 콘솔 출력을 구성합니다.
    pub fn from_decl(decl: &NodeDecl) -> Result<Self, NodeError> {
        let params: ConsoleOutputParams =
            decl.params
                .clone()
                .try_into()
                .map_err(|err: toml::de::Error| NodeError::InvalidParams {
                    node: decl.name.clone(),
                    reason: err.to_string(),
                })?;
        Ok(Self {
            name: decl.name.clone(),
            stream: params.stream,
            trace: false,
        })
    }

    /// 테스트 모드 대체 출력을 만듭니다. 이름은 대체된 원래 노드의
    /// 이름을 그대로 씁니다.
    pub fn for_test_mode(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stream: OutStream::Stdout,
            trace: true,
        }
    }

    /// 레코드의 콘솔 표현을 만듭니다.
    fn render(&self, record: &Record) -> String {
        let mut out = String::new();
        if self.trace {
            let indent = " ".repeat(record.trace_depth as usize * 2);
            out.push_str(&indent);
            out.push_str(&self.name);
            out.push_str(" received: ");
            out.push_str(&record.to_string());
            if let Some(extras) = &record.extradata {
                out.push('\n');
                out.push_str(&" ".repeat(record.trace_depth as usize * 2 + 1));
                out.push_str(&format_extras(extras));
            }
        } else {
            if let Some(extras) = &record.extradata {
                out.push_str("extradata: ");
                out.push_str(&format_extras(extras));
                out.push('\n');
            }
            out.push_str(&record.to_string());
        }
        out
    }
}

fn format_extras(extras: &BTreeMap<String, FieldValue>) -> String {
    let parts: Vec<String> = extras.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{{{}}}", parts.join(", "))
}

impl Node for ConsoleOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn node_type(&self) -> &'static str {
        "console_output"
    }

    fn as_sink(self: std::sync::Arc<Self>) -> Option<std::sync::Arc<dyn RecordSink>> {
        Some(self)
    }
}

impl RecordSink for ConsoleOutput {
    fn append(&self, record: &Record) {
        let rendered = self.render(record);
        let result = match self.stream {
            OutStream::Stdout => writeln!(io::stdout().lock(), "{rendered}"),
            OutStream::Stderr => writeln!(io::stderr().lock(), "{rendered}"),
        };
        match result {
            Ok(()) => {
                metrics::counter!(m::OUTPUT_RECORDS_WRITTEN_TOTAL, m::LABEL_NODE => self.name.clone())
                    .increment(1);
            }
            Err(err) => {
                metrics::counter!(m::OUTPUT_WRITE_FAILURES_TOTAL, m::LABEL_NODE => self.name.clone())
                    .increment(1);
                warn!(node = %self.name, error = %err, "console write failed");
            }
        }
    }
}
