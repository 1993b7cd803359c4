//! 노드 상태 저장소 -- 프로세스 전역 JSON 스냅샷
//!
//! 소스 노드의 파일 오프셋, inode 번호, 마지막으로 처리한 레코드의
//! 타임스탬프를 하나의 JSON 파일에 모아 저장합니다. 저장소는 노드
//! 이름을 키로 하는 2단 맵이며, 스냅샷은 항상 전체를 통째로 기록하고
//! 임시 파일 + rename으로 원자적으로 교체합니다.
//!
//! `_ts`로 끝나는 키는 타임스탬프로 직렬화/역직렬화됩니다. 그 외의
//! 값은 문자열 또는 정수입니다.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDateTime;
use metrics::counter;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use relaypost_core::config::StatePolicy;
use relaypost_core::error::StateError;
use relaypost_core::metrics::{STATE_FLUSHES_TOTAL, STATE_FLUSH_FAILURES_TOTAL};
use relaypost_core::types::ISO_TS_FORMAT;

/// 상태 항목 값
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    /// 문자열 값
    Text(String),
    /// 정수 값 (파일 오프셋, inode 번호)
    Int(i64),
    /// 타임스탬프 값 (`_ts` 접미사 키)
    Timestamp(NaiveDateTime),
}

impl StateValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StateValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            StateValue::Int(n) if *n >= 0 => Some(*n as u64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            StateValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            StateValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl From<String> for StateValue {
    fn from(s: String) -> Self {
        StateValue::Text(s)
    }
}

impl From<&str> for StateValue {
    fn from(s: &str) -> Self {
        StateValue::Text(s.to_owned())
    }
}

impl From<i64> for StateValue {
    fn from(n: i64) -> Self {
        StateValue::Int(n)
    }
}

impl From<u64> for StateValue {
    fn from(n: u64) -> Self {
        StateValue::Int(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<NaiveDateTime> for StateValue {
    fn from(ts: NaiveDateTime) -> Self {
        StateValue::Timestamp(ts)
    }
}

type NodeState = BTreeMap<String, StateValue>;

/// 프로세스 전역 상태 저장소
///
/// 모든 노드가 [`std::sync::Arc`]로 공유하며, 내부 Mutex가 쓰기
/// 직렬화 지점 역할을 합니다.
pub struct StateStore {
    path: PathBuf,
    inner: Mutex<BTreeMap<String, NodeState>>,
}

impl StateStore {
    /// 상태 저장소를 엽니다.
    ///
    /// `StatePolicy::Preserve`면 기존 스냅샷을 읽어 복원하고,
    /// `StatePolicy::Reset`이면 기존 스냅샷을 무시하고 빈 상태로
    /// 시작합니다. 손상된 스냅샷은 경고 후 빈 상태로 대체합니다.
    pub fn open(path: impl Into<PathBuf>, policy: StatePolicy) -> Result<Self, StateError> {
        let path = path.into();
        let initial = match policy {
            StatePolicy::Reset => {
                info!(path = %path.display(), "state reset requested, ignoring existing snapshot");
                BTreeMap::new()
            }
            StatePolicy::Preserve => match std::fs::read_to_string(&path) {
                Ok(content) => match Self::decode(&content) {
                    Ok(map) => {
                        debug!(path = %path.display(), nodes = map.len(), "state snapshot loaded");
                        map
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "corrupt state snapshot, starting empty");
                        BTreeMap::new()
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
                Err(e) => {
                    return Err(StateError::Read {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    });
                }
            },
        };
        Ok(StateStore {
            path,
            inner: Mutex::new(initial),
        })
    }

    /// 스냅샷 파일 경로를 반환합니다.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 노드의 상태 항목 하나를 조회합니다.
    pub fn get(&self, node: &str, key: &str) -> Option<StateValue> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.get(node).and_then(|m| m.get(key)).cloned()
    }

    /// 노드의 상태 항목 하나를 기록합니다 (메모리만, 디스크 반영은 flush).
    pub fn set(&self, node: &str, key: &str, value: impl Into<StateValue>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .entry(node.to_owned())
            .or_default()
            .insert(key.to_owned(), value.into());
    }

    /// 노드의 상태 항목 여러 개를 한 번에 기록합니다.
    pub fn set_many<I, K, V>(&self, node: &str, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<StateValue>,
    {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let state = inner.entry(node.to_owned()).or_default();
        for (k, v) in entries {
            state.insert(k.into(), v.into());
        }
    }

    /// 전체 스냅샷을 디스크에 기록합니다.
    ///
    /// 같은 디렉토리의 임시 파일에 쓴 뒤 rename으로 교체하므로 기존
    /// 스냅샷이 중간 상태로 깨지는 일은 없습니다.
    pub fn flush(&self) -> Result<(), StateError> {
        let encoded = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            Self::encode(&inner)
        };

        match self.write_atomic(&encoded) {
            Ok(()) => {
                counter!(STATE_FLUSHES_TOTAL).increment(1);
                Ok(())
            }
            Err(e) => {
                counter!(STATE_FLUSH_FAILURES_TOTAL).increment(1);
                Err(e)
            }
        }
    }

    fn write_atomic(&self, encoded: &Value) -> Result<(), StateError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let write_err = |reason: String| StateError::Write {
            path: self.path.display().to_string(),
            reason,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| write_err(e.to_string()))?;
        serde_json::to_writer_pretty(&mut tmp, encoded).map_err(|e| write_err(e.to_string()))?;
        tmp.write_all(b"\n").map_err(|e| write_err(e.to_string()))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| write_err(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| write_err(e.to_string()))?;
        Ok(())
    }

    fn encode(map: &BTreeMap<String, NodeState>) -> Value {
        let mut root = Map::new();
        for (node, state) in map {
            let mut obj = Map::new();
            for (key, value) in state {
                let encoded = match value {
                    StateValue::Text(s) => Value::String(s.clone()),
                    StateValue::Int(n) => Value::from(*n),
                    StateValue::Timestamp(ts) => {
                        Value::String(ts.format(ISO_TS_FORMAT).to_string())
                    }
                };
                obj.insert(key.clone(), encoded);
            }
            root.insert(node.clone(), Value::Object(obj));
        }
        Value::Object(root)
    }

    fn decode(content: &str) -> Result<BTreeMap<String, NodeState>, String> {
        let root: Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
        let Value::Object(nodes) = root else {
            return Err("top level is not an object".to_owned());
        };

        let mut map = BTreeMap::new();
        for (node, value) in nodes {
            let Value::Object(entries) = value else {
                return Err(format!("state for node '{node}' is not an object"));
            };
            let mut state = NodeState::new();
            for (key, raw) in entries {
                let decoded = match &raw {
                    Value::String(s) if key.ends_with("_ts") => {
                        match NaiveDateTime::parse_from_str(s, ISO_TS_FORMAT) {
                            Ok(ts) => StateValue::Timestamp(ts),
                            Err(e) => {
                                warn!(node, key, error = %e, "unparsable timestamp in state, keeping as text");
                                StateValue::Text(s.clone())
                            }
                        }
                    }
                    Value::String(s) => StateValue::Text(s.clone()),
                    Value::Number(n) => match n.as_i64() {
                        Some(i) => StateValue::Int(i),
                        None => {
                            warn!(node, key, "non-integer number in state, skipping");
                            continue;
                        }
                    },
                    other => {
                        return Err(format!(
                            "unsupported value type for '{node}.{key}': {other}"
                        ));
                    }
                };
                state.insert(key, decoded);
            }
            map.insert(node, state);
        }
        Ok(map)
    }
}
