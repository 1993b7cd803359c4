//! 노드 trait 정의
//!
//! 파이프라인 그래프를 구성하는 노드의 공통 인터페이스와 역할별
//! 선택 능력을 정의합니다. 소스 노드는 워커 스레드를 소유하고,
//! 중간/출력 노드는 [`RecordSink`]으로 레코드를 받아 처리합니다.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::types::Record;

/// 레코드를 받아 처리하는 다운스트림 역할
///
/// `append`는 호출한 워커 스레드에서 동기적으로 실행됩니다. 수신한
/// 레코드는 불변으로 취급해야 하며, 수정이 필요하면 사본을 만듭니다.
pub trait RecordSink: Send + Sync {
    /// 레코드 한 건을 처리합니다. 처리 실패는 내부에서 기록하고
    /// 흐름을 막지 않습니다.
    fn append(&self, record: &Record);
}

/// 이름이 해석된 다운스트림 참조
#[derive(Clone)]
pub struct NamedSink {
    /// 대상 노드 이름
    pub name: String,
    /// 대상 노드의 sink 역할
    pub sink: Arc<dyn RecordSink>,
}

impl NamedSink {
    pub fn new(name: impl Into<String>, sink: Arc<dyn RecordSink>) -> Self {
        NamedSink {
            name: name.into(),
            sink,
        }
    }
}

/// 모든 파이프라인 노드의 공통 인터페이스
///
/// 기본 구현은 아무 능력도 없는 노드입니다. 각 노드 타입은 자신의
/// 역할에 해당하는 메서드만 재정의합니다.
pub trait Node: Send + Sync {
    /// 그래프 안에서 유일한 노드 이름
    fn name(&self) -> &str;

    /// 설정 파일에 쓰는 노드 타입 태그
    fn node_type(&self) -> &'static str;

    /// 그래프 연결 단계에서 해석해야 할 출력 이름 목록
    fn configured_outputs(&self) -> Vec<String> {
        Vec::new()
    }

    /// 해석된 출력 참조를 주입합니다. 그래프 연결 단계에서 한 번 호출됩니다.
    fn connect_outputs(&self, _outputs: Vec<NamedSink>) {}

    /// 워커 스레드를 소유한 노드는 스레드를 띄우고 핸들을 반환합니다.
    fn start(self: Arc<Self>) -> Option<JoinHandle<()>> {
        None
    }

    /// 협조적 종료를 요청합니다. 워커는 다음 대기 주기 안에 이를
    /// 관찰하고 스스로 종료해야 합니다.
    fn stop(&self) {}

    /// 레코드를 소비할 수 있는 노드는 자신의 sink 역할을 반환합니다.
    fn as_sink(self: Arc<Self>) -> Option<Arc<dyn RecordSink>> {
        None
    }
}

impl std::fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name())
            .field("node_type", &self.node_type())
            .finish()
    }
}
