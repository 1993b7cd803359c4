//! 노드 레지스트리. 타입 태그를 생성자에 연결
//!
//! [`NodeRegistry`]는 설정의 `type` 태그를 노드 생성자 함수에
//! 연결하는 정적 테이블입니다. 기본 제공 타입은
//! [`NodeRegistry::with_builtins`]로 등록되고, [`NodeRegistry::register`]로
//! 사용자 정의 타입을 추가할 수 있습니다.
//!
//! 각 항목은 노드 역할([`NodeKind`])을 함께 기록합니다. 테스트
//! 모드에서는 출력 역할의 노드가 생성자 호출 전에
//! [`ConsoleOutput`](crate::output::ConsoleOutput)으로 대체되므로,
//! 출력 파라미터 검증 없이도 상류 토폴로지를 시험할 수 있습니다.

use std::collections::HashMap;
use std::sync::Arc;

use relaypost_core::{Node, NodeDecl, NodeError, PipelineConfig};

use crate::classify::RxClassifier;
use crate::output::{ConsoleOutput, FileOutput, MemoryOutput};
use crate::rewrite::Rewriter;
use crate::socket::SocketSource;
use crate::source::FileSource;
use crate::state::StateStore;

/// 노드 생성 시 주입되는 공유 문맥
///
/// 그래프 구성 단계에서 한 번 만들어 모든 생성자에 전달합니다.
pub struct BuildContext {
    /// 소스 위치를 기록하는 공유 상태 저장소
    pub state: Arc<StateStore>,
    /// 파이프라인 전역 설정
    pub pipeline: PipelineConfig,
    /// 저장된 위치에서 이어서 처리할지 여부
    pub resume: bool,
    /// 테스트 모드. 출력 노드를 추적 콘솔 출력으로 대체합니다.
    pub test_mode: bool,
}

/// 노드 역할 구분
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// 워커 스레드를 소유하고 레코드를 생산하는 노드
    Source,
    /// 레코드를 받아 가공하거나 분기하는 노드
    Intermediate,
    /// 레코드를 밖으로 내보내는 종단 노드
    Output,
}

/// 노드 생성자 함수
///
/// 캡처 없는 클로저가 이 타입으로 강제 변환되므로 기본 제공
/// 타입과 사용자 정의 타입을 같은 테이블에 담을 수 있습니다.
pub type NodeConstructor = fn(&NodeDecl, &BuildContext) -> Result<Arc<dyn Node>, NodeError>;

struct RegistryEntry {
    kind: NodeKind,
    construct: NodeConstructor,
}

/// 타입 태그 → 생성자 테이블
pub struct NodeRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl NodeRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// 기본 제공 노드 타입이 모두 등록된 레지스트리를 생성합니다.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("syslog_file", NodeKind::Source, |decl, ctx| {
            Ok(Arc::new(FileSource::from_decl(decl, ctx)?))
        });
        registry.register("syslog_socket", NodeKind::Source, |decl, ctx| {
            Ok(Arc::new(SocketSource::from_decl(decl, ctx)?))
        });
        registry.register("rx_classifier", NodeKind::Intermediate, |decl, ctx| {
            Ok(Arc::new(RxClassifier::from_decl(decl, ctx)?))
        });
        registry.register("rewriter", NodeKind::Intermediate, |decl, _| {
            Ok(Arc::new(Rewriter::from_decl(decl)?))
        });
        registry.register("console_output", NodeKind::Output, |decl, _| {
            Ok(Arc::new(ConsoleOutput::from_decl(decl)?))
        });
        registry.register("file_output", NodeKind::Output, |decl, _| {
            Ok(Arc::new(FileOutput::from_decl(decl)?))
        });
        registry.register("memory_output", NodeKind::Output, |decl, _| {
            Ok(Arc::new(MemoryOutput::from_decl(decl)?))
        });
        registry
    }

    /// 노드 타입을 등록합니다.
    ///
    /// 같은 태그가 이미 있으면 덮어씁니다. 기본 제공 타입을 사용자
    /// 정의 구현으로 교체할 때 이 동작을 이용합니다.
    pub fn register(&mut self, tag: impl Into<String>, kind: NodeKind, construct: NodeConstructor) {
        self.entries
            .insert(tag.into(), RegistryEntry { kind, construct });
    }

    /// 태그에 해당하는 노드 역할을 반환합니다.
    pub fn kind_of(&self, tag: &str) -> Option<NodeKind> {
        self.entries.get(tag).map(|entry| entry.kind)
    }

    /// 등록된 타입 수를 반환합니다.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// 선언으로부터 노드를 생성합니다.
    ///
    /// 테스트 모드에서 출력 역할 노드는 생성자 호출 전에 추적 콘솔
    /// 출력으로 대체됩니다. 등록되지 않은 타입은
    /// [`NodeError::UnknownType`]을 반환합니다.
    pub fn build(&self, decl: &NodeDecl, ctx: &BuildContext) -> Result<Arc<dyn Node>, NodeError> {
        let entry = self
            .entries
            .get(&decl.node_type)
            .ok_or_else(|| NodeError::UnknownType {
                node: decl.name.clone(),
                node_type: decl.node_type.clone(),
            })?;
        if ctx.test_mode && entry.kind == NodeKind::Output {
            return Ok(Arc::new(ConsoleOutput::for_test_mode(decl.name.as_str())));
        }
        (entry.construct)(decl, ctx)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use relaypost_core::StatePolicy;

    fn context(dir: &std::path::Path) -> BuildContext {
        BuildContext {
            state: Arc::new(
                StateStore::open(dir.join("state.json"), StatePolicy::Preserve).unwrap(),
            ),
            pipeline: relaypost_core::PipelineConfig::default(),
            resume: true,
            test_mode: false,
        }
    }

    fn decl(name: &str, node_type: &str, params_toml: &str) -> NodeDecl {
        NodeDecl {
            name: name.to_owned(),
            node_type: node_type.to_owned(),
            outputs: Vec::new(),
            params: toml::from_str(params_toml).unwrap(),
        }
    }

    #[test]
    fn builtins_cover_every_node_type() {
        let registry = NodeRegistry::with_builtins();
        assert_eq!(registry.count(), 7);
        assert_eq!(registry.kind_of("syslog_file"), Some(NodeKind::Source));
        assert_eq!(registry.kind_of("syslog_socket"), Some(NodeKind::Source));
        assert_eq!(
            registry.kind_of("rx_classifier"),
            Some(NodeKind::Intermediate)
        );
        assert_eq!(registry.kind_of("rewriter"), Some(NodeKind::Intermediate));
        assert_eq!(registry.kind_of("console_output"), Some(NodeKind::Output));
        assert_eq!(registry.kind_of("file_output"), Some(NodeKind::Output));
        assert_eq!(registry.kind_of("memory_output"), Some(NodeKind::Output));
    }

    #[test]
    fn kind_of_unknown_tag_returns_none() {
        let registry = NodeRegistry::with_builtins();
        assert!(registry.kind_of("carrier_pigeon").is_none());
    }

    #[test]
    fn build_constructs_registered_node() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let registry = NodeRegistry::with_builtins();

        let node = registry
            .build(&decl("console", "console_output", ""), &ctx)
            .unwrap();
        assert_eq!(node.name(), "console");
        assert_eq!(node.node_type(), "console_output");
    }

    #[test]
    fn build_unknown_type_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let registry = NodeRegistry::with_builtins();

        let err = registry
            .build(&decl("mystery", "carrier_pigeon", ""), &ctx)
            .unwrap_err();
        assert!(matches!(err, NodeError::UnknownType { .. }));
        assert!(err.to_string().contains("carrier_pigeon"));
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn build_propagates_bad_params() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let registry = NodeRegistry::with_builtins();

        let err = registry
            .build(&decl("bad", "file_output", "unexpected_key = 1"), &ctx)
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidParams { .. }));
    }

    #[test]
    fn test_mode_substitutes_output_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());
        ctx.test_mode = true;
        let registry = NodeRegistry::with_builtins();

        // 출력 노드는 파라미터 검증 전에 대체되므로 path 없는
        // file_output 선언도 테스트 모드에서는 생성에 성공합니다.
        let node = registry.build(&decl("archive", "file_output", ""), &ctx).unwrap();
        assert_eq!(node.name(), "archive");
        assert_eq!(node.node_type(), "console_output");
    }

    #[test]
    fn test_mode_keeps_intermediate_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());
        ctx.test_mode = true;
        let registry = NodeRegistry::with_builtins();

        let node = registry
            .build(
                &decl("strip", "rewriter", "rules = []"),
                &ctx,
            )
            .unwrap();
        assert_eq!(node.node_type(), "rewriter");
    }

    #[test]
    fn register_custom_type() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let mut registry = NodeRegistry::with_builtins();

        registry.register("blackhole", NodeKind::Output, |decl, _| {
            Ok(Arc::new(MemoryOutput::new(decl.name.as_str())))
        });
        assert_eq!(registry.count(), 8);

        let node = registry.build(&decl("sink", "blackhole", ""), &ctx).unwrap();
        assert_eq!(node.node_type(), "memory_output");
    }

    #[test]
    fn register_overwrites_existing_tag() {
        let mut registry = NodeRegistry::with_builtins();
        registry.register("file_output", NodeKind::Output, |decl, _| {
            Ok(Arc::new(MemoryOutput::new(decl.name.as_str())))
        });
        assert_eq!(registry.count(), 7);

        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let node = registry
            .build(&decl("replaced", "file_output", ""), &ctx)
            .unwrap();
        assert_eq!(node.node_type(), "memory_output");
    }
}
