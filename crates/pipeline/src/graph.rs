//! 파이프라인 그래프 구성과 수명 관리
//!
//! [`Graph::build`]는 노드 선언 목록을 두 단계로 그래프로 만듭니다.
//! 1단계는 선언 순서대로 노드를 생성합니다. 이름이 없거나 타입이
//! 등록되지 않았거나 파라미터가 잘못된 선언은 에러 로그와 함께
//! 건너뛰고 나머지 파이프라인은 계속 구성됩니다. 2단계는 완성된
//! 이름 테이블에 대해 각 노드의 출력 이름을 해석합니다. 찾을 수
//! 없거나 레코드를 받을 수 없는 대상은 에러 로그 후 없는 것으로
//! 취급합니다.
//!
//! 레코드 전달은 소스 워커 스레드에서 출발하는 동기 깊이 우선
//! 호출 사슬입니다. 느린 싱크는 자신의 소스 워커를 그대로 막으므로
//! 별도의 큐 없이 역압이 걸립니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{error, info, warn};

use relaypost_core::{NamedSink, Node, NodeDecl, NodeError};

use crate::registry::{BuildContext, NodeRegistry};
use crate::state::StateStore;

/// 구성이 끝난 파이프라인 그래프
///
/// 노드는 선언 순서대로 보관되며 시작과 정지도 그 순서를 따릅니다.
pub struct Graph {
    nodes: Vec<Arc<dyn Node>>,
    state: Arc<StateStore>,
}

impl Graph {
    /// 노드 선언 목록에서 그래프를 구성합니다.
    ///
    /// 잘못된 선언은 건너뛰므로 이 함수는 실패하지 않습니다. 빈
    /// 그래프도 유효합니다. `whitelist`가 주어지면 그 이름에 속한
    /// 노드만 생성합니다.
    pub fn build(
        decls: &[NodeDecl],
        registry: &NodeRegistry,
        ctx: &BuildContext,
        whitelist: Option<&[String]>,
    ) -> Self {
        let mut nodes: Vec<Arc<dyn Node>> = Vec::new();
        let mut by_name: HashMap<String, Arc<dyn Node>> = HashMap::new();

        // 1단계: 노드 생성
        for decl in decls {
            if decl.name.is_empty() {
                error!(
                    node_type = decl.node_type.as_str(),
                    "skipping node declaration without a name"
                );
                continue;
            }
            if let Some(allowed) = whitelist {
                if !allowed.iter().any(|name| name == &decl.name) {
                    warn!(
                        node = decl.name.as_str(),
                        "ignoring node absent from whitelist"
                    );
                    continue;
                }
            }
            match Self::construct(decl, registry, ctx, &by_name) {
                Ok(node) => {
                    info!(
                        node = decl.name.as_str(),
                        node_type = node.node_type(),
                        "node constructed"
                    );
                    by_name.insert(decl.name.clone(), Arc::clone(&node));
                    nodes.push(node);
                }
                Err(err) => {
                    error!(
                        node = decl.name.as_str(),
                        error = %err,
                        "failed to construct node, skipping"
                    );
                }
            }
        }

        // 2단계: 출력 이름 해석
        for node in &nodes {
            let wanted = node.configured_outputs();
            if wanted.is_empty() {
                continue;
            }
            let mut resolved = Vec::with_capacity(wanted.len());
            for output_name in &wanted {
                match by_name.get(output_name) {
                    Some(target) => match Arc::clone(target).as_sink() {
                        Some(sink) => resolved.push(NamedSink::new(output_name.as_str(), sink)),
                        None => error!(
                            node = node.name(),
                            output = output_name.as_str(),
                            "output target cannot receive records"
                        ),
                    },
                    None => error!(
                        node = node.name(),
                        output = output_name.as_str(),
                        "failed to find output for node"
                    ),
                }
            }
            node.connect_outputs(resolved);
        }

        info!(nodes = nodes.len(), "pipeline graph constructed");
        Graph {
            nodes,
            state: Arc::clone(&ctx.state),
        }
    }

    fn construct(
        decl: &NodeDecl,
        registry: &NodeRegistry,
        ctx: &BuildContext,
        by_name: &HashMap<String, Arc<dyn Node>>,
    ) -> Result<Arc<dyn Node>, NodeError> {
        if by_name.contains_key(&decl.name) {
            return Err(NodeError::DuplicateName {
                name: decl.name.clone(),
            });
        }
        registry.build(decl, ctx)
    }

    /// 워커를 소유한 모든 노드를 시작하고 이름이 붙은 조인 핸들을
    /// 반환합니다. 반환된 핸들로 워커 생존을 감독합니다.
    pub fn start(&self) -> Vec<(String, JoinHandle<()>)> {
        let mut handles = Vec::new();
        for node in &self.nodes {
            if let Some(handle) = Arc::clone(node).start() {
                handles.push((node.name().to_owned(), handle));
            }
        }
        info!(workers = handles.len(), "pipeline graph started");
        handles
    }

    /// 모든 노드에 정지를 요청하고 상태 저장소를 플러시합니다.
    ///
    /// 워커는 다음 대기 주기 안에 정지 플래그를 관찰합니다. 호출자는
    /// [`Graph::start`]가 반환한 핸들을 조인해 종료를 기다립니다.
    pub fn stop(&self) {
        for node in &self.nodes {
            node.stop();
        }
        if let Err(err) = self.state.flush() {
            warn!(error = %err, "failed to flush state store on shutdown");
        }
        info!("pipeline graph stopped");
    }

    /// 그래프에 들어간 노드 수를 반환합니다.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// 이름으로 노드를 조회합니다.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Node>> {
        self.nodes.iter().find(|node| node.name() == name)
    }
}
