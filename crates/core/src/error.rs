//! 에러 타입 정의

/// Relaypost 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum RelaypostError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 노드 생성/연결 에러
    #[error("node error: {0}")]
    Node(#[from] NodeError),

    /// 상태 저장소 에러
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// 파싱 에러
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 노드 생성/연결 에러
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// 등록되지 않은 노드 타입
    #[error("unknown node type '{node_type}' for node '{node}'")]
    UnknownType { node: String, node_type: String },

    /// 노드 이름 중복
    #[error("duplicate node name: {name}")]
    DuplicateName { name: String },

    /// 노드 파라미터가 잘못됨
    #[error("invalid params for node '{node}': {reason}")]
    InvalidParams { node: String, reason: String },

    /// 정규식 컴파일 실패
    #[error("bad pattern in node '{node}' group '{group}': {reason}")]
    Pattern {
        node: String,
        group: String,
        reason: String,
    },

    /// 소켓 바인드 실패
    #[error("failed to bind {addr} for node '{node}': {reason}")]
    Bind {
        node: String,
        addr: String,
        reason: String,
    },
}

/// 상태 저장소 에러
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// 상태 파일 읽기 실패
    #[error("failed to read state file {path}: {reason}")]
    Read { path: String, reason: String },

    /// 상태 파일 쓰기 실패
    #[error("failed to write state file {path}: {reason}")]
    Write { path: String, reason: String },

    /// 상태 파일 내용이 손상됨
    #[error("corrupt state file {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

/// 파싱 에러
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// 타임스탬프 파싱 실패
    #[error("bad timestamp '{value}': {reason}")]
    Timestamp { value: String, reason: String },

    /// 레코드 텍스트 형식이 잘못됨
    #[error("malformed record text: {reason}")]
    Malformed { reason: String },
}
