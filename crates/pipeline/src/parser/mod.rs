//! 원시 로그 라인 파서
//!
//! 소스 노드가 읽은 한 줄을 [`Record`]로 변환합니다. 파싱 실패는 오류가
//! 아니라 필터링입니다 -- `None`을 반환하면 해당 라인은 조용히 버려지고
//! 소스의 skip 카운터만 올라갑니다.
//!
//! # 등록된 포맷
//! - `syslog_bsd`: 전통적 BSD syslog 파일 포맷 (`MMM [d]d HH:MM:SS host msg`)
//! - `syslog_rfc3339`: RFC 3339 타임스탬프를 쓰는 rsyslog 파일 포맷
//! - `syslog_rfc3164`: `<PRI>`가 붙은 네트워크 전송 포맷 (소켓 소스용)
//! - `record_text`: Record 텍스트 표현 (`h:<host> ts:<ts> content:<content>`)

mod syslog;
mod text;

pub use syslog::{SyslogBsdParser, SyslogRfc3164Parser, SyslogRfc3339Parser};
pub use text::RecordTextParser;

use relaypost_core::Record;

/// 원시 로그 라인을 [`Record`]로 변환하는 파서 인터페이스
///
/// 파서는 여러 워커 스레드에서 공유될 수 있으므로 `Send + Sync`여야 하며,
/// 상태를 갖지 않는 것이 원칙입니다.
pub trait Parser: Send + Sync {
    /// 설정 파일의 `parser` 파라미터와 대조하는 포맷 이름
    fn format_name(&self) -> &str;

    /// 한 줄을 파싱합니다. 포맷이 맞지 않으면 `None`.
    fn parse(&self, line: &str) -> Option<Record>;
}

/// 등록 순서대로 파싱을 시도하는 파서 집합
///
/// 소스 노드는 `parser` 파라미터가 지정되면 해당 포맷 하나만 담은 집합을,
/// 지정이 없으면 [`ParserSet::with_defaults`]를 사용합니다.
pub struct ParserSet {
    parsers: Vec<Box<dyn Parser>>,
}

impl ParserSet {
    /// 빈 파서 집합을 생성합니다.
    pub fn new() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// 기본 파서가 모두 등록된 집합을 생성합니다.
    ///
    /// 등록 순서가 곧 시도 순서입니다. 각 포맷의 첫 토큰이 서로를
    /// 배제하므로 순서에 따른 오분류는 없습니다.
    pub fn with_defaults() -> Self {
        Self::new()
            .register(Box::new(SyslogBsdParser::new()))
            .register(Box::new(SyslogRfc3339Parser::new()))
            .register(Box::new(SyslogRfc3164Parser::new()))
            .register(Box::new(RecordTextParser::new()))
    }

    /// 이름이 가리키는 포맷 하나만 담은 집합을 생성합니다.
    ///
    /// 알 수 없는 이름이면 `None`을 반환하며, 호출자는 이를 노드 구성
    /// 오류로 처리합니다.
    pub fn for_format(format_name: &str) -> Option<Self> {
        let parser: Box<dyn Parser> = match format_name {
            "syslog_bsd" => Box::new(SyslogBsdParser::new()),
            "syslog_rfc3339" => Box::new(SyslogRfc3339Parser::new()),
            "syslog_rfc3164" => Box::new(SyslogRfc3164Parser::new()),
            "record_text" => Box::new(RecordTextParser::new()),
            _ => return None,
        };
        Some(Self::new().register(parser))
    }

    /// 파서를 등록합니다. 빌더 스타일로 체이닝할 수 있습니다.
    pub fn register(mut self, parser: Box<dyn Parser>) -> Self {
        self.parsers.push(parser);
        self
    }

    /// 등록 순서대로 파싱을 시도하여 첫 성공을 반환합니다.
    pub fn parse(&self, line: &str) -> Option<Record> {
        self.parsers.iter().find_map(|parser| parser.parse(line))
    }

    /// 등록된 포맷 이름 목록 (등록 순서)
    pub fn registered_formats(&self) -> Vec<&str> {
        self.parsers
            .iter()
            .map(|parser| parser.format_name())
            .collect()
    }
}

impl Default for ParserSet {
    fn default() -> Self {
        Self::with_defaults()
    }
}
