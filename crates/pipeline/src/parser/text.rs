//! Record 텍스트 표현 파서
//!
//! relaypost 자신이 출력한 `h:<host> ts:<ts> content:<content>` 라인을
//! 되읽습니다. 한 인스턴스의 파일 출력을 다른 인스턴스가 이어받는 릴레이
//! 구성에 사용합니다.

use relaypost_core::Record;

use super::Parser;

/// [`Record`]의 `Display` 표현을 되읽는 파서
///
/// 호스트, 초 단위 타임스탬프, content가 그대로 복원됩니다. 주석 줄은
/// `h:` 접두사가 없으므로 자연히 걸러집니다.
#[derive(Default)]
pub struct RecordTextParser;

impl RecordTextParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for RecordTextParser {
    fn format_name(&self) -> &str {
        "record_text"
    }

    fn parse(&self, line: &str) -> Option<Record> {
        line.trim_end_matches(['\r', '\n']).parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_name_is_record_text() {
        assert_eq!(RecordTextParser::new().format_name(), "record_text");
    }

    #[test]
    fn round_trips_display_form() {
        let parser = RecordTextParser::new();
        let line = "h:publicapi2 ts:2014-12-20 13:21:09 content:nginx: 10.0.0.1 GET /index.html 200";
        let record = parser.parse(line).unwrap();

        assert_eq!(record.host, "publicapi2");
        assert_eq!(record.content, "nginx: 10.0.0.1 GET /index.html 200");
        assert_eq!(record.to_string(), line);
    }

    #[test]
    fn strips_trailing_newline_before_parsing() {
        let parser = RecordTextParser::new();
        let record = parser
            .parse("h:web1 ts:2014-12-20 13:21:09 content:hello\n")
            .unwrap();
        assert_eq!(record.content, "hello");
    }

    #[test]
    fn rejects_foreign_lines() {
        let parser = RecordTextParser::new();
        assert!(parser.parse("").is_none());
        assert!(parser.parse("Dec 20 13:21:09 host msg").is_none());
        assert!(parser.parse("h:web1 no timestamp here").is_none());
    }
}
