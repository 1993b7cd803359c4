//! Syslog 라인 파서
//!
//! syslog 계열의 세 가지 표현을 파싱합니다.
//!
//! # 지원 포맷
//! ```text
//! Dec 20 13:21:09 publicapi1 nginx: ...              (전통적 BSD 파일 포맷)
//! 2014-04-11T13:35:35.447571+03:00 webproxy nginx: ...   (RFC 3339 파일 포맷)
//! <22>Jan 23 13:38:33 mh-front01 dovecot: ...        (RFC 3164 네트워크 포맷)
//! ```
//!
//! 파일 포맷에는 PRI 필드가 없습니다. 네트워크 포맷의 PRI는
//! facility/severity로 분해해 extradata에 넣습니다.

use chrono::{DateTime, Datelike, Local, NaiveDateTime};

use relaypost_core::Record;

use super::Parser;

/// RFC 3164에서 유효한 최대 PRI 값
/// facility 최댓값 23 * 8 + severity 최댓값 7 = 191
const MAX_SYSLOG_PRI: u16 = 191;

/// 선행 공백을 건너뛰고 다음 공백 전까지의 토큰을 잘라냅니다.
///
/// syslog는 한 자리 날짜를 공백으로 패딩하므로 (`Dec  5`) 토큰 분리가
/// 연속 공백을 허용해야 합니다.
fn next_token(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start_matches(' ');
    if input.is_empty() {
        return None;
    }
    match input.find(' ') {
        Some(pos) => Some((&input[..pos], &input[pos + 1..])),
        None => Some((input, "")),
    }
}

/// `MMM [d]d HH:MM:SS host content` 본문을 파싱합니다.
///
/// BSD 타임스탬프에는 연도가 없으므로 현재 연도를 붙입니다. content는
/// 프로세스 태그를 포함한 호스트명 이후 전체입니다.
fn parse_bsd_body(body: &str) -> Option<Record> {
    let (month, rest) = next_token(body)?;
    let (day, rest) = next_token(rest)?;
    let (time, rest) = next_token(rest)?;
    let (host, content) = next_token(rest)?;

    let stamped = format!("{} {} {} {}", Local::now().year(), month, day, time);
    let timestamp = NaiveDateTime::parse_from_str(&stamped, "%Y %b %d %H:%M:%S").ok()?;

    Some(Record::new(timestamp, host, content.trim_start_matches(' ')))
}

/// 전통적 BSD syslog 파일 포맷 파서
///
/// syslog 데몬이 디스크에 남기는 `MMM [d]d HH:MM:SS host content` 형식을
/// 파싱합니다. 네트워크 전송 형식과 달리 PRI 필드가 없습니다.
#[derive(Default)]
pub struct SyslogBsdParser;

impl SyslogBsdParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for SyslogBsdParser {
    fn format_name(&self) -> &str {
        "syslog_bsd"
    }

    fn parse(&self, line: &str) -> Option<Record> {
        parse_bsd_body(line.trim_end_matches(['\r', '\n']))
    }
}

/// RFC 3339 타임스탬프를 쓰는 rsyslog 파일 포맷 파서
///
/// `2014-04-11T13:35:35.447571+03:00 host content` 형식을 파싱합니다.
/// 타임존 오프셋은 버리고 기록된 벽시계 시각을 유지하며, 초 이하
/// 정밀도는 메모리상에서만 유지됩니다.
#[derive(Default)]
pub struct SyslogRfc3339Parser;

impl SyslogRfc3339Parser {
    pub fn new() -> Self {
        Self
    }

    /// 오프셋이 붙은 형태를 먼저 시도하고, 없는 형태로 폴백합니다.
    fn parse_timestamp(token: &str) -> Option<NaiveDateTime> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(token) {
            return Some(dt.naive_local());
        }
        NaiveDateTime::parse_from_str(token, "%Y-%m-%dT%H:%M:%S%.f").ok()
    }
}

impl Parser for SyslogRfc3339Parser {
    fn format_name(&self) -> &str {
        "syslog_rfc3339"
    }

    fn parse(&self, line: &str) -> Option<Record> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (ts_token, rest) = next_token(line)?;
        let timestamp = Self::parse_timestamp(ts_token)?;
        let (host, content) = next_token(rest)?;
        Some(Record::new(timestamp, host, content.trim_start_matches(' ')))
    }
}

/// RFC 3164 네트워크 전송 포맷 파서
///
/// 소켓 소스가 받는 `<PRI>MMM [d]d HH:MM:SS host content` 형식을
/// 파싱합니다. PRI는 facility와 severity로 분해해 extradata의
/// `facility`/`severity` 숫자 필드로 넣습니다.
///
/// PRI = facility * 8 + severity (RFC 3164 4.1.1)
#[derive(Default)]
pub struct SyslogRfc3164Parser;

impl SyslogRfc3164Parser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for SyslogRfc3164Parser {
    fn format_name(&self) -> &str {
        "syslog_rfc3164"
    }

    fn parse(&self, line: &str) -> Option<Record> {
        let line = line.trim_end_matches(['\r', '\n']);
        let rest = line.strip_prefix('<')?;
        let (pri_str, body) = rest.split_once('>')?;
        if pri_str.is_empty() || pri_str.len() > 3 {
            return None;
        }
        let pri: u16 = pri_str.parse().ok()?;
        if pri > MAX_SYSLOG_PRI {
            return None;
        }

        let mut record = parse_bsd_body(body)?;
        record.insert_extra("facility", f64::from(pri / 8));
        record.insert_extra("severity", f64::from(pri % 8));
        Some(record)
    }
}
