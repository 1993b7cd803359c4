//! 도메인 타입 정의
//!
//! 파이프라인을 흐르는 레코드와 필드 참조 타입을 정의합니다.
//! 레코드는 브로드캐스트된 이후 불변으로 취급되며, 노드가 내용을
//! 바꾸려면 반드시 사본을 만들어 수정해야 합니다.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde_json::Value;

use crate::error::ParseError;

/// 텍스트 직렬화 형식의 타임스탬프 포맷 (공백 구분)
pub const TEXT_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// JSON 직렬화 형식의 타임스탬프 포맷 (ISO-8601, 'T' 구분)
pub const ISO_TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// extradata 항목 값
///
/// 정규식 캡처는 텍스트로, 집계 결과 등 수치 데이터는 숫자로 저장됩니다.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// 텍스트 값
    Text(String),
    /// 수치 값
    Number(f64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_owned())
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<&FieldValue> for Value {
    fn from(v: &FieldValue) -> Self {
        match v {
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Number(n) => Value::from(*n),
        }
    }
}

/// 레코드 고정 속성
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordAttr {
    Timestamp,
    Host,
    Content,
    Comment,
    Group,
}

/// 분류 규칙과 재작성 규칙이 사용하는 필드 참조
///
/// 일반 이름은 레코드 고정 속성을, `.`으로 시작하는 이름은
/// extradata 키를 가리킵니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRef {
    /// 고정 속성 참조
    Attr(RecordAttr),
    /// extradata 키 참조
    Extra(String),
}

impl FieldRef {
    /// 필드 이름을 해석합니다. 알 수 없는 고정 속성 이름은 에러입니다.
    pub fn parse(name: &str) -> Result<Self, ParseError> {
        if let Some(key) = name.strip_prefix('.') {
            if key.is_empty() {
                return Err(ParseError::Malformed {
                    reason: "empty extradata field name".to_owned(),
                });
            }
            return Ok(FieldRef::Extra(key.to_owned()));
        }
        let attr = match name {
            "timestamp" => RecordAttr::Timestamp,
            "host" => RecordAttr::Host,
            "content" => RecordAttr::Content,
            "comment" => RecordAttr::Comment,
            "group" => RecordAttr::Group,
            other => {
                return Err(ParseError::Malformed {
                    reason: format!("unknown record field: {other}"),
                });
            }
        };
        Ok(FieldRef::Attr(attr))
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldRef::Attr(RecordAttr::Timestamp) => f.write_str("timestamp"),
            FieldRef::Attr(RecordAttr::Host) => f.write_str("host"),
            FieldRef::Attr(RecordAttr::Content) => f.write_str("content"),
            FieldRef::Attr(RecordAttr::Comment) => f.write_str("comment"),
            FieldRef::Attr(RecordAttr::Group) => f.write_str("group"),
            FieldRef::Extra(key) => write!(f, ".{key}"),
        }
    }
}

/// 파이프라인을 흐르는 단일 로그 레코드
///
/// 소스 노드가 원본 라인을 파싱하여 생성하고, 분류기가 사본에
/// 그룹/캡처 정보를 덧붙이며, 출력 노드가 직렬화합니다.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// 레코드 발생 시각 (초 단위 정밀도로 직렬화됨)
    pub timestamp: NaiveDateTime,
    /// 발생 호스트
    pub host: String,
    /// 메시지 본문
    pub content: String,
    /// 분류/캡처로 덧붙은 추가 필드 (필요해질 때 생성)
    pub extradata: Option<BTreeMap<String, FieldValue>>,
    /// 사람용 주석
    pub comment: Option<String>,
    /// 분류기가 스탬프한 그룹 이름
    pub group: Option<String>,
    /// 분류기를 통과한 횟수
    pub trace_depth: u32,
}

impl Record {
    /// 고정 속성만으로 레코드를 생성합니다.
    pub fn new(
        timestamp: NaiveDateTime,
        host: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Record {
            timestamp,
            host: host.into(),
            content: content.into(),
            extradata: None,
            comment: None,
            group: None,
            trace_depth: 0,
        }
    }

    /// extradata 항목을 추가합니다. 맵이 없으면 이때 만들어집니다.
    pub fn insert_extra(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.extradata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
    }

    /// extradata 항목을 조회합니다.
    pub fn extra(&self, key: &str) -> Option<&FieldValue> {
        self.extradata.as_ref().and_then(|m| m.get(key))
    }

    /// 여러 extradata 항목을 한 번에 병합합니다. 기존 키는 덮어씁니다.
    pub fn merge_extras<I, K, V>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let map = self.extradata.get_or_insert_with(BTreeMap::new);
        for (k, v) in entries {
            map.insert(k.into(), v.into());
        }
    }

    /// 필드 참조를 텍스트 값으로 해석합니다. 비어 있는 필드는 `None`입니다.
    pub fn field(&self, field: &FieldRef) -> Option<Cow<'_, str>> {
        match field {
            FieldRef::Attr(RecordAttr::Timestamp) => {
                Some(Cow::Owned(self.timestamp.format(TEXT_TS_FORMAT).to_string()))
            }
            FieldRef::Attr(RecordAttr::Host) => Some(Cow::Borrowed(self.host.as_str())),
            FieldRef::Attr(RecordAttr::Content) => Some(Cow::Borrowed(self.content.as_str())),
            FieldRef::Attr(RecordAttr::Comment) => {
                self.comment.as_deref().map(Cow::Borrowed)
            }
            FieldRef::Attr(RecordAttr::Group) => self.group.as_deref().map(Cow::Borrowed),
            FieldRef::Extra(key) => self.extra(key).map(|v| match v {
                FieldValue::Text(s) => Cow::Borrowed(s.as_str()),
                FieldValue::Number(n) => Cow::Owned(n.to_string()),
            }),
        }
    }

    /// 텍스트 필드에 값을 기록합니다. 타임스탬프는 대상이 될 수 없습니다.
    pub fn set_field(&mut self, field: &FieldRef, value: String) {
        match field {
            FieldRef::Attr(RecordAttr::Timestamp) => {}
            FieldRef::Attr(RecordAttr::Host) => self.host = value,
            FieldRef::Attr(RecordAttr::Content) => self.content = value,
            FieldRef::Attr(RecordAttr::Comment) => self.comment = Some(value),
            FieldRef::Attr(RecordAttr::Group) => self.group = Some(value),
            FieldRef::Extra(key) => self.insert_extra(key.clone(), value),
        }
    }

    /// JSON 객체 형식으로 변환합니다.
    ///
    /// 고정 키는 `timestamp`(ISO-8601), `host`, `content`이며 extradata
    /// 키가 최상위에 병합됩니다. 키가 충돌하면 extradata가 우선합니다.
    pub fn to_json_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert(
            "timestamp".to_owned(),
            Value::String(self.timestamp.format(ISO_TS_FORMAT).to_string()),
        );
        map.insert("host".to_owned(), Value::String(self.host.clone()));
        map.insert("content".to_owned(), Value::String(self.content.clone()));
        if let Some(extras) = &self.extradata {
            for (k, v) in extras {
                map.insert(k.clone(), Value::from(v));
            }
        }
        Value::Object(map)
    }

    /// 폼 인코딩용 평탄한 키/값 쌍 목록으로 변환합니다.
    pub fn to_form_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            (
                "timestamp".to_owned(),
                self.timestamp.format(TEXT_TS_FORMAT).to_string(),
            ),
            ("host".to_owned(), self.host.clone()),
            ("content".to_owned(), self.content.clone()),
        ];
        if let Some(extras) = &self.extradata {
            for (k, v) in extras {
                pairs.push((k.clone(), v.to_string()));
            }
        }
        pairs
    }
}

impl fmt::Display for Record {
    /// 파이프 연동용 텍스트 형식.
    ///
    /// `h:<host> ts:<timestamp> content:<content>` 한 줄이며 주석이
    /// 있으면 다음 줄에 덧붙습니다.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "h:{} ts:{} content:{}",
            self.host,
            self.timestamp.format(TEXT_TS_FORMAT),
            self.content,
        )?;
        if let Some(comment) = &self.comment {
            write!(f, "\n{comment}")?;
        }
        Ok(())
    }
}

impl FromStr for Record {
    type Err = ParseError;

    /// `Display` 출력의 첫 줄을 다시 레코드로 파싱합니다.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix("h:").ok_or_else(|| ParseError::Malformed {
            reason: "missing 'h:' prefix".to_owned(),
        })?;
        let (host, rest) = rest.split_once(" ts:").ok_or_else(|| ParseError::Malformed {
            reason: "missing 'ts:' field".to_owned(),
        })?;
        let (ts_str, content) =
            rest.split_once(" content:")
                .ok_or_else(|| ParseError::Malformed {
                    reason: "missing 'content:' field".to_owned(),
                })?;
        let timestamp =
            NaiveDateTime::parse_from_str(ts_str, TEXT_TS_FORMAT).map_err(|e| {
                ParseError::Timestamp {
                    value: ts_str.to_owned(),
                    reason: e.to_string(),
                }
            })?;
        Ok(Record::new(timestamp, host, content))
    }
}
