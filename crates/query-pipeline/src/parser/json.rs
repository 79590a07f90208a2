//! 행 단위 JSON 감사 로그 파서
//!
//! 로그 수집 서비스가 내보내는 JSON 행을 파싱합니다. 메시지 필드에 `AUDIT:`
//! 레코드가 있어야 하며, 메타데이터는 형제 필드에서 먼저 찾고 없으면 메시지에
//! 포함된 PostgreSQL 로그 prefix에서 보충합니다.
//!
//! # 사용 예시
//! ```ignore
//! use querywatch_pipeline::parser::JsonRowParser;
//! use querywatch_core::pipeline::QueryParser;
//!
//! let parser = JsonRowParser::default();
//! let raw = br#"{"event_message":"AUDIT: SESSION,1,1,READ,SELECT,,,SELECT 1","parsed":{"user_name":"app"}}"#;
//! let query = parser.parse(raw)?.unwrap();
//! assert_eq!(query.metadata().user_id.as_deref(), Some("app"));
//! ```

use std::time::{Duration, SystemTime};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use querywatch_core::error::ParseError;
use querywatch_core::pipeline::QueryParser;
use querywatch_core::types::{Query, QueryMetadata};

use super::audit::AuditRecord;
use super::logline::{audit_start, shift_offset, split_line};
use super::{DEFAULT_MAX_INPUT_SIZE, decode_utf8, malformed};

/// 파서 형식 이름
pub const FORMAT_NAME: &str = "json";

/// JSON 필드 매핑 설정
///
/// 각 메타데이터 항목은 후보 경로를 순서대로 시도합니다 (dot notation 지원).
#[derive(Debug, Clone)]
pub struct JsonFieldMapping {
    /// 감사 메시지 필드 (기본: "event_message")
    pub message_fields: Vec<String>,
    /// 타임스탬프 필드 (ISO 8601 문자열 또는 epoch 마이크로초)
    pub timestamp_fields: Vec<String>,
    pub user_fields: Vec<String>,
    pub database_fields: Vec<String>,
    pub session_fields: Vec<String>,
    pub client_fields: Vec<String>,
}

impl Default for JsonFieldMapping {
    fn default() -> Self {
        let paths = |items: &[&str]| items.iter().map(|s| (*s).to_owned()).collect();
        Self {
            message_fields: paths(&["event_message", "message"]),
            timestamp_fields: paths(&["timestamp"]),
            user_fields: paths(&["parsed.user_name", "user_name"]),
            database_fields: paths(&["parsed.database_name", "database_name"]),
            session_fields: paths(&["parsed.session_id", "session_id"]),
            client_fields: paths(&["parsed.connection_from", "connection_from"]),
        }
    }
}

/// 행 단위 JSON 파서
pub struct JsonRowParser {
    /// 필드 매핑 설정
    mapping: JsonFieldMapping,
    /// 최대 허용 입력 크기 (바이트)
    max_input_size: usize,
}

impl JsonRowParser {
    /// 커스텀 필드 매핑으로 새 파서를 생성합니다.
    pub fn new(mapping: JsonFieldMapping) -> Self {
        Self {
            mapping,
            max_input_size: DEFAULT_MAX_INPUT_SIZE,
        }
    }

    /// 최대 입력 크기를 설정합니다.
    pub fn with_max_input_size(mut self, size: usize) -> Self {
        self.max_input_size = size;
        self
    }

    /// JSON 값에서 경로를 따라 값을 찾습니다 (예: "parsed.user_name").
    fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
        path.split('.')
            .try_fold(value, |current, part| current.get(part))
            .filter(|v| !v.is_null())
    }

    /// 후보 경로 중 처음으로 비어 있지 않은 문자열 값을 반환합니다.
    fn extract_string(value: &Value, paths: &[String]) -> Option<String> {
        paths.iter().find_map(|path| match Self::lookup(value, path)? {
            Value::String(s) => QueryMetadata::non_empty(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }

    fn extract_timestamp(value: &Value, paths: &[String]) -> Option<SystemTime> {
        paths.iter().find_map(|path| match Self::lookup(value, path)? {
            Value::Number(n) => match n.as_i64() {
                Some(micros) => from_epoch_micros_exact(micros),
                None => n.as_f64().and_then(from_epoch_micros),
            },
            Value::String(s) => parse_timestamp(s),
            _ => None,
        })
    }

    fn parse_json(&self, raw: &[u8]) -> Result<Option<Query>, ParseError> {
        let text = decode_utf8(raw, FORMAT_NAME, self.max_input_size)?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        let value: Value = serde_json::from_str(text)
            .map_err(|e| malformed(FORMAT_NAME, e.column(), e.to_string()))?;

        // 최상위가 JSON 객체여야 합니다
        if !value.is_object() {
            return Err(malformed(
                FORMAT_NAME,
                0,
                "expected JSON object at top level",
            ));
        }

        let Some(message) = Self::extract_string(&value, &self.mapping.message_fields) else {
            return Ok(None);
        };

        // 메시지에 로그 prefix가 붙어 있으면 떼어내고 그 값을 기본 메타데이터로 씁니다
        let (body, body_offset, mut metadata) = match split_line(&message) {
            Some(line) => (line.message, line.message_offset, line.metadata),
            None => (message.as_str(), 0, QueryMetadata::default()),
        };
        let Some(start) = audit_start(body) else {
            return Ok(None);
        };

        // 형제 필드가 있으면 덮어씁니다
        overlay(
            &mut metadata.timestamp,
            Self::extract_timestamp(&value, &self.mapping.timestamp_fields),
        );
        overlay(
            &mut metadata.user_id,
            Self::extract_string(&value, &self.mapping.user_fields),
        );
        overlay(
            &mut metadata.database,
            Self::extract_string(&value, &self.mapping.database_fields),
        );
        overlay(
            &mut metadata.session_id,
            Self::extract_string(&value, &self.mapping.session_fields),
        );
        overlay(
            &mut metadata.client_source,
            Self::extract_string(&value, &self.mapping.client_fields),
        );

        let record = AuditRecord::parse_message(&body[start..])
            .map_err(|e| shift_offset(e, body_offset + start))?;
        record.into_query(metadata).map(Some)
    }
}

impl Default for JsonRowParser {
    fn default() -> Self {
        Self::new(JsonFieldMapping::default())
    }
}

impl QueryParser for JsonRowParser {
    fn format_name(&self) -> &str {
        FORMAT_NAME
    }

    fn parse(&self, raw: &[u8]) -> Result<Option<Query>, ParseError> {
        self.parse_json(raw)
    }
}

fn overlay<T>(target: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *target = value;
    }
}

fn from_epoch_micros_exact(micros: i64) -> Option<SystemTime> {
    let micros = u64::try_from(micros).ok()?;
    SystemTime::UNIX_EPOCH.checked_add(Duration::from_micros(micros))
}

/// epoch 마이크로초를 시각으로 변환합니다. 음수나 비정상 값은 `None`.
fn from_epoch_micros(micros: f64) -> Option<SystemTime> {
    if !micros.is_finite() || micros < 0.0 {
        return None;
    }
    let secs = micros / 1_000_000.0;
    Duration::try_from_secs_f64(secs)
        .ok()
        .and_then(|d| SystemTime::UNIX_EPOCH.checked_add(d))
}

/// 타임스탬프 문자열을 파싱합니다.
///
/// 지원 형식:
/// - RFC 3339 (ISO 8601): `2024-01-15T12:00:00.123456+00:00`
/// - 시간대 없는 ISO 형식 (UTC로 간주): `2024-01-15 12:00:00.123`
/// - 숫자 문자열 (epoch 마이크로초)
fn parse_timestamp(value: &str) -> Option<SystemTime> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(SystemTime::from(dt));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(SystemTime::from(Utc.from_utc_datetime(&naive)));
        }
    }
    match value.parse::<i64>() {
        Ok(micros) => from_epoch_micros_exact(micros),
        Err(_) => value.parse::<f64>().ok().and_then(from_epoch_micros),
    }
}
