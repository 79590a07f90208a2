//! 감사 로그 파싱 모듈 -- pgaudit, PostgreSQL 로그 라인, JSON 행
//!
//! [`ParserRouter`]는 원시 레코드에 붙은 [`RecordFormat`]에 따라 파서를 선택합니다.
//! 각 파서는 core의 [`QueryParser`] trait을 구현합니다.
//!
//! # 지원 형식
//! - pgaudit `AUDIT:` 메시지 ([`PgAuditParser`])
//! - PostgreSQL 서버 로그 라인 ([`PostgresLogLineParser`])
//! - 행 단위 JSON ([`JsonRowParser`])
//!
//! 감사 레코드가 아닌 입력(예: 일반 `LOG:` 라인)은 `Ok(None)`으로 건너뛰고,
//! 감사 레코드처럼 보이지만 문법이 맞지 않으면 `ParseError::MalformedRecord`를 반환합니다.

pub mod audit;
pub mod json;
pub mod logline;

pub use audit::{AuditRecord, AuditType, PgAuditParser};
pub use json::{JsonFieldMapping, JsonRowParser};
pub use logline::PostgresLogLineParser;

use serde::{Deserialize, Serialize};

use querywatch_core::error::ParseError;
use querywatch_core::pipeline::QueryParser;
use querywatch_core::types::Query;

use crate::source::RawRecord;

/// 파서 기본 최대 입력 크기
pub const DEFAULT_MAX_INPUT_SIZE: usize = 1024 * 1024; // 1MB

/// 원시 레코드 형식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    /// pgaudit `AUDIT:` 메시지
    Audit,
    /// PostgreSQL 서버 로그 라인
    #[default]
    LogLine,
    /// 행 단위 JSON
    Json,
}

impl RecordFormat {
    /// 설정/CLI 이름에서 형식을 찾습니다.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "audit" | "pgaudit" => Some(Self::Audit),
            "logline" | "postgres_log" | "log" => Some(Self::LogLine),
            "json" | "jsonl" => Some(Self::Json),
            _ => None,
        }
    }

    /// 이 형식을 처리하는 파서의 `format_name()`
    pub fn parser_name(&self) -> &'static str {
        match self {
            Self::Audit => audit::FORMAT_NAME,
            Self::LogLine => logline::FORMAT_NAME,
            Self::Json => json::FORMAT_NAME,
        }
    }
}

/// 파서 라우터 -- 레코드 형식에 맞는 파서를 선택합니다.
pub struct ParserRouter {
    /// 등록된 파서 목록
    parsers: Vec<Box<dyn QueryParser>>,
}

impl ParserRouter {
    /// 빈 파서 라우터를 생성합니다.
    pub fn new() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// 기본 파서 세트 (pgaudit + 로그 라인 + JSON)로 라우터를 생성합니다.
    pub fn with_defaults(max_input_size: usize) -> Self {
        Self::new()
            .register(Box::new(
                PgAuditParser::new().with_max_input_size(max_input_size),
            ))
            .register(Box::new(
                PostgresLogLineParser::new().with_max_input_size(max_input_size),
            ))
            .register(Box::new(
                JsonRowParser::default().with_max_input_size(max_input_size),
            ))
    }

    /// 파서를 등록합니다. 같은 형식 이름이면 먼저 등록된 파서가 사용됩니다.
    pub fn register(mut self, parser: Box<dyn QueryParser>) -> Self {
        self.parsers.push(parser);
        self
    }

    /// 원시 레코드를 파싱하고 출처 태그를 채웁니다.
    pub fn parse(&self, raw: &RawRecord) -> Result<Option<Query>, ParseError> {
        let query = self.parse_with(raw.format.parser_name(), &raw.data)?;
        Ok(query.map(|q| q.with_default_source(&raw.source)))
    }

    /// 특정 형식 이름의 파서로 직접 파싱합니다.
    pub fn parse_with(&self, format_name: &str, raw: &[u8]) -> Result<Option<Query>, ParseError> {
        self.parsers
            .iter()
            .find(|p| p.format_name() == format_name)
            .ok_or_else(|| ParseError::UnsupportedFormat(format_name.to_owned()))?
            .parse(raw)
    }

    /// 등록된 파서 형식 이름 목록을 반환합니다.
    pub fn registered_formats(&self) -> Vec<&str> {
        self.parsers.iter().map(|p| p.format_name()).collect()
    }
}

impl Default for ParserRouter {
    fn default() -> Self {
        Self::with_defaults(DEFAULT_MAX_INPUT_SIZE)
    }
}

/// `MalformedRecord` 에러를 만듭니다.
pub(crate) fn malformed(format: &str, offset: usize, reason: impl Into<String>) -> ParseError {
    ParseError::MalformedRecord {
        format: format.to_owned(),
        offset,
        reason: reason.into(),
    }
}

/// 크기 제한을 확인하고 UTF-8 문자열로 변환합니다.
pub(crate) fn decode_utf8<'a>(
    raw: &'a [u8],
    format: &str,
    max_input_size: usize,
) -> Result<&'a str, ParseError> {
    if raw.len() > max_input_size {
        return Err(ParseError::TooLarge {
            size: raw.len(),
            max: max_input_size,
        });
    }
    std::str::from_utf8(raw)
        .map_err(|e| malformed(format, e.valid_up_to(), "invalid UTF-8"))
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use bytes::Bytes;

    use super::*;

    fn raw(format: RecordFormat, line: &str) -> RawRecord {
        RawRecord {
            data: Bytes::copy_from_slice(line.as_bytes()),
            source: "test".to_owned(),
            received_at: SystemTime::now(),
            format,
        }
    }

    #[test]
    fn empty_router_returns_unsupported() {
        let router = ParserRouter::new();
        let err = router
            .parse(&raw(RecordFormat::Audit, "AUDIT: SESSION,1,1,READ,SELECT,,,SELECT 1"))
            .unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedFormat(_)));
    }

    #[test]
    fn with_defaults_has_all_formats() {
        let router = ParserRouter::default();
        let formats = router.registered_formats();
        assert_eq!(formats, vec!["pgaudit", "postgres_log", "json"]);
    }

    #[test]
    fn record_format_names() {
        assert_eq!(RecordFormat::from_name("AUDIT"), Some(RecordFormat::Audit));
        assert_eq!(RecordFormat::from_name("logline"), Some(RecordFormat::LogLine));
        assert_eq!(RecordFormat::from_name("jsonl"), Some(RecordFormat::Json));
        assert_eq!(RecordFormat::from_name("csv"), None);
        assert_eq!(RecordFormat::Json.parser_name(), "json");
    }

    #[test]
    fn router_dispatches_by_format_and_tags_source() {
        let router = ParserRouter::default();
        let query = router
            .parse(&raw(
                RecordFormat::Audit,
                "AUDIT: SESSION,1,1,READ,SELECT,TABLE,public.users,SELECT * FROM users",
            ))
            .unwrap()
            .unwrap();
        assert_eq!(query.sql(), "SELECT * FROM users");
        assert_eq!(query.metadata().source.as_deref(), Some("test"));
    }

    #[test]
    fn router_skips_non_audit_log_lines() {
        let router = ParserRouter::default();
        let result = router
            .parse(&raw(
                RecordFormat::LogLine,
                "2024-01-15 12:00:00 UTC:10.0.0.1(5432):app@shop:[42]:LOG:  checkpoint starting",
            ))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn decode_rejects_oversized_and_invalid_utf8() {
        let err = decode_utf8(&[b'a'; 16], "pgaudit", 8).unwrap_err();
        assert!(matches!(err, ParseError::TooLarge { size: 16, max: 8 }));

        let err = decode_utf8(&[b'A', 0xff, b'B'], "pgaudit", 64).unwrap_err();
        assert!(matches!(
            err,
            ParseError::MalformedRecord { offset: 1, .. }
        ));
    }
}
