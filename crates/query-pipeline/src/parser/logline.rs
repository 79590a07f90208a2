//! PostgreSQL 서버 로그 라인 파서
//!
//! `log_line_prefix = '%t:%r:%u@%d:[%p]:'` 형식의 라인에서 메타데이터를 뽑고,
//! 메시지 안의 `AUDIT:` 레코드를 [`AuditRecord`]로 파싱합니다.
//!
//! ```text
//! 2024-01-15 12:00:00 UTC:10.0.0.5(52144):app@shop:[4711]:LOG:  AUDIT: SESSION,1,1,READ,...
//! ```
//!
//! prefix가 맞지 않는 라인이나 `AUDIT:`로 시작하지 않는 메시지는 건너뜁니다 (`Ok(None)`).
//! 메시지 중간의 `AUDIT:`는 레코드가 아닙니다. 문장 로그에 섞인 사용자 SQL일 수 있습니다.

use std::sync::OnceLock;
use std::time::SystemTime;

use chrono::{NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use tracing::debug;

use querywatch_core::error::ParseError;
use querywatch_core::pipeline::QueryParser;
use querywatch_core::types::{Query, QueryMetadata};

use super::audit::{AUDIT_MARKER, AuditRecord};
use super::{DEFAULT_MAX_INPUT_SIZE, decode_utf8};

/// 파서 형식 이름
pub const FORMAT_NAME: &str = "postgres_log";

const LOG_LINE_PATTERN: &str = r"^(\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2}(?:\.\d+)?)\s+(\w+):([^:]*):([^:]*):\[(\d+)\]:\s*(\w+):\s*(.*)$";

/// PostgreSQL이 알 수 없는 값에 쓰는 표기
const UNKNOWN_VALUE: &str = "[unknown]";

fn line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(LOG_LINE_PATTERN).expect("log line pattern is a valid regex"))
}

/// prefix를 분리한 로그 라인
pub(crate) struct LogLine<'a> {
    pub metadata: QueryMetadata,
    pub level: &'a str,
    pub message: &'a str,
    /// 원본 라인에서 `message`가 시작하는 바이트 위치
    pub message_offset: usize,
}

/// 로그 라인의 prefix를 분리합니다. 형식이 맞지 않으면 `None`.
pub(crate) fn split_line(line: &str) -> Option<LogLine<'_>> {
    let caps = line_regex().captures(line)?;
    let group = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or_default();

    let (user, database) = match group(4).split_once('@') {
        Some((user, db)) => (known(user), known(db)),
        None => (known(group(4)), None),
    };
    let message = caps.get(7)?;

    Some(LogLine {
        metadata: QueryMetadata {
            timestamp: parse_timestamp(group(1), group(2)),
            user_id: user,
            database,
            client_source: known(group(3)),
            session_id: QueryMetadata::non_empty(group(5)),
            ..Default::default()
        },
        level: caps.get(6).map(|m| m.as_str()).unwrap_or_default(),
        message: message.as_str(),
        message_offset: message.start(),
    })
}

fn known(value: &str) -> Option<String> {
    QueryMetadata::non_empty(value).filter(|v| v != UNKNOWN_VALUE)
}

/// prefix 타임스탬프를 해석합니다.
///
/// 시간대가 UTC/GMT일 때만 시각을 확정합니다. 그 외 시간대 약어는 오프셋을
/// 알 수 없으므로 `None`을 반환합니다.
fn parse_timestamp(value: &str, zone: &str) -> Option<SystemTime> {
    if !matches!(zone.to_ascii_uppercase().as_str(), "UTC" | "GMT" | "Z") {
        debug!(zone, "log line timezone is not UTC, timestamp ignored");
        return None;
    }
    let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
    let naive = NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Some(SystemTime::from(Utc.from_utc_datetime(&naive)))
}

/// 메시지가 (앞 공백 뒤) `AUDIT:`로 시작하면 그 위치를 반환합니다.
pub(crate) fn audit_start(message: &str) -> Option<usize> {
    let leading = message.len() - message.trim_start().len();
    message[leading..]
        .starts_with(AUDIT_MARKER)
        .then_some(leading)
}

/// `MalformedRecord`의 offset을 원본 입력 기준으로 옮깁니다.
pub(crate) fn shift_offset(err: ParseError, by: usize) -> ParseError {
    match err {
        ParseError::MalformedRecord {
            format,
            offset,
            reason,
        } => ParseError::MalformedRecord {
            format,
            offset: offset + by,
            reason,
        },
        other => other,
    }
}

/// PostgreSQL 로그 라인 파서
pub struct PostgresLogLineParser {
    /// 최대 허용 입력 크기 (바이트)
    max_input_size: usize,
}

impl PostgresLogLineParser {
    pub fn new() -> Self {
        Self {
            max_input_size: DEFAULT_MAX_INPUT_SIZE,
        }
    }

    /// 최대 입력 크기를 설정합니다.
    pub fn with_max_input_size(mut self, size: usize) -> Self {
        self.max_input_size = size;
        self
    }

    fn parse_line(line: &str) -> Result<Option<Query>, ParseError> {
        let Some(parsed) = split_line(line) else {
            return Ok(None);
        };
        let Some(start) = audit_start(parsed.message) else {
            return Ok(None);
        };

        let record = AuditRecord::parse_message(&parsed.message[start..])
            .map_err(|e| shift_offset(e, parsed.message_offset + start))?;
        debug!(level = parsed.level, "audit record found in log line");
        record.into_query(parsed.metadata).map(Some)
    }
}

impl Default for PostgresLogLineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryParser for PostgresLogLineParser {
    fn format_name(&self) -> &str {
        FORMAT_NAME
    }

    fn parse(&self, raw: &[u8]) -> Result<Option<Query>, ParseError> {
        let line = decode_utf8(raw, FORMAT_NAME, self.max_input_size)?.trim_end();
        if line.is_empty() {
            return Ok(None);
        }
        Self::parse_line(line)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use querywatch_core::types::CommandClass;

    use super::*;

    const AUDIT_LINE: &str = "2024-01-15 12:00:00 UTC:10.0.0.5(52144):app@shop:[4711]:LOG:  AUDIT: SESSION,1,1,READ,SELECT,TABLE,public.users,SELECT * FROM users WHERE id = 1 OR 1=1;";

    #[test]
    fn parses_audit_line_with_metadata() {
        let parser = PostgresLogLineParser::new();
        let query = parser.parse(AUDIT_LINE.as_bytes()).unwrap().unwrap();

        assert_eq!(query.sql(), "SELECT * FROM users WHERE id = 1 OR 1=1");
        let meta = query.metadata();
        assert_eq!(meta.user_id.as_deref(), Some("app"));
        assert_eq!(meta.database.as_deref(), Some("shop"));
        assert_eq!(meta.client_source.as_deref(), Some("10.0.0.5(52144)"));
        assert_eq!(meta.session_id.as_deref(), Some("4711"));
        assert_eq!(meta.command_class, Some(CommandClass::Read));
        assert_eq!(meta.object_name.as_deref(), Some("public.users"));
        assert_eq!(
            meta.timestamp,
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_705_320_000))
        );
    }

    #[test]
    fn fractional_seconds_are_accepted() {
        let line = AUDIT_LINE.replace("12:00:00 UTC", "12:00:00.250 UTC");
        let query = PostgresLogLineParser::new()
            .parse(line.as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(
            query.metadata().timestamp,
            Some(SystemTime::UNIX_EPOCH + Duration::from_millis(1_705_320_000_250))
        );
    }

    #[test]
    fn non_utc_zone_leaves_timestamp_empty() {
        let line = AUDIT_LINE.replace(" UTC:", " KST:");
        let query = PostgresLogLineParser::new()
            .parse(line.as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(query.metadata().timestamp, None);
    }

    #[test]
    fn non_audit_message_is_skipped() {
        let parser = PostgresLogLineParser::new();
        let line = "2024-01-15 12:00:00 UTC:10.0.0.5(52144):app@shop:[4711]:LOG:  connection authorized: user=app";
        assert!(parser.parse(line.as_bytes()).unwrap().is_none());
    }

    #[test]
    fn unrecognized_prefix_is_skipped() {
        let parser = PostgresLogLineParser::new();
        assert!(parser.parse(b"random text AUDIT: nope").unwrap().is_none());
        assert!(parser.parse(b"").unwrap().is_none());
    }

    #[test]
    fn marker_inside_statement_log_is_not_a_record() {
        let parser = PostgresLogLineParser::new();
        let forged = "2024-01-15 12:00:00 UTC:10.0.0.5(52144):app@shop:[4711]:LOG:  statement: SELECT 1 -- AUDIT: SESSION,1,1,READ,SELECT,TABLE,public.x,SELECT harmless";
        assert!(parser.parse(forged.as_bytes()).unwrap().is_none());

        let mention = "2024-01-15 12:00:00 UTC:10.0.0.5(52144):app@shop:[4711]:LOG:  statement: INSERT INTO notes VALUES ('AUDIT: done')";
        assert!(parser.parse(mention.as_bytes()).unwrap().is_none());
    }

    #[test]
    fn unknown_user_and_database_become_none() {
        let line = AUDIT_LINE.replace("app@shop", "[unknown]@[unknown]");
        let query = PostgresLogLineParser::new()
            .parse(line.as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(query.metadata().user_id, None);
        assert_eq!(query.metadata().database, None);
    }

    #[test]
    fn malformed_audit_offset_points_into_line() {
        let line = "2024-01-15 12:00:00 UTC:h:u@d:[1]:LOG:  AUDIT: SESSION,x,1,READ,SELECT,,,SELECT 1";
        let err = PostgresLogLineParser::new()
            .parse(line.as_bytes())
            .unwrap_err();
        match err {
            ParseError::MalformedRecord { offset, .. } => {
                assert_eq!(offset, line.find(",x,").unwrap() + 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn trailing_newline_is_ignored() {
        let line = format!("{AUDIT_LINE}\r\n");
        let query = PostgresLogLineParser::new()
            .parse(line.as_bytes())
            .unwrap()
            .unwrap();
        assert!(query.sql().ends_with("OR 1=1"));
    }
}
