//! pgaudit 감사 레코드 파서
//!
//! # 레코드 형식
//! ```text
//! AUDIT: AUDIT_TYPE,STATEMENT_ID,SUBSTATEMENT_ID,CLASS,COMMAND,OBJECT_TYPE,OBJECT_NAME,STATEMENT[,PARAMETER]
//! ```
//!
//! 앞의 7개 필드만 쉼표로 분리하고, 나머지 전체를 SQL 문으로 취급합니다.
//! SQL 문 안의 쉼표, 세미콜론, 따옴표는 그대로 보존됩니다.
//!
//! # 사용 예시
//! ```ignore
//! use querywatch_pipeline::parser::AuditRecord;
//!
//! let record = AuditRecord::parse_message(
//!     "AUDIT: SESSION,1,1,READ,SELECT,TABLE,public.users,SELECT a, b FROM users;",
//! )?;
//! assert_eq!(record.statement, "SELECT a, b FROM users");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use querywatch_core::error::ParseError;
use querywatch_core::pipeline::QueryParser;
use querywatch_core::types::{CommandClass, Query, QueryMetadata};

use super::{DEFAULT_MAX_INPUT_SIZE, decode_utf8, malformed};

/// 파서 형식 이름
pub const FORMAT_NAME: &str = "pgaudit";

/// 감사 메시지 표지
pub const AUDIT_MARKER: &str = "AUDIT:";

/// 파라미터 로깅이 꺼져 있을 때 pgaudit이 붙이는 값
const NOT_LOGGED: &str = "<not logged>";

/// STATEMENT 앞의 고정 필드 수 + STATEMENT
const FIELD_COUNT: usize = 8;

/// 감사 유형
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditType {
    /// 세션 감사 로깅
    Session,
    /// 객체 감사 로깅
    Object,
}

impl AuditType {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "SESSION" => Some(Self::Session),
            "OBJECT" => Some(Self::Object),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "SESSION",
            Self::Object => "OBJECT",
        }
    }
}

impl fmt::Display for AuditType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 파싱된 pgaudit 레코드
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub audit_type: AuditType,
    pub statement_id: u64,
    pub substatement_id: u64,
    /// 레코드에 적힌 분류 토큰 그대로
    pub class: String,
    /// 분류 토큰을 닫힌 집합으로 정규화한 값 (모르는 값은 `Misc`)
    pub command_class: CommandClass,
    pub command: String,
    pub object_type: Option<String>,
    pub object_name: Option<String>,
    /// SQL 문 (앞뒤 공백과 마지막 세미콜론 하나 제거)
    pub statement: String,
    pub parameter: Option<String>,
}

impl AuditRecord {
    /// `AUDIT:`로 시작하는 메시지를 파싱합니다.
    ///
    /// 앞쪽 공백은 허용합니다. 에러의 `offset`은 `message` 기준 바이트 위치입니다.
    pub fn parse_message(message: &str) -> Result<Self, ParseError> {
        let leading = message.len() - message.trim_start().len();
        let rest = message[leading..]
            .strip_prefix(AUDIT_MARKER)
            .ok_or_else(|| malformed(FORMAT_NAME, leading, "missing 'AUDIT:' marker"))?;
        let body = rest.trim_start();
        let body_start = message.len() - body.len();

        let fields: Vec<&str> = body.splitn(FIELD_COUNT, ',').collect();
        if fields.len() < FIELD_COUNT {
            return Err(malformed(
                FORMAT_NAME,
                message.len(),
                format!(
                    "expected {FIELD_COUNT} comma-separated fields, found {}",
                    fields.len()
                ),
            ));
        }

        let mut offsets = [0usize; FIELD_COUNT];
        let mut pos = body_start;
        for (offset, field) in offsets.iter_mut().zip(&fields) {
            *offset = pos;
            pos += field.len() + 1;
        }

        let audit_type = AuditType::from_token(fields[0].trim()).ok_or_else(|| {
            malformed(
                FORMAT_NAME,
                offsets[0],
                format!("unknown audit type '{}'", fields[0].trim()),
            )
        })?;
        let statement_id = parse_id(fields[1], offsets[1], "statement id")?;
        let substatement_id = parse_id(fields[2], offsets[2], "substatement id")?;

        let class = fields[3].trim();
        if class.is_empty() || !class.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(malformed(
                FORMAT_NAME,
                offsets[3],
                format!("invalid class '{class}'"),
            ));
        }
        let command_class = CommandClass::from_token(class).unwrap_or_else(|| {
            debug!(class, "unrecognized audit class, treating as MISC");
            CommandClass::Misc
        });

        let command = fields[4].trim();
        if command.is_empty() {
            return Err(malformed(FORMAT_NAME, offsets[4], "empty command"));
        }

        let (statement, parameter) = split_statement(fields[7]);
        if statement.is_empty() {
            return Err(malformed(FORMAT_NAME, offsets[7], "empty statement"));
        }

        Ok(Self {
            audit_type,
            statement_id,
            substatement_id,
            class: class.to_owned(),
            command_class,
            command: command.to_owned(),
            object_type: QueryMetadata::non_empty(fields[5]),
            object_name: QueryMetadata::non_empty(fields[6]),
            statement: statement.to_owned(),
            parameter,
        })
    }

    /// 정규 형태의 `AUDIT:` 메시지로 다시 렌더링합니다.
    ///
    /// SQL 문 뒤에는 항상 세미콜론을 붙이므로 다시 파싱하면 같은 레코드가 됩니다.
    pub fn to_canonical(&self) -> String {
        let mut line = format!(
            "{AUDIT_MARKER} {},{},{},{},{},{},{},{};",
            self.audit_type,
            self.statement_id,
            self.substatement_id,
            self.class,
            self.command,
            self.object_type.as_deref().unwrap_or_default(),
            self.object_name.as_deref().unwrap_or_default(),
            self.statement,
        );
        if let Some(parameter) = &self.parameter {
            line.push(',');
            line.push_str(parameter);
        }
        line
    }

    /// 레코드 필드로 `metadata`를 채워 쿼리를 만듭니다.
    ///
    /// 호출자가 채운 타임스탬프, 사용자 등은 그대로 유지됩니다.
    pub fn into_query(self, mut metadata: QueryMetadata) -> Result<Query, ParseError> {
        metadata.command_class = Some(self.command_class);
        metadata.command = Some(self.command);
        metadata.object_type = self.object_type;
        metadata.object_name = self.object_name;
        Query::new(self.statement, metadata)
    }
}

fn parse_id(field: &str, offset: usize, name: &str) -> Result<u64, ParseError> {
    field.trim().parse::<u64>().map_err(|_| {
        malformed(
            FORMAT_NAME,
            offset,
            format!("{name} is not a number: '{}'", field.trim()),
        )
    })
}

/// SQL 문 필드에서 `<not logged>` 파라미터와 마지막 세미콜론을 분리합니다.
fn split_statement(field: &str) -> (&str, Option<String>) {
    let mut text = field.trim();
    let mut parameter = None;

    if let Some(before) = text
        .strip_suffix(NOT_LOGGED)
        .and_then(|s| s.strip_suffix(','))
    {
        text = before.trim_end();
        parameter = Some(NOT_LOGGED.to_owned());
    }

    (text.strip_suffix(';').unwrap_or(text), parameter)
}

/// pgaudit 메시지 파서
///
/// 입력 전체가 하나의 `AUDIT:` 메시지여야 합니다. 빈 입력은 건너뛰고,
/// 그 외의 형식 불일치는 `MalformedRecord`로 보고합니다.
pub struct PgAuditParser {
    /// 최대 허용 입력 크기 (바이트)
    max_input_size: usize,
}

impl PgAuditParser {
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

    /// 원시 바이트를 레코드로 파싱합니다.
    pub fn parse_record(&self, raw: &[u8]) -> Result<Option<AuditRecord>, ParseError> {
        let text = decode_utf8(raw, FORMAT_NAME, self.max_input_size)?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        AuditRecord::parse_message(text).map(Some)
    }
}

impl Default for PgAuditParser {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryParser for PgAuditParser {
    fn format_name(&self) -> &str {
        FORMAT_NAME
    }

    fn parse(&self, raw: &[u8]) -> Result<Option<Query>, ParseError> {
        match self.parse_record(raw)? {
            Some(record) => record.into_query(QueryMetadata::default()).map(Some),
            None => Ok(None),
        }
    }
}
