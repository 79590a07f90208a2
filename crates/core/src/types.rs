//! 도메인 타입 -- 쿼리, 탐지 결과(Finding), 알림(Alert)
//!
//! 파서가 만든 [`Query`]는 분석기들에게 읽기 전용으로 전달되고,
//! 분석기의 [`Finding`]들은 [`Alert`]로 묶여 싱크로 전달됩니다.
//! 모든 타입은 생성 이후 변경되지 않습니다.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// 심각도 레벨
///
/// `Ord` 구현으로 심각도 비교가 가능합니다 (`Low < Medium < High < Critical`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// 낮은 심각도
    #[default]
    Low,
    /// 중간 심각도
    Medium,
    /// 높은 심각도
    High,
    /// 치명적, 즉시 대응 필요
    Critical,
}

impl Severity {
    /// 문자열에서 심각도를 파싱합니다.
    ///
    /// 대소문자를 구분하지 않습니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "med" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" | "crit" => Some(Self::Critical),
            _ => None,
        }
    }

    /// 한 단계 높은 심각도를 반환합니다. `Critical`은 그대로입니다.
    pub fn raised(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }

    /// 한 단계 낮은 심각도를 반환합니다. `Low`는 그대로입니다.
    pub fn lowered(self) -> Self {
        match self {
            Self::Low | Self::Medium => Self::Low,
            Self::High => Self::Medium,
            Self::Critical => Self::High,
        }
    }

    /// 메트릭 레이블 등에 쓰이는 소문자 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// 감사 로그의 명령 분류 (pgaudit `class` 필드)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandClass {
    /// SELECT, COPY ... TO
    Read,
    /// INSERT, UPDATE, DELETE, TRUNCATE, COPY ... FROM
    Write,
    /// CREATE, ALTER, DROP
    Ddl,
    /// GRANT, REVOKE, CREATE/ALTER/DROP ROLE
    Role,
    /// 함수 호출, DO 블록
    Function,
    /// 그 외 (인식하지 못한 분류 포함)
    Misc,
}

impl CommandClass {
    /// 감사 로그 토큰을 분류로 변환합니다.
    ///
    /// 닫힌 집합에 없는 값이면 `None`을 반환합니다. 호출자는 `Misc`로 대체하고
    /// 원래 토큰을 보존해야 합니다.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "READ" => Some(Self::Read),
            "WRITE" => Some(Self::Write),
            "DDL" => Some(Self::Ddl),
            "ROLE" => Some(Self::Role),
            "FUNCTION" => Some(Self::Function),
            "MISC" | "MISC_SET" => Some(Self::Misc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Ddl => "DDL",
            Self::Role => "ROLE",
            Self::Function => "FUNCTION",
            Self::Misc => "MISC",
        }
    }
}

impl fmt::Display for CommandClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 쿼리 메타데이터
///
/// 입력 어댑터마다 채울 수 있는 필드가 다르므로 모든 필드는 선택적입니다.
/// 값이 없는 필드는 빈 문자열이 아니라 항상 `None`으로 표현합니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetadata {
    /// 실행 시각
    pub timestamp: Option<SystemTime>,
    /// 실행 사용자
    pub user_id: Option<String>,
    /// 데이터베이스 이름
    pub database: Option<String>,
    /// 클라이언트 주소 또는 애플리케이션
    pub client_source: Option<String>,
    /// 명령 분류
    pub command_class: Option<CommandClass>,
    /// 대상 객체 (정규화된 테이블/뷰 이름)
    pub object_name: Option<String>,
    /// 명령 (예: `SELECT`, `COPY`)
    pub command: Option<String>,
    /// 객체 유형 (예: `TABLE`)
    pub object_type: Option<String>,
    /// 세션 식별자 (백엔드 pid 등)
    pub session_id: Option<String>,
    /// 레코드 출처 태그
    pub source: Option<String>,
}

impl QueryMetadata {
    /// 빈 문자열이나 공백만 있는 값을 `None`으로 정규화합니다.
    pub fn non_empty(value: &str) -> Option<String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    }
}

/// 분석 대상 쿼리
///
/// 생성 이후 변경되지 않으며, 분석기와 알림이 `Arc<Query>`로 공유합니다.
/// 역직렬화도 [`Query::new`]를 거칩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "QueryFields")]
pub struct Query {
    sql: String,
    metadata: QueryMetadata,
}

#[derive(Deserialize)]
struct QueryFields {
    sql: String,
    #[serde(default)]
    metadata: QueryMetadata,
}

impl TryFrom<QueryFields> for Query {
    type Error = ParseError;

    fn try_from(fields: QueryFields) -> Result<Self, Self::Error> {
        Self::new(fields.sql, fields.metadata)
    }
}

impl Query {
    /// 새 쿼리를 생성합니다.
    ///
    /// SQL 문이 비어 있거나 공백뿐이면 [`ParseError::EmptyStatement`]를 반환합니다.
    pub fn new(sql: impl Into<String>, metadata: QueryMetadata) -> Result<Self, ParseError> {
        let sql = sql.into();
        if sql.trim().is_empty() {
            return Err(ParseError::EmptyStatement);
        }
        Ok(Self { sql, metadata })
    }

    /// 메타데이터 없이 SQL 문만으로 쿼리를 생성합니다.
    pub fn from_sql(sql: impl Into<String>) -> Result<Self, ParseError> {
        Self::new(sql, QueryMetadata::default())
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn metadata(&self) -> &QueryMetadata {
        &self.metadata
    }

    /// 출처 태그가 비어 있으면 채운 쿼리를 반환합니다.
    ///
    /// 공유(`Arc`)되기 전, 파서 단계에서만 사용합니다.
    pub fn with_default_source(mut self, source: &str) -> Self {
        if self.metadata.source.is_none() {
            self.metadata.source = QueryMetadata::non_empty(source);
        }
        self
    }

    /// 로그 출력용으로 잘린 SQL 미리보기를 반환합니다.
    pub fn preview(&self, max_chars: usize) -> String {
        let mut preview: String = self.sql.chars().take(max_chars).collect();
        if self.sql.chars().count() > max_chars {
            preview.push_str("...");
        }
        preview
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.metadata.user_id {
            Some(user) => write!(f, "{user}: {}", self.preview(80)),
            None => write!(f, "{}", self.preview(80)),
        }
    }
}

/// 분석기 하나의 판정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// 판정을 낸 분석기 이름
    pub analyzer_name: String,
    /// 심각도
    pub severity: Severity,
    /// 사람이 읽을 수 있는 사유
    pub reason: String,
    /// 매칭된 시그니처/규칙 ID
    pub matched_pattern: Option<String>,
    /// 함께 매칭된 다른 규칙 등 추가 정보 (key-value 쌍)
    pub details: Vec<(String, String)>,
}

impl Finding {
    /// 새 판정을 생성합니다.
    pub fn new(
        analyzer_name: impl Into<String>,
        severity: Severity,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            analyzer_name: analyzer_name.into(),
            severity,
            reason: reason.into(),
            matched_pattern: None,
            details: Vec::new(),
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.matched_pattern = Some(pattern.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.analyzer_name, self.reason)?;
        if let Some(pattern) = &self.matched_pattern {
            write!(f, " (pattern: {pattern})")?;
        }
        Ok(())
    }
}

/// 보안 알림
///
/// 하나 이상의 [`Finding`]을 낸 쿼리마다 정확히 한 번 생성됩니다.
/// 빈 findings로는 만들 수 없습니다 ([`Alert::new`] 참고).
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    /// 알림 ID
    pub id: String,
    /// 알림을 유발한 쿼리
    pub query: Arc<Query>,
    /// 분석기 등록 순서대로 정렬된 판정 목록
    findings: Vec<Finding>,
    /// 생성 시각
    pub created_at: SystemTime,
}

impl Alert {
    /// 알림을 생성합니다. `findings`가 비어 있으면 `None`을 반환합니다.
    pub fn new(query: Arc<Query>, findings: Vec<Finding>) -> Option<Self> {
        if findings.is_empty() {
            return None;
        }
        Some(Self {
            id: uuid::Uuid::new_v4().to_string(),
            query,
            findings,
            created_at: SystemTime::now(),
        })
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// 판정들 중 가장 높은 심각도
    pub fn severity(&self) -> Severity {
        self.findings
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or_default()
    }

    /// 판정을 낸 분석기 이름 목록 (등록 순서)
    pub fn analyzer_names(&self) -> Vec<&str> {
        self.findings
            .iter()
            .map(|f| f.analyzer_name.as_str())
            .collect()
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} - {} finding(s)",
            self.severity(),
            self.query.preview(50),
            self.findings.len(),
        )
    }
}
