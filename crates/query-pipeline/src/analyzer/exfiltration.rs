//! 데이터 유출 분석기
//!
//! 민감 객체에 대한 대량 조회/내보내기를 판정합니다. 객체 등급이 기본 심각도를 정하고,
//! 조회 형태가 이를 올리거나 내립니다.
//!
//! | 규칙 | 조건 | 심각도 |
//! |------|------|--------|
//! | `bulk_export` | `COPY ... TO`, `INTO OUTFILE` | 등급 + 1 |
//! | `unbounded_select` | `SELECT *`에 WHERE/LIMIT 없음 | 등급 + 1 |
//! | `sensitive_read` | READ 분류, 허용 목록 밖 사용자 | 등급 (제한 조건이 있으면 - 1) |
//! | `sensitive_column` | 민감 컬럼 이름 조회 | Low |
//! | `large_limit` | LIMIT이 임계값 초과 | Low |
//! | `offset_pagination` | OFFSET이 0보다 큼 | Low |
//!
//! 메타데이터에 `object_name`이 없으면 SQL 본문에서 테이블 이름을 추정하고,
//! 결과 심각도를 한 단계 낮춥니다.

use std::collections::HashSet;
use std::fmt;

use regex::Regex;

use querywatch_core::config::{ANALYZER_EXFILTRATION, ExfiltrationConfig};
use querywatch_core::error::AnalyzerError;
use querywatch_core::pipeline::Analyzer;
use querywatch_core::types::{CommandClass, Finding, Query, Severity};

use super::normalize_sql;
use crate::error::QueryPipelineError;

const SELECT_STAR_PATTERN: &str = r"\bselect\s+(?:distinct\s+)?(?:\w+\.)?\*";
const BOUNDED_PATTERN: &str = r"\bwhere\b|\blimit\b|\bfetch\s+(?:first|next)\b";
const EXPORT_PATTERN: &str = r"\bcopy\b.*\bto\b|\binto\s+(?:outfile|dumpfile)\b";
const LIMIT_PATTERN: &str = r"\blimit\s+(\d+)";
const OFFSET_PATTERN: &str = r"\boffset\s+(\d+)";
const SELECT_PATTERN: &str = r"\bselect\b";
const TABLE_PATTERN: &str = r#"\b(?:from|join|copy|update|into)\s+((?:"[^"]+"|[a-z_][\w$]*)(?:\.(?:"[^"]+"|[a-z_][\w$]*))*)"#;

/// 객체 민감 등급
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SensitivityTier {
    Internal,
    Confidential,
    Restricted,
}

impl SensitivityTier {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "internal" => Some(Self::Internal),
            "confidential" => Some(Self::Confidential),
            "restricted" => Some(Self::Restricted),
            _ => None,
        }
    }

    /// 등급별 기본 심각도
    pub fn base_severity(&self) -> Severity {
        match self {
            Self::Internal => Severity::Low,
            Self::Confidential => Severity::Medium,
            Self::Restricted => Severity::High,
        }
    }
}

impl fmt::Display for SensitivityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal => write!(f, "internal"),
            Self::Confidential => write!(f, "confidential"),
            Self::Restricted => write!(f, "restricted"),
        }
    }
}

/// `schema.table` 또는 `table` 형태의 객체 이름
#[derive(Debug, Clone, PartialEq, Eq)]
struct ObjectName {
    schema: Option<String>,
    table: String,
}

impl ObjectName {
    /// 따옴표를 벗기고 소문자로 정규화합니다. 세 부분 이름은 뒤의 두 부분만 씁니다.
    fn parse(name: &str) -> Option<Self> {
        let cleaned = name.trim().replace('"', "").to_lowercase();
        let mut parts = cleaned.rsplit('.');
        let table = parts.next().filter(|t| !t.is_empty())?.to_owned();
        let schema = parts.next().filter(|s| !s.is_empty()).map(str::to_owned);
        Some(Self { schema, table })
    }

    /// 스키마가 없는 쪽은 모든 스키마와 매칭됩니다.
    fn matches(&self, other: &ObjectName) -> bool {
        self.table == other.table
            && match (&self.schema, &other.schema) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }
}

struct RuleHit {
    rule: &'static str,
    severity: Severity,
    reason: String,
}

/// 데이터 유출 분석기
pub struct ExfiltrationAnalyzer {
    sensitive: Vec<(ObjectName, SensitivityTier)>,
    non_sensitive: Vec<ObjectName>,
    allowed_users: HashSet<String>,
    sensitive_columns: Option<Regex>,
    large_limit_threshold: u64,
    select_star: Regex,
    bounded: Regex,
    export: Regex,
    limit: Regex,
    offset: Regex,
    select: Regex,
    tables: Regex,
}

impl ExfiltrationAnalyzer {
    /// 설정으로 분석기를 생성합니다.
    pub fn new(config: &ExfiltrationConfig) -> Result<Self, QueryPipelineError> {
        let mut sensitive = Vec::with_capacity(config.sensitive_objects.len());
        for object in &config.sensitive_objects {
            let tier = SensitivityTier::from_name(&object.tier).ok_or_else(|| {
                QueryPipelineError::config(
                    "exfiltration.sensitive_objects.tier",
                    format!("unknown tier '{}' for '{}'", object.tier, object.name),
                )
            })?;
            let name = ObjectName::parse(&object.name).ok_or_else(|| {
                QueryPipelineError::config(
                    "exfiltration.sensitive_objects.name",
                    format!("invalid object name '{}'", object.name),
                )
            })?;
            sensitive.push((name, tier));
        }

        let non_sensitive = config
            .non_sensitive_objects
            .iter()
            .filter_map(|name| ObjectName::parse(name))
            .collect();

        let columns: Vec<String> = config
            .sensitive_columns
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .map(|c| regex::escape(&c))
            .collect();
        let sensitive_columns = if columns.is_empty() {
            None
        } else {
            Some(Regex::new(&format!(r"\b(?:{})\b", columns.join("|")))?)
        };

        Ok(Self {
            sensitive,
            non_sensitive,
            allowed_users: config.allowed_users.iter().cloned().collect(),
            sensitive_columns,
            large_limit_threshold: config.large_limit_threshold,
            select_star: Regex::new(SELECT_STAR_PATTERN)?,
            bounded: Regex::new(BOUNDED_PATTERN)?,
            export: Regex::new(EXPORT_PATTERN)?,
            limit: Regex::new(LIMIT_PATTERN)?,
            offset: Regex::new(OFFSET_PATTERN)?,
            select: Regex::new(SELECT_PATTERN)?,
            tables: Regex::new(TABLE_PATTERN)?,
        })
    }

    /// 객체의 민감 등급을 반환합니다. 비민감 목록이 우선합니다.
    pub fn classify(&self, object_name: &str) -> Option<SensitivityTier> {
        let object = ObjectName::parse(object_name)?;
        if self.non_sensitive.iter().any(|n| n.matches(&object)) {
            return None;
        }
        self.sensitive
            .iter()
            .filter(|(pattern, _)| pattern.matches(&object))
            .map(|(_, tier)| *tier)
            .max()
    }

    /// SQL 본문에서 테이블 이름 후보를 추출합니다.
    fn extract_tables(&self, normalized: &str) -> Vec<String> {
        self.tables
            .captures_iter(normalized)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_owned()))
            .collect()
    }

    fn user_allowed(&self, user: Option<&str>) -> bool {
        user.is_some_and(|u| self.allowed_users.contains(u))
    }

    fn large_limit(&self, normalized: &str) -> Option<u64> {
        self.limit
            .captures_iter(normalized)
            .filter_map(|caps| caps.get(1)?.as_str().parse::<u64>().ok())
            .filter(|limit| *limit > self.large_limit_threshold)
            .max()
    }

    /// 페이지 단위로 훑는 조회의 OFFSET (0보다 클 때만)
    fn pagination_offset(&self, normalized: &str) -> Option<u64> {
        self.offset
            .captures_iter(normalized)
            .filter_map(|caps| caps.get(1)?.as_str().parse::<u64>().ok())
            .filter(|offset| *offset > 0)
            .max()
    }
}

impl Analyzer for ExfiltrationAnalyzer {
    fn name(&self) -> &str {
        ANALYZER_EXFILTRATION
    }

    fn analyze(&self, query: &Query) -> Result<Option<Finding>, AnalyzerError> {
        let normalized = normalize_sql(query.sql());
        let meta = query.metadata();

        let (objects, inferred) = match meta.object_name.as_deref() {
            Some(name) => (vec![name.to_owned()], false),
            None => (self.extract_tables(&normalized), true),
        };

        let target = objects
            .iter()
            .filter_map(|o| self.classify(o).map(|tier| (o.as_str(), tier)))
            .max_by_key(|(_, tier)| *tier);

        let mut hits = Vec::new();

        if let Some((object, tier)) = target {
            let base = tier.base_severity();
            let bounded = self.bounded.is_match(&normalized);

            if self.export.is_match(&normalized) {
                hits.push(RuleHit {
                    rule: "bulk_export",
                    severity: base.raised(),
                    reason: format!("bulk export of {tier} object '{object}'"),
                });
            }
            if !bounded && self.select_star.is_match(&normalized) {
                hits.push(RuleHit {
                    rule: "unbounded_select",
                    severity: base.raised(),
                    reason: format!("unbounded SELECT * on {tier} object '{object}'"),
                });
            }
            if meta.command_class == Some(CommandClass::Read)
                && !self.user_allowed(meta.user_id.as_deref())
            {
                hits.push(RuleHit {
                    rule: "sensitive_read",
                    severity: if bounded { base.lowered() } else { base },
                    reason: format!(
                        "read of {tier} object '{object}' by {}",
                        meta.user_id.as_deref().unwrap_or("unknown user")
                    ),
                });
            }
        }

        if self.select.is_match(&normalized)
            && let Some(column) = self
                .sensitive_columns
                .as_ref()
                .and_then(|re| re.find(&normalized))
        {
            hits.push(RuleHit {
                rule: "sensitive_column",
                severity: Severity::Low,
                reason: format!("sensitive column '{}' selected", column.as_str()),
            });
        }

        if let Some(limit) = self.large_limit(&normalized) {
            hits.push(RuleHit {
                rule: "large_limit",
                severity: Severity::Low,
                reason: format!(
                    "LIMIT {limit} exceeds threshold {}",
                    self.large_limit_threshold
                ),
            });
        }

        if let Some(offset) = self.pagination_offset(&normalized) {
            hits.push(RuleHit {
                rule: "offset_pagination",
                severity: Severity::Low,
                reason: format!("OFFSET {offset} pagination"),
            });
        }

        // 가장 심각한 규칙, 같으면 먼저 평가된 규칙
        let Some(winner) = hits
            .iter()
            .reduce(|best, hit| if hit.severity > best.severity { hit } else { best })
        else {
            return Ok(None);
        };

        let severity = if inferred {
            winner.severity.lowered()
        } else {
            winner.severity
        };

        let mut finding = Finding::new(ANALYZER_EXFILTRATION, severity, winner.reason.clone())
            .with_pattern(winner.rule)
            .with_detail(
                "rules",
                hits.iter().map(|h| h.rule).collect::<Vec<_>>().join(","),
            );
        if let Some((object, tier)) = target {
            finding = finding
                .with_detail("object", object)
                .with_detail("tier", tier.to_string());
        }
        if inferred {
            finding = finding.with_detail("confidence", "reduced");
        }

        Ok(Some(finding))
    }
}
