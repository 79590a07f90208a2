//! SQL 인젝션 시그니처 -- 정의, 기본 세트, YAML 로더
//!
//! 시그니처 패턴은 정규화된 SQL(소문자, 연속 공백을 공백 하나로 축약)에 적용됩니다.
//! 우선순위 값이 낮을수록 먼저 선택됩니다.
//!
//! 디렉토리 내의 `.yml`/`.yaml` 파일 하나가 시그니처 하나에 대응합니다.
//! 개별 파일 파싱 실패는 경고 로그를 남기고 건너뜁니다.

use std::collections::HashSet;
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use querywatch_core::config::SignatureConfig;
use querywatch_core::types::Severity;

use crate::error::QueryPipelineError;

const MAX_SIGNATURE_FILE_SIZE: u64 = 1024 * 1024; // 1MB
const MAX_SIGNATURES_COUNT: usize = 1_000;
const MAX_SIGNATURE_ID_LEN: usize = 256;
/// 컴파일된 정규식 하나의 최대 크기
const REGEX_SIZE_LIMIT: usize = 1024 * 1024;

/// 시그니처 상태
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureStatus {
    #[default]
    Enabled,
    Disabled,
}

/// 시그니처 정의 -- 하나의 YAML 파일에 대응합니다.
///
/// # YAML 스키마
/// ```yaml
/// id: xp_cmdshell
/// description: MSSQL command shell invocation
/// pattern: '\bxp_cmdshell\b'
/// severity: critical
/// priority: 5
/// status: enabled
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureDef {
    /// 시그니처 고유 ID (`matched_pattern`에 기록)
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// 정규화된 SQL에 적용할 정규식
    ///
    /// `lhs`/`rhs` 이름 그룹이 모두 있으면 두 캡처 값이 같을 때만 매칭으로 봅니다.
    pub pattern: String,
    pub severity: Severity,
    /// 우선순위 (낮을수록 먼저)
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub status: SignatureStatus,
}

fn default_priority() -> u32 {
    100
}

impl SignatureDef {
    fn builtin(id: &str, description: &str, pattern: &str, severity: Severity, priority: u32) -> Self {
        Self {
            id: id.to_owned(),
            description: description.to_owned(),
            pattern: pattern.to_owned(),
            severity,
            priority,
            status: SignatureStatus::Enabled,
        }
    }

    /// 인라인 설정에서 시그니처 정의를 만듭니다.
    pub fn from_config(config: &SignatureConfig) -> Result<Self, QueryPipelineError> {
        let severity = Severity::from_str_loose(&config.severity).ok_or_else(|| {
            QueryPipelineError::SignatureValidation {
                signature_id: config.id.clone(),
                reason: format!("unknown severity '{}'", config.severity),
            }
        })?;
        let def = Self {
            id: config.id.trim().to_owned(),
            description: config.description.clone(),
            pattern: config.pattern.clone(),
            severity,
            priority: config.priority,
            status: SignatureStatus::Enabled,
        };
        def.validate()?;
        Ok(def)
    }

    /// 시그니처의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), QueryPipelineError> {
        if self.id.is_empty() {
            return Err(QueryPipelineError::SignatureValidation {
                signature_id: "(empty)".to_owned(),
                reason: "signature id must not be empty".to_owned(),
            });
        }

        if self.id.len() > MAX_SIGNATURE_ID_LEN {
            return Err(QueryPipelineError::SignatureValidation {
                signature_id: self.id.clone(),
                reason: format!("signature id must not exceed {MAX_SIGNATURE_ID_LEN} characters"),
            });
        }

        if self.pattern.is_empty() {
            return Err(QueryPipelineError::SignatureValidation {
                signature_id: self.id.clone(),
                reason: "pattern must not be empty".to_owned(),
            });
        }

        self.compile_regex().map(|_| ())
    }

    fn compile_regex(&self) -> Result<Regex, QueryPipelineError> {
        RegexBuilder::new(&self.pattern)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|e| QueryPipelineError::SignatureValidation {
                signature_id: self.id.clone(),
                reason: format!("invalid pattern: {e}"),
            })
    }

    /// 정규식을 컴파일합니다.
    pub fn compile(self) -> Result<Signature, QueryPipelineError> {
        let regex = self.compile_regex()?;
        let names: HashSet<&str> = regex.capture_names().flatten().collect();
        let self_equality = names.contains("lhs") && names.contains("rhs");
        Ok(Signature {
            def: self,
            regex,
            self_equality,
        })
    }
}

/// 컴파일된 시그니처
#[derive(Debug, Clone)]
pub struct Signature {
    pub def: SignatureDef,
    pub regex: Regex,
    self_equality: bool,
}

impl Signature {
    /// 첫 매칭을 찾습니다. 자기 동일성 패턴은 `lhs == rhs`인 매칭만 인정합니다.
    pub fn find<'t>(&self, text: &'t str) -> Option<regex::Match<'t>> {
        if !self.self_equality {
            return self.regex.find(text);
        }
        self.regex
            .captures_iter(text)
            .find_map(|caps| match (caps.name("lhs"), caps.name("rhs")) {
                (Some(lhs), Some(rhs)) if lhs.as_str() != rhs.as_str() => None,
                _ => caps.get(0),
            })
    }
}

/// 기본 시그니처 세트
///
/// 구체적이고 심각한 패턴이 먼저 오도록 우선순위가 매겨져 있습니다.
pub fn default_signatures() -> Vec<SignatureDef> {
    vec![
        SignatureDef::builtin(
            "stacked_statement",
            "stacked query appends a destructive statement",
            r";\s*(?:drop|delete|update|insert|alter|create|truncate|grant|revoke|exec|execute|copy|shutdown)\b",
            Severity::Critical,
            10,
        ),
        SignatureDef::builtin(
            "union_select",
            "UNION SELECT appends attacker-chosen rows",
            r"\bunion\s+(?:all\s+)?select\b",
            Severity::High,
            20,
        ),
        SignatureDef::builtin(
            "tautology",
            "always-true predicate bypasses filtering",
            r#"\bor\s+(?:['"]?(?P<lhs>\d+|[a-z])['"]?\s*=\s*['"]?(?P<rhs>\d+|[a-z])\b['"]?|''\s*=\s*''|true\b)"#,
            Severity::Medium,
            30,
        ),
        SignatureDef::builtin(
            "comment_truncation",
            "SQL comment truncates the rest of the statement",
            // `#`은 문자열 리터럴을 닫은 직후만 주석으로 봅니다. `#>`, `#-`, ` # `는 연산자입니다.
            r"--|/\*|'\s*#(?:$|[^>\-\s])",
            Severity::Medium,
            40,
        ),
        SignatureDef::builtin(
            "encoded_payload",
            "encoded or character-built payload",
            r"0x[0-9a-f]{8,}|\b(?:char|chr)\s*\(\s*\d+|%27|%22|%3b|%2d%2d|\\x27|\bconvert_from\s*\(\s*decode\s*\(|\bunhex\s*\(",
            Severity::Medium,
            50,
        ),
        SignatureDef::builtin(
            "time_based",
            "time-delay function used for blind injection",
            r"\bpg_sleep\s*\(|\bsleep\s*\(|\bwaitfor\s+delay\b|\bbenchmark\s*\(",
            Severity::Low,
            60,
        ),
        SignatureDef::builtin(
            "error_based",
            "error-based extraction function",
            r"\b(?:extractvalue|updatexml)\s*\(",
            Severity::Low,
            70,
        ),
    ]
}

/// 시그니처 파일 로더
pub struct SignatureLoader;

impl SignatureLoader {
    /// 디렉토리에서 모든 YAML 시그니처 파일을 로드합니다.
    ///
    /// 파일 이름 순서로 처리하며, 중복 ID는 처음 것만 남깁니다.
    ///
    /// # Errors
    /// - 디렉토리를 읽을 수 없는 경우
    /// - 시그니처 수가 `MAX_SIGNATURES_COUNT`를 초과하는 경우
    pub async fn load_directory(
        dir: impl AsRef<Path>,
    ) -> Result<Vec<SignatureDef>, QueryPipelineError> {
        let dir = dir.as_ref();
        let load_err = |reason: String| QueryPipelineError::SignatureLoad {
            path: dir.display().to_string(),
            reason,
        };

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| load_err(format!("failed to read directory: {e}")))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| load_err(format!("failed to read directory entry: {e}")))?
        {
            let path = entry.path();
            // .yml / .yaml 확장자만 처리
            if path
                .extension()
                .is_some_and(|ext| ext == "yml" || ext == "yaml")
            {
                paths.push(path);
            }
        }
        paths.sort();

        let mut signatures = Vec::new();
        let mut seen_ids = HashSet::new();

        for path in paths {
            match Self::load_file(&path).await {
                Ok(def) => {
                    if !seen_ids.insert(def.id.clone()) {
                        tracing::warn!(
                            signature_id = %def.id,
                            path = %path.display(),
                            "duplicate signature id, skipping"
                        );
                        continue;
                    }
                    signatures.push(def);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to load signature file, skipping"
                    );
                }
            }

            if signatures.len() > MAX_SIGNATURES_COUNT {
                return Err(load_err(format!(
                    "too many signatures: max {MAX_SIGNATURES_COUNT}"
                )));
            }
        }

        tracing::info!(
            dir = %dir.display(),
            count = signatures.len(),
            "loaded sql injection signatures"
        );

        Ok(signatures)
    }

    /// 단일 YAML 파일에서 시그니처를 로드합니다.
    pub async fn load_file(path: impl AsRef<Path>) -> Result<SignatureDef, QueryPipelineError> {
        let path = path.as_ref();
        let load_err = |reason: String| QueryPipelineError::SignatureLoad {
            path: path.display().to_string(),
            reason,
        };

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| load_err(format!("failed to read file metadata: {e}")))?;
        if metadata.len() > MAX_SIGNATURE_FILE_SIZE {
            return Err(load_err(format!(
                "file too large: {} bytes (max: {MAX_SIGNATURE_FILE_SIZE})",
                metadata.len()
            )));
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| load_err(format!("failed to read file: {e}")))?;

        Self::parse_yaml(&content, &path.display().to_string())
    }

    /// YAML 문자열을 파싱하여 시그니처를 생성합니다.
    pub fn parse_yaml(yaml_str: &str, source: &str) -> Result<SignatureDef, QueryPipelineError> {
        let def: SignatureDef =
            serde_yaml::from_str(yaml_str).map_err(|e| QueryPipelineError::SignatureLoad {
                path: source.to_owned(),
                reason: format!("YAML parse error: {e}"),
            })?;

        def.validate()?;
        Ok(def)
    }
}
