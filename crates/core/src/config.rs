//! 설정 관리 -- querywatch.toml 파싱 및 런타임 설정
//!
//! [`QueryWatchConfig`]는 파이프라인과 분석기 설정을 담는 최상위 구조체입니다.
//! 분석기는 이 값을 생성 시점에 명시적으로 전달받으며, 전역 상태를 읽지 않습니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`QUERYWATCH_VOLUME_WINDOW_SECS=120` 형식)
//! 3. 설정 파일 (`querywatch.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), querywatch_core::error::QueryWatchError> {
//! use querywatch_core::config::QueryWatchConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = QueryWatchConfig::load("querywatch.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = QueryWatchConfig::parse("[volume]\nwindow_secs = 120")?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, QueryWatchError};
use crate::types::Severity;

/// SQL 인젝션 분석기 이름
pub const ANALYZER_SQL_INJECTION: &str = "sql_injection";
/// 데이터 유출 분석기 이름
pub const ANALYZER_EXFILTRATION: &str = "exfiltration";
/// 볼륨 이상 분석기 이름
pub const ANALYZER_VOLUME_ANOMALY: &str = "volume_anomaly";

/// 설정으로 활성화할 수 있는 분석기 이름 목록
pub const KNOWN_ANALYZERS: [&str; 3] = [
    ANALYZER_SQL_INJECTION,
    ANALYZER_EXFILTRATION,
    ANALYZER_VOLUME_ANOMALY,
];

/// QueryWatch 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryWatchConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// 입력 설정
    #[serde(default)]
    pub input: InputConfig,
    /// 출력 싱크 설정
    #[serde(default)]
    pub output: OutputConfig,
    /// 파이프라인 설정
    #[serde(default)]
    pub pipeline: PipelineSection,
    /// 분석기 활성화 설정
    #[serde(default)]
    pub analyzers: AnalyzersConfig,
    /// SQL 인젝션 분석기 설정
    #[serde(default)]
    pub sql_injection: SqlInjectionConfig,
    /// 데이터 유출 분석기 설정
    #[serde(default)]
    pub exfiltration: ExfiltrationConfig,
    /// 볼륨 이상 분석기 설정
    #[serde(default)]
    pub volume: VolumeConfig,
}

impl QueryWatchConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, QueryWatchError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, QueryWatchError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                QueryWatchError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                QueryWatchError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, QueryWatchError> {
        toml::from_str(toml_str).map_err(|e| {
            QueryWatchError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `QUERYWATCH_{SECTION}_{FIELD}`
    /// 예: `QUERYWATCH_VOLUME_WINDOW_SECS=120`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "QUERYWATCH_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "QUERYWATCH_GENERAL_LOG_FORMAT");

        // Metrics
        override_bool(&mut self.metrics.enabled, "QUERYWATCH_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "QUERYWATCH_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "QUERYWATCH_METRICS_PORT");

        // Input / Output
        override_string(&mut self.input.format, "QUERYWATCH_INPUT_FORMAT");
        override_string(&mut self.input.path, "QUERYWATCH_INPUT_PATH");
        override_csv(&mut self.output.sinks, "QUERYWATCH_OUTPUT_SINKS");
        override_string(&mut self.output.json_path, "QUERYWATCH_OUTPUT_JSON_PATH");

        // Pipeline
        override_usize(
            &mut self.pipeline.max_consecutive_source_errors,
            "QUERYWATCH_PIPELINE_MAX_CONSECUTIVE_SOURCE_ERRORS",
        );
        override_usize(
            &mut self.pipeline.max_record_size,
            "QUERYWATCH_PIPELINE_MAX_RECORD_SIZE",
        );

        // Analyzers
        override_csv(&mut self.analyzers.enabled, "QUERYWATCH_ANALYZERS_ENABLED");
        override_bool(
            &mut self.analyzers.concurrent,
            "QUERYWATCH_ANALYZERS_CONCURRENT",
        );

        // SQL injection
        override_bool(
            &mut self.sql_injection.include_defaults,
            "QUERYWATCH_SQL_INJECTION_INCLUDE_DEFAULTS",
        );
        override_string(
            &mut self.sql_injection.signature_dir,
            "QUERYWATCH_SQL_INJECTION_SIGNATURE_DIR",
        );

        // Exfiltration
        override_csv(
            &mut self.exfiltration.non_sensitive_objects,
            "QUERYWATCH_EXFILTRATION_NON_SENSITIVE_OBJECTS",
        );
        override_csv(
            &mut self.exfiltration.allowed_users,
            "QUERYWATCH_EXFILTRATION_ALLOWED_USERS",
        );
        override_u64(
            &mut self.exfiltration.large_limit_threshold,
            "QUERYWATCH_EXFILTRATION_LARGE_LIMIT_THRESHOLD",
        );

        // Volume
        override_u64(&mut self.volume.window_secs, "QUERYWATCH_VOLUME_WINDOW_SECS");
        override_f64(
            &mut self.volume.baseline_multiplier,
            "QUERYWATCH_VOLUME_BASELINE_MULTIPLIER",
        );
        override_usize(
            &mut self.volume.absolute_floor,
            "QUERYWATCH_VOLUME_ABSOLUTE_FLOOR",
        );
        override_f64(&mut self.volume.ewma_alpha, "QUERYWATCH_VOLUME_EWMA_ALPHA");
        override_u32(
            &mut self.volume.reset_after_empty_windows,
            "QUERYWATCH_VOLUME_RESET_AFTER_EMPTY_WINDOWS",
        );
        override_usize(
            &mut self.volume.max_tracked_keys,
            "QUERYWATCH_VOLUME_MAX_TRACKED_KEYS",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), QueryWatchError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must be non-zero when enabled"));
        }

        let valid_inputs = ["audit", "logline", "json"];
        if !valid_inputs.contains(&self.input.format.as_str()) {
            return Err(invalid(
                "input.format",
                format!("must be one of: {}", valid_inputs.join(", ")),
            ));
        }

        let valid_sinks = ["console", "json"];
        for sink in &self.output.sinks {
            if !valid_sinks.contains(&sink.as_str()) {
                return Err(invalid(
                    "output.sinks",
                    format!(
                        "unknown sink '{sink}', must be one of: {}",
                        valid_sinks.join(", ")
                    ),
                ));
            }
        }

        if self.pipeline.max_consecutive_source_errors == 0 {
            return Err(invalid(
                "pipeline.max_consecutive_source_errors",
                "must be greater than 0",
            ));
        }
        if self.pipeline.max_record_size == 0 {
            return Err(invalid("pipeline.max_record_size", "must be greater than 0"));
        }

        let mut seen = HashSet::new();
        for name in &self.analyzers.enabled {
            if !KNOWN_ANALYZERS.contains(&name.as_str()) {
                return Err(invalid(
                    "analyzers.enabled",
                    format!(
                        "unknown analyzer '{name}', must be one of: {}",
                        KNOWN_ANALYZERS.join(", ")
                    ),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(invalid(
                    "analyzers.enabled",
                    format!("analyzer '{name}' listed more than once"),
                ));
            }
        }

        self.sql_injection.validate()?;
        self.exfiltration.validate()?;
        self.volume.validate()?;

        Ok(())
    }

    /// 분석기가 활성화되어 있는지 확인합니다.
    pub fn analyzer_enabled(&self, name: &str) -> bool {
        self.analyzers.enabled.iter().any(|n| n == name)
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> QueryWatchError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수신 주소
    pub listen_addr: String,
    /// 수신 포트
    pub port: u16,
    /// 스크레이프 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9108,
            endpoint: "/metrics".to_owned(),
        }
    }
}

/// 입력 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// 레코드 형식 (audit, logline, json)
    pub format: String,
    /// 입력 파일 경로 (비어 있으면 표준 입력)
    pub path: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            format: "logline".to_owned(),
            path: String::new(),
        }
    }
}

/// 출력 싱크 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// 활성화할 싱크 (console, json)
    pub sinks: Vec<String>,
    /// JSON lines 출력 파일 경로 (비어 있으면 표준 출력)
    pub json_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sinks: vec!["console".to_owned()],
            json_path: String::new(),
        }
    }
}

/// 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// 연속 소스 실패 허용 횟수 (초과 시 파이프라인 중단)
    pub max_consecutive_source_errors: usize,
    /// 원시 레코드 최대 크기 (바이트)
    pub max_record_size: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_consecutive_source_errors: 10,
            max_record_size: 1024 * 1024, // 1MB
        }
    }
}

/// 분석기 활성화 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzersConfig {
    /// 등록 순서대로 활성화할 분석기 이름
    pub enabled: Vec<String>,
    /// 분석기를 쿼리마다 병렬 실행할지 여부
    pub concurrent: bool,
}

impl Default for AnalyzersConfig {
    fn default() -> Self {
        Self {
            enabled: KNOWN_ANALYZERS.iter().map(|s| (*s).to_owned()).collect(),
            concurrent: true,
        }
    }
}

/// SQL 인젝션 분석기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlInjectionConfig {
    /// 기본 시그니처 포함 여부
    pub include_defaults: bool,
    /// 추가 YAML 시그니처 디렉토리 (비어 있으면 사용 안 함)
    pub signature_dir: String,
    /// 인라인 추가 시그니처
    pub signatures: Vec<SignatureConfig>,
}

impl Default for SqlInjectionConfig {
    fn default() -> Self {
        Self {
            include_defaults: true,
            signature_dir: String::new(),
            signatures: Vec::new(),
        }
    }
}

impl SqlInjectionConfig {
    fn validate(&self) -> Result<(), QueryWatchError> {
        if !self.include_defaults && self.signatures.is_empty() && self.signature_dir.is_empty()
        {
            return Err(invalid(
                "sql_injection",
                "no signatures configured: enable include_defaults or add signatures",
            ));
        }
        for sig in &self.signatures {
            if sig.id.trim().is_empty() {
                return Err(invalid("sql_injection.signatures.id", "must not be empty"));
            }
            if sig.pattern.is_empty() {
                return Err(invalid(
                    "sql_injection.signatures.pattern",
                    format!("signature '{}' has an empty pattern", sig.id),
                ));
            }
            if Severity::from_str_loose(&sig.severity).is_none() {
                return Err(invalid(
                    "sql_injection.signatures.severity",
                    format!(
                        "signature '{}' has unknown severity '{}'",
                        sig.id, sig.severity
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// 인라인 SQL 인젝션 시그니처
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureConfig {
    /// 시그니처 ID
    pub id: String,
    /// 설명
    #[serde(default)]
    pub description: String,
    /// 정규화된(소문자, 공백 축약) SQL에 적용할 정규식
    pub pattern: String,
    /// 심각도 (low, medium, high, critical)
    pub severity: String,
    /// 우선순위 (낮을수록 먼저)
    #[serde(default = "default_signature_priority")]
    pub priority: u32,
}

fn default_signature_priority() -> u32 {
    100
}

/// 데이터 유출 분석기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExfiltrationConfig {
    /// 민감 객체 목록 (스키마 없는 이름은 모든 스키마에 매칭)
    pub sensitive_objects: Vec<SensitiveObjectConfig>,
    /// 민감 목록보다 우선하는 비민감 객체 목록
    pub non_sensitive_objects: Vec<String>,
    /// 민감 객체 READ가 허용된 사용자
    pub allowed_users: Vec<String>,
    /// 민감 컬럼 이름
    pub sensitive_columns: Vec<String>,
    /// 이 값을 넘는 LIMIT은 대량 조회로 간주
    pub large_limit_threshold: u64,
}

impl Default for ExfiltrationConfig {
    fn default() -> Self {
        let tiered = |name: &str, tier: &str| SensitiveObjectConfig {
            name: name.to_owned(),
            tier: tier.to_owned(),
        };
        Self {
            sensitive_objects: vec![
                tiered("users", "confidential"),
                tiered("credentials", "restricted"),
                tiered("payments", "restricted"),
                tiered("secrets", "restricted"),
                tiered("tokens", "restricted"),
            ],
            non_sensitive_objects: Vec::new(),
            allowed_users: Vec::new(),
            sensitive_columns: [
                "password",
                "secret",
                "token",
                "api_key",
                "credit_card",
                "ssn",
                "private_key",
            ]
            .iter()
            .map(|s| (*s).to_owned())
            .collect(),
            large_limit_threshold: 1000,
        }
    }
}

impl ExfiltrationConfig {
    fn validate(&self) -> Result<(), QueryWatchError> {
        let valid_tiers = ["internal", "confidential", "restricted"];
        for object in &self.sensitive_objects {
            if object.name.trim().is_empty() {
                return Err(invalid(
                    "exfiltration.sensitive_objects.name",
                    "must not be empty",
                ));
            }
            if !valid_tiers.contains(&object.tier.as_str()) {
                return Err(invalid(
                    "exfiltration.sensitive_objects.tier",
                    format!(
                        "object '{}' has unknown tier '{}', must be one of: {}",
                        object.name,
                        object.tier,
                        valid_tiers.join(", ")
                    ),
                ));
            }
        }
        if self.large_limit_threshold == 0 {
            return Err(invalid(
                "exfiltration.large_limit_threshold",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// 민감 객체와 등급
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitiveObjectConfig {
    /// 객체 이름 (`schema.table` 또는 `table`)
    pub name: String,
    /// 민감 등급 (internal, confidential, restricted)
    pub tier: String,
}

/// 볼륨 이상 분석기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// 슬라이딩 윈도우 길이 (초)
    pub window_secs: u64,
    /// 기준선 배수
    pub baseline_multiplier: f64,
    /// 기준선과 무관한 최소 임계값
    pub absolute_floor: usize,
    /// EWMA 가중치 (0 < alpha <= 1)
    pub ewma_alpha: f64,
    /// 연속 빈 윈도우가 이 횟수에 도달하면 기준선 초기화 (0이면 초기화 안 함)
    pub reset_after_empty_windows: u32,
    /// 추적할 최대 그룹 키 수
    pub max_tracked_keys: usize,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            baseline_multiplier: 3.0,
            absolute_floor: 20,
            ewma_alpha: 0.3,
            reset_after_empty_windows: 0,
            max_tracked_keys: 10_000,
        }
    }
}

impl VolumeConfig {
    fn validate(&self) -> Result<(), QueryWatchError> {
        if self.window_secs == 0 {
            return Err(invalid("volume.window_secs", "must be greater than 0"));
        }
        if !self.baseline_multiplier.is_finite() || self.baseline_multiplier <= 0.0 {
            return Err(invalid(
                "volume.baseline_multiplier",
                "must be a positive finite number",
            ));
        }
        if self.absolute_floor == 0 {
            return Err(invalid("volume.absolute_floor", "must be greater than 0"));
        }
        if !(self.ewma_alpha > 0.0 && self.ewma_alpha <= 1.0) {
            return Err(invalid("volume.ewma_alpha", "must be in (0, 1]"));
        }
        if self.max_tracked_keys == 0 {
            return Err(invalid("volume.max_tracked_keys", "must be greater than 0"));
        }
        Ok(())
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_f64(target: &mut f64, env_key: &str) {
    override_parsed(target, env_key, "f64");
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = QueryWatchConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.input.format, "logline");
        assert_eq!(config.output.sinks, vec!["console"]);
        assert_eq!(config.analyzers.enabled.len(), 3);
        assert!(config.analyzers.concurrent);
        assert_eq!(config.volume.window_secs, 60);
        assert_eq!(config.volume.reset_after_empty_windows, 0);
        assert!(config.sql_injection.include_defaults);
    }

    #[test]
    fn default_config_passes_validation() {
        QueryWatchConfig::default().validate().unwrap();
    }

    #[test]
    fn parse_empty_toml_uses_defaults() {
        let config = QueryWatchConfig::parse("").unwrap();
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.volume.absolute_floor, 20);
    }

    #[test]
    fn parse_partial_toml_merges_with_defaults() {
        let toml = r#"
[volume]
window_secs = 300
baseline_multiplier = 2.5

[exfiltration]
allowed_users = ["etl"]
"#;
        let config = QueryWatchConfig::parse(toml).unwrap();
        assert_eq!(config.volume.window_secs, 300);
        assert!((config.volume.baseline_multiplier - 2.5).abs() < f64::EPSILON);
        // 지정하지 않은 필드는 기본값 유지
        assert_eq!(config.volume.absolute_floor, 20);
        assert_eq!(config.exfiltration.allowed_users, vec!["etl"]);
        assert_eq!(config.exfiltration.large_limit_threshold, 1000);
    }

    #[test]
    fn parse_inline_signatures() {
        let toml = r#"
[sql_injection]
include_defaults = false

[[sql_injection.signatures]]
id = "xp_cmdshell"
pattern = "xp_cmdshell"
severity = "critical"
priority = 5
"#;
        let config = QueryWatchConfig::parse(toml).unwrap();
        assert_eq!(config.sql_injection.signatures.len(), 1);
        assert_eq!(config.sql_injection.signatures[0].priority, 5);
        assert!(config.sql_injection.signatures[0].description.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn parse_invalid_toml_returns_error() {
        let err = QueryWatchConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            QueryWatchError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = QueryWatchConfig::default();
        config.general.log_level = "verbose".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn validate_rejects_unknown_input_format() {
        let mut config = QueryWatchConfig::default();
        config.input.format = "csv".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("input.format"));
    }

    #[test]
    fn validate_rejects_unknown_sink() {
        let mut config = QueryWatchConfig::default();
        config.output.sinks = vec!["sqs".to_owned()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sqs"));
    }

    #[test]
    fn validate_rejects_unknown_analyzer() {
        let mut config = QueryWatchConfig::default();
        config.analyzers.enabled.push("ml_model".to_owned());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ml_model"));
    }

    #[test]
    fn validate_rejects_duplicate_analyzer() {
        let mut config = QueryWatchConfig::default();
        config.analyzers.enabled = vec!["volume_anomaly".to_owned(), "volume_anomaly".to_owned()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn validate_rejects_empty_signature_set() {
        let mut config = QueryWatchConfig::default();
        config.sql_injection.include_defaults = false;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("no signatures"));
    }

    #[test]
    fn validate_rejects_bad_signature_severity() {
        let mut config = QueryWatchConfig::default();
        config.sql_injection.signatures.push(SignatureConfig {
            id: "custom".to_owned(),
            description: String::new(),
            pattern: "foo".to_owned(),
            severity: "urgent".to_owned(),
            priority: 1,
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("urgent"));
    }

    #[test]
    fn validate_rejects_unknown_tier() {
        let mut config = QueryWatchConfig::default();
        config.exfiltration.sensitive_objects.push(SensitiveObjectConfig {
            name: "audit_log".to_owned(),
            tier: "top-secret".to_owned(),
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("top-secret"));
    }

    #[test]
    fn validate_rejects_out_of_range_alpha() {
        let mut config = QueryWatchConfig::default();
        config.volume.ewma_alpha = 0.0;
        assert!(config.validate().is_err());
        config.volume.ewma_alpha = 1.5;
        assert!(config.validate().is_err());
        config.volume.ewma_alpha = 1.0;
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_zero_window_and_floor() {
        let mut config = QueryWatchConfig::default();
        config.volume.window_secs = 0;
        assert!(config.validate().is_err());

        let mut config = QueryWatchConfig::default();
        config.volume.absolute_floor = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_nan_multiplier() {
        let mut config = QueryWatchConfig::default();
        config.volume.baseline_multiplier = f64::NAN;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("baseline_multiplier"));
    }

    #[test]
    fn analyzer_enabled_checks_list() {
        let mut config = QueryWatchConfig::default();
        assert!(config.analyzer_enabled(ANALYZER_VOLUME_ANOMALY));
        config.analyzers.enabled = vec![ANALYZER_SQL_INJECTION.to_owned()];
        assert!(!config.analyzer_enabled(ANALYZER_VOLUME_ANOMALY));
    }

    #[test]
    #[serial_test::serial]
    fn env_override_string() {
        let mut val = "original".to_owned();
        // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
        unsafe { std::env::set_var("TEST_QUERYWATCH_STR", "overridden") };
        override_string(&mut val, "TEST_QUERYWATCH_STR");
        assert_eq!(val, "overridden");
        unsafe { std::env::remove_var("TEST_QUERYWATCH_STR") };
    }

    #[test]
    #[serial_test::serial]
    fn env_override_f64_invalid_keeps_original() {
        let mut val = 3.0;
        // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
        unsafe { std::env::set_var("TEST_QUERYWATCH_F64_BAD", "three") };
        override_f64(&mut val, "TEST_QUERYWATCH_F64_BAD");
        assert!((val - 3.0).abs() < f64::EPSILON);
        unsafe { std::env::remove_var("TEST_QUERYWATCH_F64_BAD") };
    }

    #[test]
    #[serial_test::serial]
    fn env_override_csv_skips_blank_entries() {
        let mut val = vec!["a".to_owned()];
        // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
        unsafe { std::env::set_var("TEST_QUERYWATCH_CSV", "x, y,, z ") };
        override_csv(&mut val, "TEST_QUERYWATCH_CSV");
        assert_eq!(val, vec!["x", "y", "z"]);
        unsafe { std::env::remove_var("TEST_QUERYWATCH_CSV") };
    }

    #[test]
    fn env_override_missing_var_keeps_original() {
        let mut val = 42u64;
        override_u64(&mut val, "TEST_QUERYWATCH_NONEXISTENT_12345");
        assert_eq!(val, 42);
    }

    #[test]
    fn config_serialize_roundtrip() {
        let config = QueryWatchConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = QueryWatchConfig::parse(&toml_str).unwrap();
        assert_eq!(config.general.log_level, parsed.general.log_level);
        assert_eq!(
            config.exfiltration.sensitive_objects.len(),
            parsed.exfiltration.sensitive_objects.len()
        );
        assert_eq!(config.volume.max_tracked_keys, parsed.volume.max_tracked_keys);
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = QueryWatchConfig::from_file("/nonexistent/path/querywatch.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueryWatchError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
