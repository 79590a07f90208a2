//! 쿼리 파이프라인 설정
//!
//! [`PipelineConfig`]는 core의 [`QueryWatchConfig`]에서 파이프라인이 쓰는 값만 추려
//! 타입이 있는 형태로 보관합니다. 분석기는 생성 시점에 이 값을 받습니다.
//!
//! # 사용 예시
//! ```ignore
//! use querywatch_core::config::QueryWatchConfig;
//! use querywatch_pipeline::config::PipelineConfig;
//!
//! let core_config = QueryWatchConfig::default();
//! let config = PipelineConfig::from_core(&core_config);
//! ```

use querywatch_core::config::{
    ExfiltrationConfig, KNOWN_ANALYZERS, QueryWatchConfig, SqlInjectionConfig, VolumeConfig,
};
use tracing::warn;

use crate::error::QueryPipelineError;
use crate::parser::RecordFormat;

const MAX_RECORD_SIZE_LIMIT: usize = 64 * 1024 * 1024;

/// 쿼리 파이프라인 설정
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 원시 레코드 형식
    pub input_format: RecordFormat,
    /// 원시 레코드 최대 크기 (바이트)
    pub max_record_size: usize,
    /// 연속 소스 실패 허용 횟수
    pub max_consecutive_source_errors: usize,
    /// 등록 순서대로 활성화할 분석기
    pub analyzers: Vec<String>,
    /// 분석기 병렬 실행 여부
    pub concurrent_analyzers: bool,
    pub sql_injection: SqlInjectionConfig,
    pub exfiltration: ExfiltrationConfig,
    pub volume: VolumeConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_core(&QueryWatchConfig::default())
    }
}

impl PipelineConfig {
    /// core 설정에서 파이프라인 설정을 생성합니다.
    ///
    /// 알 수 없는 입력 형식은 경고 후 기본 형식으로 대체합니다.
    /// core의 `validate()`를 통과한 설정이라면 발생하지 않습니다.
    pub fn from_core(core: &QueryWatchConfig) -> Self {
        let input_format = RecordFormat::from_name(&core.input.format).unwrap_or_else(|| {
            warn!(
                format = core.input.format.as_str(),
                "unknown input format, falling back to default"
            );
            RecordFormat::default()
        });

        Self {
            input_format,
            max_record_size: core.pipeline.max_record_size,
            max_consecutive_source_errors: core.pipeline.max_consecutive_source_errors,
            analyzers: core.analyzers.enabled.clone(),
            concurrent_analyzers: core.analyzers.concurrent,
            sql_injection: core.sql_injection.clone(),
            exfiltration: core.exfiltration.clone(),
            volume: core.volume.clone(),
        }
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// 분석기 이름 중복은 여기서 거르지 않습니다. 레지스트리 등록 시
    /// `AnalyzerError::Duplicate`로 보고됩니다.
    pub fn validate(&self) -> Result<(), QueryPipelineError> {
        if self.max_record_size == 0 || self.max_record_size > MAX_RECORD_SIZE_LIMIT {
            return Err(QueryPipelineError::config(
                "max_record_size",
                format!("must be 1-{MAX_RECORD_SIZE_LIMIT}"),
            ));
        }

        if self.max_consecutive_source_errors == 0 {
            return Err(QueryPipelineError::config(
                "max_consecutive_source_errors",
                "must be greater than 0",
            ));
        }

        if let Some(name) = self
            .analyzers
            .iter()
            .find(|name| !KNOWN_ANALYZERS.contains(&name.as_str()))
        {
            return Err(QueryPipelineError::config(
                "analyzers",
                format!(
                    "unknown analyzer '{name}', must be one of: {}",
                    KNOWN_ANALYZERS.join(", ")
                ),
            ));
        }

        Ok(())
    }
}

/// 파이프라인 설정 빌더
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 입력 형식을 설정합니다.
    pub fn input_format(mut self, format: RecordFormat) -> Self {
        self.config.input_format = format;
        self
    }

    /// 최대 레코드 크기를 설정합니다.
    pub fn max_record_size(mut self, size: usize) -> Self {
        self.config.max_record_size = size;
        self
    }

    /// 연속 소스 실패 허용 횟수를 설정합니다.
    pub fn max_consecutive_source_errors(mut self, count: usize) -> Self {
        self.config.max_consecutive_source_errors = count;
        self
    }

    /// 활성화할 분석기를 등록 순서대로 설정합니다.
    pub fn analyzers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.analyzers = names.into_iter().map(Into::into).collect();
        self
    }

    /// 분석기 병렬 실행 여부를 설정합니다.
    pub fn concurrent_analyzers(mut self, concurrent: bool) -> Self {
        self.config.concurrent_analyzers = concurrent;
        self
    }

    pub fn sql_injection(mut self, config: SqlInjectionConfig) -> Self {
        self.config.sql_injection = config;
        self
    }

    pub fn exfiltration(mut self, config: ExfiltrationConfig) -> Self {
        self.config.exfiltration = config;
        self
    }

    pub fn volume(mut self, config: VolumeConfig) -> Self {
        self.config.volume = config;
        self
    }

    /// 설정을 검증하고 `PipelineConfig`를 생성합니다.
    pub fn build(self) -> Result<PipelineConfig, QueryPipelineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
