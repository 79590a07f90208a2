//! 분석기 -- 레지스트리와 기본 분석기
//!
//! [`AnalyzerRegistry`]는 등록된 분석기를 같은 쿼리에 대해 모두 실행하고,
//! 판정을 등록 순서대로 모읍니다. 분석기 하나의 에러나 패닉은
//! [`AnalyzerError::Fault`]로 격리되며 나머지 분석기는 계속 실행됩니다.
//!
//! # 기본 분석기
//! - [`SqlInjectionAnalyzer`]: 시그니처 기반 SQL 인젝션 탐지
//! - [`ExfiltrationAnalyzer`]: 민감 객체 대량 조회/내보내기 탐지
//! - [`VolumeAnomalyAnalyzer`]: 사용자별 쿼리량 급증 탐지

pub mod exfiltration;
pub mod signature;
pub mod sql_injection;
pub mod volume;

pub use exfiltration::{ExfiltrationAnalyzer, SensitivityTier};
pub use signature::{SignatureDef, SignatureLoader};
pub use sql_injection::SqlInjectionAnalyzer;
pub use volume::VolumeAnomalyAnalyzer;

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use querywatch_core::config::{
    ANALYZER_EXFILTRATION, ANALYZER_SQL_INJECTION, ANALYZER_VOLUME_ANOMALY,
};
use querywatch_core::error::AnalyzerError;
use querywatch_core::metrics as m;
use querywatch_core::pipeline::Analyzer;
use querywatch_core::types::{Finding, Query};

use crate::config::PipelineConfig;
use crate::error::QueryPipelineError;

/// 매칭용으로 SQL을 정규화합니다 (소문자, 연속 공백 축약).
pub fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 쿼리 하나에 대한 분석 결과
#[derive(Debug, Default)]
pub struct AnalysisReport {
    /// 등록 순서대로 정렬된 판정
    pub findings: Vec<Finding>,
    /// 격리된 분석기 장애
    pub faults: Vec<AnalyzerError>,
}

/// 분석기 레지스트리
pub struct AnalyzerRegistry {
    analyzers: Vec<Arc<dyn Analyzer>>,
    /// 분석기를 blocking 태스크로 병렬 실행할지 여부
    concurrent: bool,
}

impl AnalyzerRegistry {
    pub fn new(concurrent: bool) -> Self {
        Self {
            analyzers: Vec::new(),
            concurrent,
        }
    }

    /// 분석기를 등록합니다. 같은 이름이 이미 있으면 에러를 반환합니다.
    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) -> Result<(), QueryPipelineError> {
        let name = analyzer.name();
        if self.analyzers.iter().any(|a| a.name() == name) {
            return Err(AnalyzerError::Duplicate {
                name: name.to_owned(),
            }
            .into());
        }
        tracing::debug!(analyzer = name, "analyzer registered");
        self.analyzers.push(analyzer);
        Ok(())
    }

    /// 설정의 활성화 목록 순서대로 기본 분석기를 생성해 등록합니다.
    ///
    /// `extra_signatures`는 디렉토리에서 미리 읽어 둔 SQL 인젝션 시그니처입니다.
    pub fn from_config(
        config: &PipelineConfig,
        mut extra_signatures: Vec<SignatureDef>,
    ) -> Result<Self, QueryPipelineError> {
        let mut registry = Self::new(config.concurrent_analyzers);
        for name in &config.analyzers {
            let analyzer: Arc<dyn Analyzer> = match name.as_str() {
                ANALYZER_SQL_INJECTION => Arc::new(SqlInjectionAnalyzer::from_config(
                    &config.sql_injection,
                    std::mem::take(&mut extra_signatures),
                )?),
                ANALYZER_EXFILTRATION => Arc::new(ExfiltrationAnalyzer::new(&config.exfiltration)?),
                ANALYZER_VOLUME_ANOMALY => Arc::new(VolumeAnomalyAnalyzer::new(&config.volume)?),
                other => {
                    return Err(AnalyzerError::Unknown {
                        name: other.to_owned(),
                    }
                    .into());
                }
            };
            registry.register(analyzer)?;
        }
        Ok(registry)
    }

    /// 등록 순서대로 분석기 이름을 반환합니다.
    pub fn names(&self) -> Vec<&str> {
        self.analyzers.iter().map(|a| a.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    pub fn is_concurrent(&self) -> bool {
        self.concurrent
    }

    /// 모든 분석기를 실행합니다. 이 함수 자체는 실패하지 않습니다.
    pub async fn analyze_all(&self, query: &Arc<Query>) -> AnalysisReport {
        let outcomes = if self.concurrent {
            self.run_concurrent(query).await
        } else {
            self.run_sequential(query)
        };

        let mut report = AnalysisReport::default();
        for (analyzer, outcome) in self.analyzers.iter().zip(outcomes) {
            match outcome {
                Ok(Some(finding)) => {
                    metrics::counter!(
                        m::PIPELINE_FINDINGS_TOTAL,
                        m::LABEL_ANALYZER => analyzer.name().to_owned(),
                        m::LABEL_SEVERITY => finding.severity.as_str()
                    )
                    .increment(1);
                    report.findings.push(finding);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        analyzer = analyzer.name(),
                        error = %err,
                        query = %query.preview(50),
                        "analyzer fault"
                    );
                    metrics::counter!(
                        m::PIPELINE_ANALYZER_FAULTS_TOTAL,
                        m::LABEL_ANALYZER => analyzer.name().to_owned()
                    )
                    .increment(1);
                    report.faults.push(err);
                }
            }
        }
        report
    }

    /// 분석기마다 blocking 태스크를 띄우고 등록 순서대로 결과 슬롯을 채웁니다.
    async fn run_concurrent(
        &self,
        query: &Arc<Query>,
    ) -> Vec<Result<Option<Finding>, AnalyzerError>> {
        let handles: Vec<_> = self
            .analyzers
            .iter()
            .map(|analyzer| {
                let analyzer = Arc::clone(analyzer);
                let query = Arc::clone(query);
                tokio::task::spawn_blocking(move || analyzer.analyze(&query))
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (analyzer, handle) in self.analyzers.iter().zip(handles) {
            let outcome = match handle.await {
                Ok(result) => result.map_err(|e| into_fault(analyzer.name(), e)),
                Err(join_err) => Err(AnalyzerError::Fault {
                    analyzer: analyzer.name().to_owned(),
                    reason: if join_err.is_panic() {
                        format!("panicked: {}", panic_message(&*join_err.into_panic()))
                    } else {
                        "task cancelled".to_owned()
                    },
                }),
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    fn run_sequential(&self, query: &Query) -> Vec<Result<Option<Finding>, AnalyzerError>> {
        self.analyzers
            .iter()
            .map(|analyzer| {
                match catch_unwind(AssertUnwindSafe(|| analyzer.analyze(query))) {
                    Ok(result) => result.map_err(|e| into_fault(analyzer.name(), e)),
                    Err(payload) => Err(AnalyzerError::Fault {
                        analyzer: analyzer.name().to_owned(),
                        reason: format!("panicked: {}", panic_message(&*payload)),
                    }),
                }
            })
            .collect()
    }
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}

/// 분석기가 돌려준 에러를 장애로 정리합니다. 이미 장애/상태 에러면 그대로 둡니다.
fn into_fault(name: &str, err: AnalyzerError) -> AnalyzerError {
    match err {
        AnalyzerError::Fault { .. } | AnalyzerError::State { .. } => err,
        other => AnalyzerError::Fault {
            analyzer: name.to_owned(),
            reason: other.to_string(),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
