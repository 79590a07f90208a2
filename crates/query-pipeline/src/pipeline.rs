//! 파이프라인 오케스트레이션 -- 입력/파싱/분석/집계/전달의 전체 흐름을 관리합니다.
//!
//! # 내부 아키텍처
//! ```text
//! QuerySource -> ParserRouter -> AnalyzerRegistry -> AlertAggregator -> SinkSet
//! ```
//!
//! 항목은 한 번에 하나씩 처리합니다. 알림이 모든 싱크에 전달된 뒤에야 다음 항목을
//! 요청하므로 내부 버퍼가 쌓이지 않습니다. 취소 신호는 항목 사이에서만 확인합니다.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use querywatch_core::metrics as m;
use querywatch_core::pipeline::DynAlertSink;
use querywatch_core::types::Alert;

use crate::alert::AlertAggregator;
use crate::analyzer::AnalyzerRegistry;
use crate::config::PipelineConfig;
use crate::error::QueryPipelineError;
use crate::parser::ParserRouter;
use crate::sink::SinkSet;
use crate::source::{QuerySource, SourceItem};

/// 파이프라인 실행 통계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    /// 분석까지 마친 쿼리 수
    pub processed: u64,
    /// 감사 레코드가 아니어서 건너뛴 원시 레코드 수
    pub skipped: u64,
    /// 파싱에 실패한 원시 레코드 수
    pub malformed: u64,
    /// 격리된 분석기 장애 수
    pub analyzer_faults: u64,
    /// 생성된 알림 수
    pub alerts: u64,
    /// 실패한 싱크 전달 수
    pub sink_failures: u64,
    /// 소스 읽기 실패 수
    pub source_errors: u64,
}

/// 쿼리 분석 파이프라인
///
/// # 사용 예시
/// ```ignore
/// use querywatch_pipeline::{ManualSource, QueryPipelineBuilder};
///
/// let mut pipeline = QueryPipelineBuilder::new()
///     .config(config)
///     .sink(Arc::new(ConsoleSink::stdout()))
///     .build(source)?;
///
/// let report = pipeline.run().await?;
/// ```
pub struct QueryPipeline<S> {
    source: S,
    parser: ParserRouter,
    registry: AnalyzerRegistry,
    aggregator: AlertAggregator,
    sinks: SinkSet,
    cancel: CancellationToken,
    max_consecutive_source_errors: usize,
    report: PipelineReport,
}

impl<S: QuerySource> QueryPipeline<S> {
    /// 소스가 끝나거나 취소될 때까지 항목을 처리합니다.
    ///
    /// 소스 읽기 실패가 `max_consecutive_source_errors`번을 넘겨 연속되면
    /// [`QueryPipelineError::SourceExhausted`]를 반환합니다.
    pub async fn run(&mut self) -> Result<PipelineReport, QueryPipelineError> {
        tracing::info!(
            source = self.source.name(),
            analyzers = ?self.registry.names(),
            sinks = ?self.sinks.names(),
            "query pipeline started"
        );

        let mut consecutive_errors = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::info!("query pipeline cancelled");
                    break;
                }
                next = self.source.next_item() => next,
            };

            match next {
                Ok(Some(item)) => {
                    consecutive_errors = 0;
                    self.process_item(item).await;
                }
                Ok(None) => {
                    tracing::info!(source = self.source.name(), "source exhausted");
                    break;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    self.report.source_errors += 1;
                    metrics::counter!(m::PIPELINE_SOURCE_ERRORS_TOTAL).increment(1);
                    tracing::warn!(
                        error = %e,
                        consecutive = consecutive_errors,
                        max = self.max_consecutive_source_errors,
                        "source read failed"
                    );
                    if consecutive_errors > self.max_consecutive_source_errors {
                        tracing::error!(
                            count = consecutive_errors,
                            "too many consecutive source failures, stopping"
                        );
                        return Err(QueryPipelineError::SourceExhausted {
                            count: consecutive_errors,
                        });
                    }
                }
            }
        }

        tracing::info!(report = ?self.report, "query pipeline stopped");
        Ok(self.report.clone())
    }

    /// 항목 하나를 처리하고, 알림이 생성되었다면 반환합니다.
    pub async fn process_item(&mut self, item: SourceItem) -> Option<Arc<Alert>> {
        metrics::counter!(m::PIPELINE_RECORDS_TOTAL).increment(1);

        let query = match item {
            SourceItem::Query(query) => query,
            SourceItem::Raw(raw) => match self.parser.parse(&raw) {
                Ok(Some(query)) => query,
                Ok(None) => {
                    self.report.skipped += 1;
                    metrics::counter!(m::PIPELINE_RECORDS_SKIPPED_TOTAL).increment(1);
                    tracing::trace!(source = %raw.source, "non-audit record skipped");
                    return None;
                }
                Err(e) => {
                    self.report.malformed += 1;
                    metrics::counter!(
                        m::PIPELINE_MALFORMED_RECORDS_TOTAL,
                        m::LABEL_PARSER_FORMAT => raw.format.parser_name()
                    )
                    .increment(1);
                    tracing::warn!(source = %raw.source, error = %e, "malformed record skipped");
                    return None;
                }
            },
        };

        let started = Instant::now();
        let query = Arc::new(query);
        let analysis = self.registry.analyze_all(&query).await;
        self.report.processed += 1;
        self.report.analyzer_faults += analysis.faults.len() as u64;
        metrics::counter!(m::PIPELINE_QUERIES_ANALYZED_TOTAL).increment(1);

        let alert = self
            .aggregator
            .aggregate(Arc::clone(&query), analysis.findings)
            .map(Arc::new);

        if let Some(alert) = &alert {
            self.report.alerts += 1;
            let failures = self.sinks.dispatch(Arc::clone(alert)).await;
            self.report.sink_failures += failures as u64;
        } else {
            tracing::trace!(query = %query.preview(50), "no findings");
        }

        metrics::histogram!(m::PIPELINE_PROCESSING_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        alert
    }

    /// 지금까지의 통계
    pub fn report(&self) -> &PipelineReport {
        &self.report
    }

    pub fn registry(&self) -> &AnalyzerRegistry {
        &self.registry
    }

    pub fn aggregator(&self) -> &AlertAggregator {
        &self.aggregator
    }

    /// 파이프라인 취소 토큰 (복제해서 다른 태스크에서 취소할 수 있음)
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// 쿼리 파이프라인 빌더
pub struct QueryPipelineBuilder {
    config: PipelineConfig,
    registry: Option<AnalyzerRegistry>,
    sinks: SinkSet,
    cancel: Option<CancellationToken>,
}

impl QueryPipelineBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            registry: None,
            sinks: SinkSet::new(),
            cancel: None,
        }
    }

    /// 파이프라인 설정을 지정합니다.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// 미리 구성한 분석기 레지스트리를 사용합니다.
    ///
    /// 지정하지 않으면 설정의 활성화 목록으로 기본 분석기를 생성합니다.
    pub fn registry(mut self, registry: AnalyzerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 알림 싱크를 추가합니다.
    pub fn sink(mut self, sink: Arc<dyn DynAlertSink>) -> Self {
        self.sinks.add(sink);
        self
    }

    /// 외부 취소 토큰을 연결합니다.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// 파이프라인을 빌드합니다.
    pub fn build<S: QuerySource>(self, source: S) -> Result<QueryPipeline<S>, QueryPipelineError> {
        self.config.validate()?;

        let registry = match self.registry {
            Some(registry) => registry,
            None => AnalyzerRegistry::from_config(&self.config, Vec::new())?,
        };
        if registry.is_empty() {
            tracing::warn!("no analyzers registered, queries will never raise alerts");
        }
        if self.sinks.is_empty() {
            tracing::warn!("no alert sinks configured, alerts will only be counted");
        }

        Ok(QueryPipeline {
            source,
            parser: ParserRouter::with_defaults(self.config.max_record_size),
            registry,
            aggregator: AlertAggregator::new(),
            sinks: self.sinks,
            cancel: self.cancel.unwrap_or_default(),
            max_consecutive_source_errors: self.config.max_consecutive_source_errors,
            report: PipelineReport::default(),
        })
    }
}

impl Default for QueryPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
