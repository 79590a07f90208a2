//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `querywatch_`
//! - 모듈명: `pipeline_`, `volume_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(querywatch_core::metrics::PIPELINE_RECORDS_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 심각도 레이블 키 (low, medium, high, critical)
pub const LABEL_SEVERITY: &str = "severity";

/// 분석기 레이블 키 (sql_injection, exfiltration, volume_anomaly)
pub const LABEL_ANALYZER: &str = "analyzer";

/// 파서 형식 레이블 키 (pgaudit, postgres_log, json)
pub const LABEL_PARSER_FORMAT: &str = "format";

/// 싱크 레이블 키
pub const LABEL_SINK: &str = "sink";

// ─── Pipeline 메트릭 ────────────────────────────────────────────────

/// Pipeline: 소스에서 받은 전체 항목 수 (counter)
pub const PIPELINE_RECORDS_TOTAL: &str = "querywatch_pipeline_records_total";

/// Pipeline: 분석까지 마친 쿼리 수 (counter)
pub const PIPELINE_QUERIES_ANALYZED_TOTAL: &str = "querywatch_pipeline_queries_analyzed_total";

/// Pipeline: 감사 레코드가 아니어서 건너뛴 항목 수 (counter)
pub const PIPELINE_RECORDS_SKIPPED_TOTAL: &str = "querywatch_pipeline_records_skipped_total";

/// Pipeline: 잘못된 형식의 레코드 수 (counter, label: format)
pub const PIPELINE_MALFORMED_RECORDS_TOTAL: &str = "querywatch_pipeline_malformed_records_total";

/// Pipeline: 분석기 판정 수 (counter, labels: analyzer, severity)
pub const PIPELINE_FINDINGS_TOTAL: &str = "querywatch_pipeline_findings_total";

/// Pipeline: 분석기 장애 수 (counter, label: analyzer)
pub const PIPELINE_ANALYZER_FAULTS_TOTAL: &str = "querywatch_pipeline_analyzer_faults_total";

/// Pipeline: 생성된 알림 수 (counter, label: severity)
pub const PIPELINE_ALERTS_TOTAL: &str = "querywatch_pipeline_alerts_total";

/// Pipeline: 싱크 전달 실패 수 (counter, label: sink)
pub const PIPELINE_SINK_FAILURES_TOTAL: &str = "querywatch_pipeline_sink_failures_total";

/// Pipeline: 소스 읽기 실패 수 (counter)
pub const PIPELINE_SOURCE_ERRORS_TOTAL: &str = "querywatch_pipeline_source_errors_total";

/// Pipeline: 쿼리 하나의 처리 지연 시간 (histogram, 초)
pub const PIPELINE_PROCESSING_DURATION_SECONDS: &str =
    "querywatch_pipeline_processing_duration_seconds";

// ─── Volume 분석기 메트릭 ────────────────────────────────────────────

/// Volume: 추적 중인 그룹 키 수 (gauge)
pub const VOLUME_TRACKED_KEYS: &str = "querywatch_volume_tracked_keys";

/// Volume: 윈도우 밖으로 늦게 도착해 버려진 이벤트 수 (counter)
pub const VOLUME_LATE_EVENTS_DROPPED_TOTAL: &str = "querywatch_volume_late_events_dropped_total";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 등록된 분석기 수 (gauge)
pub const DAEMON_ANALYZERS_REGISTERED: &str = "querywatch_daemon_analyzers_registered";

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "querywatch_daemon_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 쿼리 처리 지연 시간 히스토그램 버킷 (초)
///
/// 10us ~ 1s 범위, 싱크 전달 포함
pub const PROCESSING_DURATION_BUCKETS: [f64; 10] = [
    0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 1.0,
];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 이 함수는 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `querywatch-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(
        PIPELINE_RECORDS_TOTAL,
        "Total number of items pulled from the input source"
    );
    describe_counter!(
        PIPELINE_QUERIES_ANALYZED_TOTAL,
        "Total number of queries run through the analyzer registry"
    );
    describe_counter!(
        PIPELINE_RECORDS_SKIPPED_TOTAL,
        "Total number of raw records skipped because they are not audit records"
    );
    describe_counter!(
        PIPELINE_MALFORMED_RECORDS_TOTAL,
        "Total number of raw records that failed to parse"
    );
    describe_counter!(
        PIPELINE_FINDINGS_TOTAL,
        "Total number of findings produced, by analyzer and severity"
    );
    describe_counter!(
        PIPELINE_ANALYZER_FAULTS_TOTAL,
        "Total number of analyzer faults (errors or panics) isolated by the registry"
    );
    describe_counter!(
        PIPELINE_ALERTS_TOTAL,
        "Total number of alerts handed to output sinks"
    );
    describe_counter!(
        PIPELINE_SINK_FAILURES_TOTAL,
        "Total number of failed alert deliveries, by sink"
    );
    describe_counter!(
        PIPELINE_SOURCE_ERRORS_TOTAL,
        "Total number of input source read failures"
    );
    describe_histogram!(
        PIPELINE_PROCESSING_DURATION_SECONDS,
        "Time to analyze one query and deliver its alert in seconds"
    );

    describe_gauge!(
        VOLUME_TRACKED_KEYS,
        "Number of grouping keys tracked by the volume anomaly analyzer"
    );
    describe_counter!(
        VOLUME_LATE_EVENTS_DROPPED_TOTAL,
        "Total number of events older than the volume window that were not retained"
    );

    describe_gauge!(
        DAEMON_ANALYZERS_REGISTERED,
        "Number of analyzers registered in the daemon"
    );
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}
