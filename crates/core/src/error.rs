//! 에러 타입 -- 도메인별 에러 정의

/// QueryWatch 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum QueryWatchError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파싱 에러
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// 분석기 에러
    #[error("analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),

    /// 알림 싱크 에러
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// 입력 소스 에러
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파싱 에러
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// 감사 레코드 문법 불일치
    #[error("malformed {format} record at offset {offset}: {reason}")]
    MalformedRecord {
        format: String,
        offset: usize,
        reason: String,
    },

    /// 빈 SQL 문
    #[error("statement is empty")]
    EmptyStatement,

    /// 입력 데이터 초과
    #[error("input too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    /// 지원하지 않는 형식
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// 분석기 에러
#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    /// 같은 이름의 분석기가 이미 등록됨
    #[error("analyzer already registered: {name}")]
    Duplicate { name: String },

    /// 알 수 없는 분석기 이름
    #[error("unknown analyzer: {name}")]
    Unknown { name: String },

    /// 분석 중 내부 오류 (패닉 포함)
    #[error("analyzer '{analyzer}' faulted: {reason}")]
    Fault { analyzer: String, reason: String },

    /// 내부 상태 손상 (poisoned lock 등)
    #[error("analyzer '{analyzer}' state unavailable: {reason}")]
    State { analyzer: String, reason: String },
}

/// 알림 싱크 에러
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// 전달 실패
    #[error("sink '{sink}' delivery failed: {reason}")]
    Delivery { sink: String, reason: String },

    /// 싱크가 닫힘
    #[error("sink '{sink}' is closed")]
    Closed { sink: String },
}

/// 입력 소스 에러
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// 읽기 실패
    #[error("source '{source_name}' read failed: {reason}")]
    Read { source_name: String, reason: String },

    /// 입력이 유효한 UTF-8이 아님
    #[error("source '{source_name}' produced invalid utf-8 at line {line}")]
    InvalidEncoding { source_name: String, line: usize },
}

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 연속 소스 실패 한도 초과
    #[error("source failed {count} times in a row, giving up")]
    SourceFailures { count: usize },
}
