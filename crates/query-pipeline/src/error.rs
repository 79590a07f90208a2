//! 쿼리 파이프라인 에러 타입
//!
//! [`QueryPipelineError`]는 파이프라인 구성과 실행 중 발생하는 에러를 표현합니다.
//! `From<QueryPipelineError> for QueryWatchError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.

use querywatch_core::error::{
    AnalyzerError, ConfigError, ParseError, PipelineError, QueryWatchError, SourceError,
};

/// 쿼리 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum QueryPipelineError {
    /// 레코드 파싱 실패
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// 분석기 등록/실행 에러
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),

    /// 시그니처 파일 로딩 실패
    #[error("signature load error: {path}: {reason}")]
    SignatureLoad {
        /// 시그니처 파일 경로
        path: String,
        /// 로딩 실패 사유
        reason: String,
    },

    /// 시그니처 유효성 검증 실패
    #[error("signature validation error: signature '{signature_id}': {reason}")]
    SignatureValidation {
        /// 문제가 된 시그니처 ID
        signature_id: String,
        /// 검증 실패 사유
        reason: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 입력 소스 에러
    #[error(transparent)]
    Source(#[from] SourceError),

    /// 연속 소스 실패 한도 초과
    #[error("source failed {count} times in a row, giving up")]
    SourceExhausted {
        /// 연속 실패 횟수
        count: usize,
    },

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 정규식 컴파일 에러
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl QueryPipelineError {
    pub(crate) fn config(field: &str, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.to_owned(),
            reason: reason.into(),
        }
    }
}

impl From<QueryPipelineError> for QueryWatchError {
    fn from(err: QueryPipelineError) -> Self {
        match err {
            QueryPipelineError::Parse(e) => QueryWatchError::Parse(e),
            QueryPipelineError::Analyzer(e) => QueryWatchError::Analyzer(e),
            QueryPipelineError::Source(e) => QueryWatchError::Source(e),
            QueryPipelineError::Io(e) => QueryWatchError::Io(e),
            QueryPipelineError::Config { field, reason } => {
                QueryWatchError::Config(ConfigError::InvalidValue { field, reason })
            }
            QueryPipelineError::SourceExhausted { count } => {
                QueryWatchError::Pipeline(PipelineError::SourceFailures { count })
            }
            other => QueryWatchError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}
