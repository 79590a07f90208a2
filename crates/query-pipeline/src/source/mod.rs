//! 쿼리 입력 소스 -- 파이프라인이 한 번에 하나씩 당겨 가는 입력 스트림
//!
//! # 소스
//! - [`ManualSource`]: 미리 준비한 쿼리/레코드 목록 (테스트, 일괄 분석)
//! - [`LineSource`]: 파일 또는 표준 입력의 줄 단위 레코드
//! - [`ChannelSource`]: 다른 태스크가 mpsc 채널로 밀어 넣는 항목
//!
//! 소스는 이미 구조화된 [`Query`]를 내거나, 파서가 처리할 [`RawRecord`]를 냅니다.

pub mod channel;
pub mod line;
pub mod manual;

pub use channel::ChannelSource;
pub use line::LineSource;
pub use manual::ManualSource;

use std::future::Future;
use std::time::SystemTime;

use bytes::Bytes;

use querywatch_core::error::SourceError;
use querywatch_core::types::Query;

use crate::parser::RecordFormat;

/// 파서가 소비하는 원시 레코드
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// 원시 레코드 바이트 (줄바꿈 제외)
    pub data: Bytes,
    /// 출처 식별자 (예: "file:/var/log/postgresql.log", "stdin")
    pub source: String,
    /// 수신 시각
    pub received_at: SystemTime,
    /// 레코드 형식
    pub format: RecordFormat,
}

impl RawRecord {
    /// 새 원시 레코드를 생성합니다.
    pub fn new(data: impl Into<Bytes>, source: impl Into<String>, format: RecordFormat) -> Self {
        Self {
            data: data.into(),
            source: source.into(),
            received_at: SystemTime::now(),
            format,
        }
    }
}

/// 소스가 내는 항목
#[derive(Debug, Clone)]
pub enum SourceItem {
    /// 이미 구조화된 쿼리
    Query(Query),
    /// 파싱이 필요한 원시 레코드
    Raw(RawRecord),
}

impl From<Query> for SourceItem {
    fn from(query: Query) -> Self {
        Self::Query(query)
    }
}

impl From<RawRecord> for SourceItem {
    fn from(raw: RawRecord) -> Self {
        Self::Raw(raw)
    }
}

/// 쿼리 입력 소스 trait
///
/// `Ok(None)`은 입력이 끝났음을 뜻합니다. `Err`는 일시적인 읽기 실패로,
/// 파이프라인은 연속 실패 한도까지 다음 항목을 계속 요청합니다.
///
/// `next_item`이 반환하는 future는 취소될 수 있어야 합니다 (cancel-safe).
/// 파이프라인은 종료 신호와 `select!`로 경쟁시킵니다.
pub trait QuerySource: Send {
    /// 소스 이름
    fn name(&self) -> &str;

    /// 다음 항목을 읽습니다.
    fn next_item(&mut self)
    -> impl Future<Output = Result<Option<SourceItem>, SourceError>> + Send;
}
