#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`source`]: 쿼리 입력 소스 (수동 주입, 파일/표준 입력, 채널)
//! - [`parser`]: pgaudit, PostgreSQL 로그 라인, JSON 행 파서와 형식 라우터
//! - [`analyzer`]: 분석기 레지스트리와 기본 분석기 3종
//! - [`alert`]: 쿼리 단위 알림 집계
//! - [`sink`]: 콘솔, JSON lines, 채널 싱크와 팬아웃
//! - [`pipeline`]: 전체 흐름 오케스트레이션
//! - [`config`]: 파이프라인 설정 (core 설정에서 파생)
//! - [`error`]: 도메인 에러 타입

pub mod alert;
pub mod config;
pub mod error;
pub mod pipeline;

pub mod analyzer;
pub mod parser;
pub mod sink;
pub mod source;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{PipelineReport, QueryPipeline, QueryPipelineBuilder};

// 설정
pub use config::{PipelineConfig, PipelineConfigBuilder};

// 에러
pub use error::QueryPipelineError;

// 파서
pub use parser::{
    AuditRecord, JsonRowParser, ParserRouter, PgAuditParser, PostgresLogLineParser, RecordFormat,
};

// 분석기
pub use analyzer::{
    AnalysisReport, AnalyzerRegistry, ExfiltrationAnalyzer, SignatureDef, SignatureLoader,
    SqlInjectionAnalyzer, VolumeAnomalyAnalyzer,
};

// 알림
pub use alert::AlertAggregator;

// 소스
pub use source::{ChannelSource, LineSource, ManualSource, QuerySource, RawRecord, SourceItem};

// 싱크
pub use sink::{ChannelSink, ConsoleSink, JsonLinesSink, SinkSet};
