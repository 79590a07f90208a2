//! SQL 인젝션 분석기
//!
//! SQL 문을 정규화(소문자, 연속 공백 축약)한 뒤 시그니처를 우선순위 순서로 적용합니다.
//! 여러 시그니처가 매칭되면 하나만 판정으로 선택하고 나머지는 `also_matched`에 남깁니다.
//!
//! # 선택 규칙
//! 1. 우선순위 값이 가장 낮은 시그니처
//! 2. 같으면 더 앞에서 매칭된 시그니처
//! 3. 같은 위치라면 더 긴 매칭
//! 4. 그래도 같으면 먼저 등록된 시그니처

use std::cmp::Reverse;
use std::collections::HashSet;

use querywatch_core::config::{ANALYZER_SQL_INJECTION, SqlInjectionConfig};
use querywatch_core::error::AnalyzerError;
use querywatch_core::pipeline::Analyzer;
use querywatch_core::types::{Finding, Query};

use super::normalize_sql;
use super::signature::{Signature, SignatureDef, SignatureStatus, default_signatures};
use crate::error::QueryPipelineError;

/// 판정 사유에 넣을 매칭 텍스트 최대 길이
const MAX_EXCERPT_CHARS: usize = 64;

/// SQL 인젝션 분석기
pub struct SqlInjectionAnalyzer {
    /// 우선순위 순으로 정렬된 시그니처
    signatures: Vec<Signature>,
}

impl SqlInjectionAnalyzer {
    /// 시그니처 정의로 분석기를 생성합니다.
    ///
    /// 비활성 시그니처는 제외하고, 중복 ID는 에러로 처리합니다.
    pub fn new(defs: Vec<SignatureDef>) -> Result<Self, QueryPipelineError> {
        let mut seen = HashSet::new();
        let mut signatures = Vec::with_capacity(defs.len());
        for def in defs {
            if def.status == SignatureStatus::Disabled {
                continue;
            }
            if !seen.insert(def.id.clone()) {
                return Err(QueryPipelineError::SignatureValidation {
                    signature_id: def.id,
                    reason: "duplicate signature id".to_owned(),
                });
            }
            def.validate()?;
            signatures.push(def.compile()?);
        }

        if signatures.is_empty() {
            return Err(QueryPipelineError::config(
                "sql_injection",
                "no enabled signatures",
            ));
        }

        // 안정 정렬: 같은 우선순위는 등록 순서 유지
        signatures.sort_by_key(|s| s.def.priority);
        Ok(Self { signatures })
    }

    /// 기본 시그니처 세트로 분석기를 생성합니다.
    pub fn with_defaults() -> Result<Self, QueryPipelineError> {
        Self::new(default_signatures())
    }

    /// 설정과 디렉토리에서 읽은 추가 시그니처로 분석기를 생성합니다.
    pub fn from_config(
        config: &SqlInjectionConfig,
        extra: Vec<SignatureDef>,
    ) -> Result<Self, QueryPipelineError> {
        let mut defs = if config.include_defaults {
            default_signatures()
        } else {
            Vec::new()
        };
        for inline in &config.signatures {
            defs.push(SignatureDef::from_config(inline)?);
        }
        defs.extend(extra);
        Self::new(defs)
    }

    /// 활성 시그니처 수
    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    /// 시그니처 ID 목록 (우선순위 순)
    pub fn signature_ids(&self) -> Vec<&str> {
        self.signatures.iter().map(|s| s.def.id.as_str()).collect()
    }
}

struct Candidate<'a> {
    index: usize,
    start: usize,
    matched: &'a str,
}

impl Analyzer for SqlInjectionAnalyzer {
    fn name(&self) -> &str {
        ANALYZER_SQL_INJECTION
    }

    fn analyze(&self, query: &Query) -> Result<Option<Finding>, AnalyzerError> {
        let normalized = normalize_sql(query.sql());

        let candidates: Vec<Candidate<'_>> = self
            .signatures
            .iter()
            .enumerate()
            .filter_map(|(index, sig)| {
                sig.find(&normalized).map(|m| Candidate {
                    index,
                    start: m.start(),
                    matched: m.as_str(),
                })
            })
            .collect();

        let Some(winner) = candidates.iter().min_by_key(|c| {
            (
                self.signatures[c.index].def.priority,
                c.start,
                Reverse(c.matched.len()),
                c.index,
            )
        }) else {
            return Ok(None);
        };

        let sig = &self.signatures[winner.index].def;
        let label = if sig.description.is_empty() {
            sig.id.as_str()
        } else {
            sig.description.as_str()
        };
        let excerpt: String = winner.matched.chars().take(MAX_EXCERPT_CHARS).collect();

        let mut finding = Finding::new(
            ANALYZER_SQL_INJECTION,
            sig.severity,
            format!("{label}: matched '{excerpt}'"),
        )
        .with_pattern(sig.id.clone())
        .with_detail("match_offset", winner.start.to_string());

        let others: Vec<&str> = candidates
            .iter()
            .filter(|c| c.index != winner.index)
            .map(|c| self.signatures[c.index].def.id.as_str())
            .collect();
        if !others.is_empty() {
            finding = finding.with_detail("also_matched", others.join(","));
        }

        Ok(Some(finding))
    }
}
