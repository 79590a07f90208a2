//! 알림 집계 -- 쿼리 하나의 판정들을 [`Alert`] 하나로 묶습니다.
//!
//! 판정이 없으면 알림을 만들지 않습니다. 판정 순서는 분석기 등록 순서를 그대로 따릅니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use querywatch_core::metrics as m;
use querywatch_core::types::{Alert, Finding, Query};

/// 알림 집계기
#[derive(Debug, Default)]
pub struct AlertAggregator {
    /// 생성된 총 알림 수
    total_generated: AtomicU64,
    /// 판정이 없어 생략된 쿼리 수
    empty_suppressed: AtomicU64,
}

impl AlertAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 판정들을 알림으로 묶습니다. 판정이 없으면 `None`을 반환합니다.
    pub fn aggregate(&self, query: Arc<Query>, findings: Vec<Finding>) -> Option<Alert> {
        let Some(alert) = Alert::new(query, findings) else {
            self.empty_suppressed.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        self.total_generated.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            m::PIPELINE_ALERTS_TOTAL,
            m::LABEL_SEVERITY => alert.severity().as_str()
        )
        .increment(1);
        tracing::info!(
            alert_id = %alert.id,
            severity = %alert.severity(),
            analyzers = ?alert.analyzer_names(),
            "alert generated"
        );
        Some(alert)
    }

    pub fn total_generated(&self) -> u64 {
        self.total_generated.load(Ordering::Relaxed)
    }

    pub fn empty_suppressed(&self) -> u64 {
        self.empty_suppressed.load(Ordering::Relaxed)
    }
}
