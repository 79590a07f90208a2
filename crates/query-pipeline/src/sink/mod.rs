//! 알림 싱크 -- 알림을 외부로 전달합니다.
//!
//! # 싱크 종류
//! - [`ConsoleSink`]: 사람이 읽는 한 줄 요약 + 판정별 한 줄
//! - [`JsonLinesSink`]: 알림 하나당 JSON 한 줄
//! - [`ChannelSink`]: `tokio::mpsc` 채널로 전달 (다른 태스크에서 소비)
//!
//! [`SinkSet`]은 알림 하나를 모든 싱크에 동시에 전달하고 전부 끝날 때까지 기다립니다.
//! 싱크 하나의 실패는 다른 싱크와 파이프라인에 영향을 주지 않습니다.

pub mod channel;
pub mod console;
pub mod json;

pub use channel::ChannelSink;
pub use console::ConsoleSink;
pub use json::JsonLinesSink;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;

use querywatch_core::metrics as m;
use querywatch_core::pipeline::DynAlertSink;
use querywatch_core::types::Alert;

/// 싱크 세트
#[derive(Default, Clone)]
pub struct SinkSet {
    sinks: Vec<Arc<dyn DynAlertSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 싱크를 추가합니다.
    pub fn add(&mut self, sink: Arc<dyn DynAlertSink>) {
        tracing::debug!(sink = sink.name(), "alert sink added");
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// 싱크 이름 목록
    pub fn names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// 알림을 모든 싱크에 전달하고 실패한 싱크 수를 반환합니다.
    pub async fn dispatch(&self, alert: Arc<Alert>) -> usize {
        let mut tasks = JoinSet::new();
        let mut names = HashMap::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            let sink = Arc::clone(sink);
            let alert = Arc::clone(&alert);
            let name = sink.name().to_owned();
            let handle = tasks.spawn(async move { sink.emit(&alert).await });
            names.insert(handle.id(), name);
        }

        let mut failures = 0;
        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, reason) = match joined {
                Ok((_, Ok(()))) => continue,
                Ok((id, Err(e))) => (id, e.to_string()),
                Err(e) => (e.id(), format!("sink task failed: {e}")),
            };
            failures += 1;
            let sink = names.remove(&id).unwrap_or_default();
            tracing::warn!(sink = %sink, alert_id = %alert.id, reason = %reason, "alert delivery failed");
            metrics::counter!(m::PIPELINE_SINK_FAILURES_TOTAL, m::LABEL_SINK => sink).increment(1);
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use querywatch_core::error::SinkError;
    use querywatch_core::pipeline::AlertSink;
    use querywatch_core::types::{Finding, Query, Severity};

    use super::*;

    struct CountingSink(AtomicUsize);

    impl AlertSink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }

        async fn emit(&self, _alert: &Alert) -> Result<(), SinkError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct BrokenSink;

    impl AlertSink for BrokenSink {
        fn name(&self) -> &str {
            "broken"
        }

        async fn emit(&self, _alert: &Alert) -> Result<(), SinkError> {
            Err(SinkError::Delivery {
                sink: "broken".to_owned(),
                reason: "connection refused".to_owned(),
            })
        }
    }

    struct PanickingSink;

    impl AlertSink for PanickingSink {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn emit(&self, _alert: &Alert) -> Result<(), SinkError> {
            panic!("sink exploded");
        }
    }

    fn alert() -> Arc<Alert> {
        let query = Arc::new(Query::from_sql("SELECT 1").unwrap());
        Arc::new(Alert::new(query, vec![Finding::new("test", Severity::Low, "x")]).unwrap())
    }

    #[tokio::test]
    async fn failures_are_counted_and_isolated() {
        let counting = Arc::new(CountingSink(AtomicUsize::new(0)));
        let mut sinks = SinkSet::new();
        sinks.add(Arc::new(BrokenSink));
        sinks.add(counting.clone());
        sinks.add(Arc::new(PanickingSink));

        assert_eq!(sinks.dispatch(alert()).await, 2);
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
        assert_eq!(sinks.names(), vec!["broken", "counting", "panicking"]);
    }

    #[tokio::test]
    async fn empty_set_dispatches_nothing() {
        let sinks = SinkSet::new();
        assert!(sinks.is_empty());
        assert_eq!(sinks.dispatch(alert()).await, 0);
    }
}
