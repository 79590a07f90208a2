//! 파이프라인 trait -- 분석기, 파서, 알림 싱크 확장 포인트 정의

use std::future::Future;
use std::pin::Pin;

use crate::error::{AnalyzerError, ParseError, SinkError};
use crate::types::{Alert, Finding, Query};

/// `Send` boxed future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 탐지 로직을 구현하는 trait
///
/// 새로운 분석기를 추가하려면 이 trait을 구현합니다.
/// 쿼리당 0개 또는 1개의 [`Finding`]을 반환하며, 여러 규칙이 매칭되면
/// 하나를 선택하고 나머지는 `details`에 남겨야 합니다.
///
/// `Err`는 "탐지 없음"이 아니라 분석기 내부 장애를 뜻합니다.
pub trait Analyzer: Send + Sync {
    /// 분석기 이름 (레지스트리 내에서 고유)
    fn name(&self) -> &str;

    /// 쿼리를 분석하여 판정 여부를 결정
    fn analyze(&self, query: &Query) -> Result<Option<Finding>, AnalyzerError>;
}

/// 감사 로그 파서 trait
///
/// 새로운 레코드 형식을 지원하려면 이 trait을 구현합니다.
pub trait QueryParser: Send + Sync {
    /// 지원하는 형식 이름
    fn format_name(&self) -> &str;

    /// 원시 바이트를 쿼리로 파싱
    ///
    /// 감사 레코드가 아닌 입력(예: 일반 로그 라인)은 `Ok(None)`으로 건너뜁니다.
    fn parse(&self, raw: &[u8]) -> Result<Option<Query>, ParseError>;
}

/// 알림을 외부로 전달하는 싱크 trait
///
/// 실패는 `Err`로 보고하며 파이프라인 밖으로 전파되지 않습니다.
///
/// # 구현 예시
/// ```ignore
/// struct Stdout;
///
/// impl AlertSink for Stdout {
///     fn name(&self) -> &str { "stdout" }
///
///     async fn emit(&self, alert: &Alert) -> Result<(), SinkError> {
///         println!("{alert}");
///         Ok(())
///     }
/// }
/// ```
pub trait AlertSink: Send + Sync {
    /// 싱크 이름
    fn name(&self) -> &str;

    /// 알림 하나를 전달합니다.
    fn emit(&self, alert: &Alert) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// dyn-compatible 알림 싱크 trait
///
/// `AlertSink`는 RPITIT를 사용하므로 `dyn AlertSink`가 불가합니다.
/// `DynAlertSink`는 `BoxFuture`를 반환하여 `Vec<Arc<dyn DynAlertSink>>`로
/// 여러 싱크를 동적으로 관리할 수 있게 합니다.
pub trait DynAlertSink: Send + Sync {
    fn name(&self) -> &str;

    fn emit<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, Result<(), SinkError>>;
}

/// AlertSink를 구현한 타입은 자동으로 DynAlertSink도 구현됩니다.
impl<T: AlertSink> DynAlertSink for T {
    fn name(&self) -> &str {
        AlertSink::name(self)
    }

    fn emit<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(AlertSink::emit(self, alert))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::types::Severity;

    struct CountingSink {
        emitted: AtomicUsize,
    }

    impl AlertSink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }

        async fn emit(&self, _alert: &Alert) -> Result<(), SinkError> {
            self.emitted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct KeywordAnalyzer;

    impl Analyzer for KeywordAnalyzer {
        fn name(&self) -> &str {
            "keyword"
        }

        fn analyze(&self, query: &Query) -> Result<Option<Finding>, AnalyzerError> {
            Ok(query
                .sql()
                .contains("DROP")
                .then(|| Finding::new(self.name(), Severity::High, "drop statement")))
        }
    }

    #[tokio::test]
    async fn dyn_alert_sink_can_be_shared() {
        let sink = Arc::new(CountingSink {
            emitted: AtomicUsize::new(0),
        });
        let dyn_sink: Arc<dyn DynAlertSink> = sink.clone();

        let query = Arc::new(Query::from_sql("DROP TABLE t").unwrap());
        let alert = Alert::new(
            query,
            vec![Finding::new("keyword", Severity::High, "drop statement")],
        )
        .unwrap();

        assert_eq!(dyn_sink.name(), "counting");
        dyn_sink.emit(&alert).await.unwrap();
        dyn_sink.emit(&alert).await.unwrap();
        assert_eq!(sink.emitted.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn analyzer_trait_object() {
        let analyzer: Box<dyn Analyzer> = Box::new(KeywordAnalyzer);
        let hit = analyzer
            .analyze(&Query::from_sql("DROP TABLE t").unwrap())
            .unwrap();
        assert!(hit.is_some());
        let miss = analyzer
            .analyze(&Query::from_sql("SELECT 1").unwrap())
            .unwrap();
        assert!(miss.is_none());
    }
}
