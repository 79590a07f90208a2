//! 콘솔 싱크
//!
//! 알림마다 요약 한 줄과 판정별 들여쓴 한 줄을 씁니다.
//!
//! ```text
//! [Medium] SELECT * FROM users WHERE id = 1 OR 1=1 - 1 finding(s)
//!   [Medium] sql_injection: boolean tautology: matched 'or 1=1' (pattern: tautology)
//! ```

use std::fmt::Write as _;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use querywatch_core::error::SinkError;
use querywatch_core::pipeline::AlertSink;
use querywatch_core::types::Alert;

const SINK_NAME: &str = "console";

/// 콘솔(또는 임의의 writer) 싱크
pub struct ConsoleSink<W> {
    writer: Mutex<W>,
}

impl<W> ConsoleSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// 내부 writer를 꺼냅니다.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl ConsoleSink<tokio::io::Stdout> {
    /// 표준 출력 싱크
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

/// 알림 하나를 출력 텍스트로 만듭니다.
pub fn render(alert: &Alert) -> String {
    let mut out = format!("{alert}\n");
    for finding in alert.findings() {
        // String에 대한 write!는 실패하지 않음
        let _ = writeln!(out, "  {finding}");
    }
    out
}

impl<W> AlertSink for ConsoleSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &str {
        SINK_NAME
    }

    async fn emit(&self, alert: &Alert) -> Result<(), SinkError> {
        let text = render(alert);
        let mut writer = self.writer.lock().await;
        let delivery = |e: std::io::Error| SinkError::Delivery {
            sink: SINK_NAME.to_owned(),
            reason: e.to_string(),
        };
        writer.write_all(text.as_bytes()).await.map_err(delivery)?;
        writer.flush().await.map_err(delivery)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use querywatch_core::types::{Finding, Query, Severity};

    use super::*;

    #[tokio::test]
    async fn writes_summary_and_one_line_per_finding() {
        let query = Arc::new(Query::from_sql("SELECT * FROM users WHERE id = 1 OR 1=1").unwrap());
        let alert = Alert::new(
            query,
            vec![
                Finding::new("sql_injection", Severity::Medium, "tautology").with_pattern("tautology"),
                Finding::new("exfiltration", Severity::Low, "sensitive read"),
            ],
        )
        .unwrap();

        let sink = ConsoleSink::new(Vec::new());
        sink.emit(&alert).await.unwrap();
        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = output.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("[Medium] SELECT * FROM users"));
        assert!(lines[0].ends_with("2 finding(s)"));
        assert_eq!(
            lines[1],
            "  [Medium] sql_injection: tautology (pattern: tautology)"
        );
        assert_eq!(lines[2], "  [Low] exfiltration: sensitive read");
    }
}
