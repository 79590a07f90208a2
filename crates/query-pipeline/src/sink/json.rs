//! JSON lines 싱크 -- 알림 하나를 JSON 한 줄로 씁니다.

use std::path::Path;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use querywatch_core::error::SinkError;
use querywatch_core::pipeline::AlertSink;
use querywatch_core::types::Alert;

const SINK_NAME: &str = "json";

/// JSON lines 싱크
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl JsonLinesSink<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl JsonLinesSink<tokio::fs::File> {
    /// 파일 끝에 이어 쓰는 싱크를 엽니다. 파일이 없으면 생성합니다.
    pub async fn append(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self::new(file))
    }
}

impl<W> AlertSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &str {
        SINK_NAME
    }

    async fn emit(&self, alert: &Alert) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(alert).map_err(|e| SinkError::Delivery {
            sink: SINK_NAME.to_owned(),
            reason: format!("serialization failed: {e}"),
        })?;
        line.push(b'\n');

        let delivery = |e: std::io::Error| SinkError::Delivery {
            sink: SINK_NAME.to_owned(),
            reason: e.to_string(),
        };
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await.map_err(delivery)?;
        writer.flush().await.map_err(delivery)
    }
}
