//! mpsc 채널 싱크 -- 알림을 다른 태스크로 넘깁니다.

use std::sync::Arc;

use tokio::sync::mpsc;

use querywatch_core::error::SinkError;
use querywatch_core::pipeline::AlertSink;
use querywatch_core::types::Alert;

/// 채널 싱크
///
/// 채널이 가득 차면 수신자가 비울 때까지 기다립니다.
pub struct ChannelSink {
    name: String,
    tx: mpsc::Sender<Arc<Alert>>,
}

impl ChannelSink {
    pub fn new(name: impl Into<String>, tx: mpsc::Sender<Arc<Alert>>) -> Self {
        Self {
            name: name.into(),
            tx,
        }
    }

    /// 채널을 만들어 싱크와 수신자를 함께 반환합니다.
    pub fn channel(
        name: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Arc<Alert>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(name, tx), rx)
    }
}

impl AlertSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn emit(&self, alert: &Alert) -> Result<(), SinkError> {
        self.tx
            .send(Arc::new(alert.clone()))
            .await
            .map_err(|_| SinkError::Closed {
                sink: self.name.clone(),
            })
    }
}
