//! mpsc 채널 소스
//!
//! 다른 태스크(예: 외부 수집기)가 `mpsc::Sender<SourceItem>`로 항목을 밀어 넣습니다.
//! 모든 송신자가 닫히면 입력이 끝난 것으로 봅니다.

use tokio::sync::mpsc;

use querywatch_core::error::SourceError;

use super::{QuerySource, SourceItem};

/// 채널 기반 소스
pub struct ChannelSource {
    name: String,
    rx: mpsc::Receiver<SourceItem>,
}

impl ChannelSource {
    /// 수신자로 소스를 생성합니다.
    pub fn new(name: impl Into<String>, rx: mpsc::Receiver<SourceItem>) -> Self {
        Self {
            name: name.into(),
            rx,
        }
    }

    /// 채널을 만들어 송신자와 소스를 함께 반환합니다.
    pub fn channel(name: impl Into<String>, capacity: usize) -> (mpsc::Sender<SourceItem>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(name, rx))
    }
}

impl QuerySource for ChannelSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_item(&mut self) -> Result<Option<SourceItem>, SourceError> {
        // mpsc::Receiver::recv는 cancel-safe
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use querywatch_core::types::Query;

    use super::*;

    #[tokio::test]
    async fn ends_when_all_senders_drop() {
        let (tx, mut source) = ChannelSource::channel("events", 4);
        tx.send(Query::from_sql("SELECT 1").unwrap().into())
            .await
            .unwrap();
        drop(tx);

        assert_eq!(source.name(), "events");
        assert!(source.next_item().await.unwrap().is_some());
        assert!(source.next_item().await.unwrap().is_none());
    }
}
