//! 수동 주입 소스

use std::collections::VecDeque;

use querywatch_core::error::SourceError;

use super::{QuerySource, SourceItem};

/// 미리 준비한 항목을 순서대로 내는 소스
///
/// 실패를 흉내 내야 하는 테스트를 위해 에러도 넣을 수 있습니다.
#[derive(Debug, Default)]
pub struct ManualSource {
    items: VecDeque<Result<SourceItem, SourceError>>,
}

impl ManualSource {
    /// 빈 소스를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 항목 목록으로 소스를 생성합니다.
    pub fn from_items<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<SourceItem>,
    {
        Self {
            items: items.into_iter().map(|item| Ok(item.into())).collect(),
        }
    }

    /// 항목을 끝에 추가합니다.
    pub fn push(&mut self, item: impl Into<SourceItem>) {
        self.items.push_back(Ok(item.into()));
    }

    /// 읽기 실패를 끝에 추가합니다.
    pub fn push_error(&mut self, error: SourceError) {
        self.items.push_back(Err(error));
    }

    /// 남은 항목 수
    pub fn remaining(&self) -> usize {
        self.items.len()
    }
}

impl QuerySource for ManualSource {
    fn name(&self) -> &str {
        "manual"
    }

    async fn next_item(&mut self) -> Result<Option<SourceItem>, SourceError> {
        self.items.pop_front().transpose()
    }
}
