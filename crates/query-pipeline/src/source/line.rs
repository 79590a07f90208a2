//! 줄 단위 레코드 소스 (파일, 표준 입력)
//!
//! 한 줄을 하나의 [`RawRecord`]로 냅니다. 줄바꿈(`\n`, `\r\n`)은 제거하고
//! 빈 줄은 건너뜁니다. UTF-8 검증은 파서가 담당하므로 바이트 그대로 전달합니다.

use std::path::Path;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use querywatch_core::error::SourceError;

use super::{QuerySource, RawRecord, SourceItem};
use crate::parser::RecordFormat;

/// 파일/표준 입력 공용 리더 타입
pub type BoxedReader = Box<dyn AsyncBufRead + Unpin + Send>;

/// 줄 단위 소스
pub struct LineSource<R> {
    name: String,
    reader: R,
    format: RecordFormat,
    /// 읽는 중인 줄 (취소되어도 이어서 읽을 수 있도록 필드에 보관)
    buf: Vec<u8>,
    line_no: usize,
}

impl<R> LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    /// 임의의 리더로 소스를 생성합니다.
    pub fn new(name: impl Into<String>, reader: R, format: RecordFormat) -> Self {
        Self {
            name: name.into(),
            reader,
            format,
            buf: Vec::new(),
            line_no: 0,
        }
    }

    /// 지금까지 읽은 줄 수 (빈 줄 포함)
    pub fn lines_read(&self) -> usize {
        self.line_no
    }
}

impl LineSource<BoxedReader> {
    /// 파일을 열어 소스를 생성합니다.
    pub async fn open(path: impl AsRef<Path>, format: RecordFormat) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let name = format!("file:{}", path.display());
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| SourceError::Read {
                source_name: name.clone(),
                reason: format!("failed to open: {e}"),
            })?;
        Ok(Self::new(name, Box::new(BufReader::new(file)), format))
    }

    /// 표준 입력에서 읽는 소스를 생성합니다.
    pub fn stdin(format: RecordFormat) -> Self {
        Self::new(
            "stdin",
            Box::new(BufReader::new(tokio::io::stdin())),
            format,
        )
    }
}

impl<R> QuerySource for LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_item(&mut self) -> Result<Option<SourceItem>, SourceError> {
        loop {
            let read = match self.reader.read_until(b'\n', &mut self.buf).await {
                Ok(read) => read,
                Err(e) => {
                    self.buf.clear();
                    return Err(SourceError::Read {
                        source_name: self.name.clone(),
                        reason: e.to_string(),
                    });
                }
            };
            if read == 0 && self.buf.is_empty() {
                return Ok(None);
            }

            self.line_no += 1;
            let mut line = std::mem::take(&mut self.buf);
            while matches!(line.last(), Some(b'\n' | b'\r')) {
                line.pop();
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Ok(Some(SourceItem::Raw(RawRecord::new(
                line,
                self.name.clone(),
                self.format,
            ))));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    async fn collect<R: AsyncBufRead + Unpin + Send>(source: &mut LineSource<R>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(item) = source.next_item().await.unwrap() {
            match item {
                SourceItem::Raw(raw) => lines.push(String::from_utf8_lossy(&raw.data).into_owned()),
                SourceItem::Query(_) => panic!("line source yields raw records"),
            }
        }
        lines
    }

    #[tokio::test]
    async fn splits_lines_and_skips_blanks() {
        let input: &[u8] = b"first\r\n\n   \nsecond\nlast-without-newline";
        let mut source = LineSource::new("mem", input, RecordFormat::Audit);
        let lines = collect(&mut source).await;
        assert_eq!(lines, vec!["first", "second", "last-without-newline"]);
        assert_eq!(source.lines_read(), 5);
    }

    #[tokio::test]
    async fn records_carry_format_and_source() {
        let input: &[u8] = b"AUDIT: SESSION,1,1,READ,SELECT,,,SELECT 1\n";
        let mut source = LineSource::new("mem", input, RecordFormat::Audit);
        match source.next_item().await.unwrap().unwrap() {
            SourceItem::Raw(raw) => {
                assert_eq!(raw.format, RecordFormat::Audit);
                assert_eq!(raw.source, "mem");
            }
            SourceItem::Query(_) => panic!("expected raw record"),
        }
    }

    #[tokio::test]
    async fn invalid_utf8_is_passed_through() {
        let input: &[u8] = b"\xff\xfe\n";
        let mut source = LineSource::new("mem", input, RecordFormat::LogLine);
        match source.next_item().await.unwrap().unwrap() {
            SourceItem::Raw(raw) => assert_eq!(&raw.data[..], b"\xff\xfe"),
            SourceItem::Query(_) => panic!("expected raw record"),
        }
    }

    #[tokio::test]
    async fn open_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "line one").unwrap();
        writeln!(file, "line two").unwrap();

        let mut source = LineSource::open(file.path(), RecordFormat::LogLine)
            .await
            .unwrap();
        assert!(source.name().starts_with("file:"));
        assert_eq!(collect(&mut source).await, vec!["line one", "line two"]);
    }

    #[tokio::test]
    async fn open_missing_file_fails() {
        let result = LineSource::open("/nonexistent/querywatch.log", RecordFormat::LogLine).await;
        assert!(matches!(result, Err(SourceError::Read { .. })));
    }
}
