//! 失败页记录服务 - 业务能力层
//!
//! 只负责"把放弃的页码追加到文件"，方便之后单独补抓

use std::path::PathBuf;

use anyhow::Result;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::services::PageCursor;

/// 失败页记录
pub struct FailedPageLog {
    path: PathBuf,
}

impl FailedPageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 追加一行：时间 | 页码 | 锚定订单 | 原因
    pub async fn record(&self, cursor: &PageCursor, reason: &str) -> Result<()> {
        debug!("记录失败页: 第 {} 页 | {}", cursor.page_no, reason);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let line = format!(
            "{} | 第 {} 页 | 锚定订单 {} | {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            cursor.page_no,
            cursor.anchor.as_deref().unwrap_or("-"),
            reason.replace('\n', " ")
        );
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_record_appends_lines() {
        let dir = tempdir().unwrap();
        let log = FailedPageLog::new(dir.path().join("failed_pages.txt"));

        log.record(&PageCursor::anchored(5, "A1"), "HTTP 状态码 503")
            .await
            .unwrap();
        log.record(&PageCursor::anchored(9, "A1"), "请求超时\n第 9 页")
            .await
            .unwrap();

        let content = std::fs::read_to_string(dir.path().join("failed_pages.txt")).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("第 5 页"));
        assert!(lines[1].contains("请求超时 第 9 页"));
    }
}
