//! 订单截图服务 - 业务能力层
//!
//! 只负责"给一张订单详情页截图"，不关心任务调度和重试。

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use tracing::debug;

use crate::browser::{navigate, BrowserResource};
use crate::config::Config;
use crate::error::TaskError;
use crate::models::StoredOrder;
use crate::services::image_trim;

/// 所有订单详情页都有的容器
pub const DETAIL_READY_SELECTOR: &str = "#detail .order_information_wrap";

/// 截图前的页面缩放
const PAGE_ZOOM_JS: &str = "document.body.style.zoom='40%'";

/// 对某种资源执行一次截图
///
/// 成功返回截图文件路径。错误的 `is_fatal()` 决定资源是否需要重建。
#[async_trait]
pub trait OrderCapture<R>: Send + Sync {
    async fn capture(&self, resource: &R, order: &StoredOrder) -> Result<String, TaskError>;
}

/// 用浏览器截图
pub struct ScreenshotService {
    screenshot_dir: PathBuf,
    navigation_timeout: Duration,
    selector_timeout: Duration,
}

impl ScreenshotService {
    pub fn new(config: &Config) -> Self {
        Self {
            screenshot_dir: PathBuf::from(&config.screenshot_dir),
            navigation_timeout: config.navigation_timeout(),
            selector_timeout: Duration::from_secs(20),
        }
    }

    /// `screenshots/{order_id}.png`
    pub fn artifact_path(&self, order_id: &str) -> PathBuf {
        artifact_path(&self.screenshot_dir, order_id)
    }
}

/// 截图文件路径，订单号中的非法文件名字符替换为 `_`
pub fn artifact_path(dir: &Path, order_id: &str) -> PathBuf {
    let file_stem: String = order_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    dir.join(format!("{}.png", file_stem))
}

#[async_trait]
impl OrderCapture<BrowserResource> for ScreenshotService {
    async fn capture(
        &self,
        resource: &BrowserResource,
        order: &StoredOrder,
    ) -> Result<String, TaskError> {
        let order_id = &order.record.order_id;
        let detail_url = order
            .record
            .order_detail_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| TaskError::MissingDetailUrl {
                order_id: order_id.clone(),
            })?;

        let executor = resource.executor();
        let page = executor.page();

        navigate(page, detail_url, self.navigation_timeout)
            .await
            .map_err(|e| TaskError::classify(e.to_string()))?;

        executor
            .eval(PAGE_ZOOM_JS)
            .await
            .map_err(|e| TaskError::classify(e.to_string()))?;

        executor
            .wait_for_selector(DETAIL_READY_SELECTOR, self.selector_timeout)
            .await
            .map_err(|e| TaskError::classify(e.to_string()))?;

        let raw = page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await?;
        debug!("订单 {} 原始截图 {} 字节", order_id, raw.len());

        let processed = image_trim::process_screenshot(&raw)?;

        tokio::fs::create_dir_all(&self.screenshot_dir).await?;
        let path = self.artifact_path(order_id);
        tokio::fs::write(&path, processed).await?;

        Ok(path.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_path_is_sanitized() {
        let dir = Path::new("screenshots");
        assert_eq!(
            artifact_path(dir, "791234567"),
            PathBuf::from("screenshots/791234567.png")
        );
        assert_eq!(
            artifact_path(dir, "../etc/passwd"),
            PathBuf::from("screenshots/___etc_passwd.png")
        );
    }
}
