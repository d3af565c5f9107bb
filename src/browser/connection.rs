use anyhow::Result;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

/// 连接到已经打开调试端口的浏览器
///
/// 用于复用手动登录过的浏览器，登录状态直接可用。
pub async fn connect_to_browser(port: u16) -> Result<(Browser, JoinHandle<()>)> {
    let browser_url = format!("http://localhost:{}", port);
    info!("正在连接到浏览器: {}", browser_url);

    let (browser, mut handler) = Browser::connect(&browser_url).await.map_err(|e| {
        error!("连接浏览器失败: {}", e);
        e
    })?;
    debug!("浏览器连接成功");

    // 在后台处理浏览器事件
    let handle = tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 添加短暂延迟以等待浏览器状态同步
    sleep(tokio::time::Duration::from_millis(300)).await;

    Ok((browser, handle))
}

/// 在已有标签页中查找 URL 包含 `needle` 的页面
pub async fn find_page_by_url(browser: &Browser, needle: &str) -> Result<Option<Page>> {
    let pages = browser.pages().await?;
    debug!("获取到 {} 个页面", pages.len());

    for p in pages {
        if let Ok(Some(url)) = p.url().await {
            debug!("检查页面: {}", url);
            if url.contains(needle) {
                info!("✓ 找到目标页面: {}", url);
                return Ok(Some(p));
            }
        }
    }
    Ok(None)
}
