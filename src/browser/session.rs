//! 浏览器会话
//!
//! 启动（或连接）浏览器，注入 Cookie，按需开页面。

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::{Browser, Page};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::browser::{connection, headless};
use crate::config::Config;
use crate::models::cookie;

/// 一个浏览器进程（或一次调试端口连接）
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    /// 自己启动的浏览器在关闭时结束进程，连接来的只断开
    owned: bool,
    /// 自己启动时的临时用户目录，关闭后删除
    profile_dir: Option<PathBuf>,
    cookie: String,
    cookie_domain: String,
    navigation_timeout: Duration,
}

impl BrowserSession {
    /// 根据配置启动或连接浏览器
    pub async fn open(config: &Config) -> Result<Self> {
        let (browser, handler, profile_dir) = match config.browser_debug_port {
            Some(port) => {
                let (browser, handler) = connection::connect_to_browser(port).await?;
                (browser, handler, None)
            }
            None => {
                let (browser, handler, dir) = headless::launch_headless_browser(config).await?;
                (browser, handler, Some(dir))
            }
        };

        Ok(Self {
            browser,
            handler,
            owned: profile_dir.is_some(),
            profile_dir,
            cookie: config.cookie.clone(),
            cookie_domain: config.cookie_domain.clone(),
            navigation_timeout: config.navigation_timeout(),
        })
    }

    /// 连接模式下为 None
    pub fn profile_dir(&self) -> Option<&Path> {
        self.profile_dir.as_deref()
    }

    /// 新开一个已注入 Cookie 的页面，并导航到 `url`
    pub async fn new_page(&self, url: &str) -> Result<Page> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("创建新页面失败")?;

        let injected = inject_cookies(&page, &self.cookie, &self.cookie_domain).await?;
        debug!("已注入 {} 个 Cookie", injected);

        navigate(&page, url, self.navigation_timeout).await?;
        Ok(page)
    }

    /// 复用已打开的标签页（连接模式下手动登录过的页面），找不到就新开
    pub async fn page_for(&self, url: &str, needle: &str) -> Result<Page> {
        if !self.owned {
            if let Some(page) = connection::find_page_by_url(&self.browser, needle).await? {
                return Ok(page);
            }
        }
        self.new_page(url).await
    }

    /// 关闭浏览器、回收事件循环，并删除自己创建的用户目录
    pub async fn close(mut self) {
        if self.owned {
            if let Err(e) = self.browser.close().await {
                warn!("关闭浏览器失败: {}", e);
            }
            if let Err(e) = self.browser.wait().await {
                debug!("等待浏览器进程退出失败: {}", e);
            }
        }
        self.handler.abort();

        if let Some(dir) = self.profile_dir.take() {
            headless::remove_profile_dir(&dir).await;
        }
    }
}

/// 导航并等待页面加载，超时视为失败
pub async fn navigate(page: &Page, url: &str, limit: Duration) -> Result<()> {
    match timeout(limit, page.goto(url)).await {
        Ok(result) => {
            result.with_context(|| format!("导航到 {} 失败", url))?;
            Ok(())
        }
        Err(_) => Err(anyhow!("导航到 {} 超时 ({}s)", url, limit.as_secs())),
    }
}

/// 把 Cookie 字符串写入浏览器，返回写入的条数
pub async fn inject_cookies(page: &Page, cookie_string: &str, domain: &str) -> Result<usize> {
    let pairs = cookie::parse_cookie_string(cookie_string);
    if pairs.is_empty() {
        return Ok(0);
    }

    let mut params = Vec::with_capacity(pairs.len());
    for pair in &pairs {
        let param = CookieParam::builder()
            .name(pair.name.clone())
            .value(pair.value.clone())
            .domain(domain.to_string())
            .path("/")
            .build()
            .map_err(|e| anyhow!("构造 Cookie {} 失败: {}", pair.name, e))?;
        params.push(param);
    }

    page.set_cookies(params).await.context("注入 Cookie 失败")?;
    info!("🍪 已注入 {} 个 Cookie 到 {}", pairs.len(), domain);
    Ok(pairs.len())
}
