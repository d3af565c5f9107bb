use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::Config;

/// 截图时的视口尺寸
pub const VIEWPORT_WIDTH: u32 = 1200;
pub const VIEWPORT_HEIGHT: u32 = 1000;

// 每个实例独立的用户目录，避免多个浏览器抢同一个 profile 锁
static PROFILE_SEQ: AtomicUsize = AtomicUsize::new(0);

fn next_profile_dir() -> PathBuf {
    let seq = PROFILE_SEQ.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!(
        "order_collector-{}-{}",
        std::process::id(),
        seq
    ))
}

/// 删除浏览器用户目录，目录不存在视为成功
///
/// 必须在浏览器进程退出后调用，否则 Chromium 可能还在写文件。
pub async fn remove_profile_dir(dir: &Path) -> bool {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            debug!("已删除浏览器用户目录: {}", dir.display());
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!("删除浏览器用户目录 {} 失败: {}", dir.display(), e);
            false
        }
    }
}

/// 启动一个新的浏览器实例
///
/// 返回浏览器、后台事件循环的句柄和本实例的用户目录。
/// 关闭浏览器后应一并回收句柄并删除目录。
pub async fn launch_headless_browser(
    config: &Config,
) -> Result<(Browser, JoinHandle<()>, PathBuf)> {
    info!("🚀 启动浏览器 (headless: {})...", config.headless);

    let profile_dir = next_profile_dir();
    let mut builder = BrowserConfig::builder()
        .no_sandbox()
        .user_data_dir(&profile_dir)
        .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
        .viewport(Viewport {
            width: VIEWPORT_WIDTH,
            height: VIEWPORT_HEIGHT,
            ..Default::default()
        })
        .request_timeout(config.navigation_timeout())
        .args(vec![
            "--disable-gpu",           // 无头模式下禁用 GPU
            "--disable-dev-shm-usage", // 防止共享内存不足
            "--mute-audio",
        ]);

    if config.headless {
        builder = builder.new_headless_mode();
    } else {
        builder = builder.with_head();
    }
    if let Some(path) = &config.chrome_executable {
        builder = builder.chrome_executable(path);
    }

    let browser_config = builder.build().map_err(|e| {
        error!("配置浏览器失败: {}", e);
        anyhow::anyhow!("配置浏览器失败: {}", e)
    })?;

    let (browser, mut handler) = match Browser::launch(browser_config).await {
        Ok(launched) => launched,
        Err(e) => {
            error!("启动浏览器失败: {}", e);
            remove_profile_dir(&profile_dir).await;
            return Err(anyhow::anyhow!("启动浏览器失败: {}", e));
        }
    };
    debug!("浏览器启动成功");

    // 在后台处理浏览器事件
    let handle = tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 等待浏览器状态同步
    sleep(tokio::time::Duration::from_millis(300)).await;

    Ok((browser, handle, profile_dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_dirs_are_unique() {
        assert_ne!(next_profile_dir(), next_profile_dir());
    }

    #[tokio::test]
    async fn test_remove_profile_dir_deletes_whole_tree() {
        let dir = next_profile_dir();
        tokio::fs::create_dir_all(dir.join("Default/Cache")).await.unwrap();
        tokio::fs::write(dir.join("Default/Cookies"), b"x").await.unwrap();

        assert!(remove_profile_dir(&dir).await);
        assert!(!dir.exists());
        // 重复删除不报错
        assert!(remove_profile_dir(&dir).await);
    }
}
