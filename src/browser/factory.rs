//! 浏览器实例工厂
//!
//! 资源池里的每个资源是一个独立的浏览器进程加一个已注入 Cookie 的页面。

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::browser::BrowserSession;
use crate::config::Config;
use crate::error::PoolError;
use crate::infrastructure::{JsExecutor, ResourceFactory};

/// 池中的一个浏览器实例
pub struct BrowserResource {
    session: BrowserSession,
    executor: JsExecutor,
}

impl BrowserResource {
    pub fn executor(&self) -> &JsExecutor {
        &self.executor
    }
}

/// 按配置启动浏览器的工厂
pub struct BrowserFactory {
    config: Config,
}

impl BrowserFactory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ResourceFactory for BrowserFactory {
    type Resource = BrowserResource;

    async fn create(&self) -> Result<BrowserResource, PoolError> {
        let session = BrowserSession::open(&self.config)
            .await
            .map_err(|e| PoolError::CreateFailed(e.to_string()))?;

        match session.new_page("about:blank").await {
            Ok(page) => {
                debug!("🌐 新浏览器实例已就绪");
                Ok(BrowserResource {
                    session,
                    executor: JsExecutor::new(page),
                })
            }
            Err(e) => {
                session.close().await;
                Err(PoolError::CreateFailed(e.to_string()))
            }
        }
    }

    async fn destroy(&self, resource: BrowserResource) {
        let BrowserResource { session, executor } = resource;
        if let Err(e) = executor.page().clone().close().await {
            warn!("关闭页面失败: {}", e);
        }
        session.close().await;
    }
}
