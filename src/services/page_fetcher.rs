//! 页面抓取服务 - 业务能力层
//!
//! 只负责"拿到一页订单"的能力：
//! - 并发上限（Semaphore，许可随作用域自动归还）
//! - 单次请求超时
//! - 瞬时错误重试
//! - 成功后的随机礼貌等待（期间仍占用许可）
//!
//! 请求到底从哪里发出（HTTP 客户端、浏览器内 fetch）由 `PageTransport` 决定。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::FetchError;
use crate::models::OrderRecord;
use crate::services::order_parser::parse_page_body;

/// 分页游标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    /// 页码，从 1 开始
    pub page_no: u32,
    /// 锚定订单号（第一页的第一条订单），第二页起必须携带
    pub anchor: Option<String>,
}

impl PageCursor {
    pub fn first() -> Self {
        Self {
            page_no: 1,
            anchor: None,
        }
    }

    pub fn anchored(page_no: u32, anchor: impl Into<String>) -> Self {
        Self {
            page_no,
            anchor: Some(anchor.into()),
        }
    }
}

/// 一次网络调用：给定游标，返回原始响应体
#[async_trait]
pub trait PageTransport: Send + Sync {
    async fn fetch(&self, cursor: &PageCursor) -> Result<Vec<u8>, FetchError>;
}

#[async_trait]
impl<T: PageTransport + ?Sized> PageTransport for Arc<T> {
    async fn fetch(&self, cursor: &PageCursor) -> Result<Vec<u8>, FetchError> {
        (**self).fetch(cursor).await
    }
}

/// 界面驱动的翻页：每次"加载更多"之后拿到下一页的原始响应体
///
/// 下一页依赖上一页的界面状态，只能串行调用。
#[async_trait]
pub trait PageAdvancer: Send {
    /// 打开列表页，返回第一页
    async fn first_page(&mut self) -> Result<Vec<u8>, FetchError>;

    /// 触发下一页；在 `timeout` 内没有新数据时返回 `Ok(None)`
    async fn advance(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, FetchError>;
}

/// 抓取策略
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub concurrency: usize,
    /// 每页最多尝试次数（含第一次）
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    pub polite_min: Duration,
    pub polite_max: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            concurrency: 6,
            retry_count: 3,
            retry_delay: Duration::from_secs(3),
            request_timeout: Duration::from_secs(40),
            polite_min: Duration::from_secs(1),
            polite_max: Duration::from_secs(3),
        }
    }
}

impl FetchPolicy {
    pub fn from_config(config: &Config) -> Self {
        let (polite_min, polite_max) = config.polite_wait();
        Self {
            concurrency: config.concurrent_requests.max(1),
            retry_count: config.retry_count.max(1),
            retry_delay: config.retry_delay(),
            request_timeout: config.request_timeout(),
            polite_min,
            polite_max,
        }
    }
}

/// 页面抓取器
pub struct PageFetcher<T> {
    transport: T,
    semaphore: Arc<Semaphore>,
    policy: FetchPolicy,
}

impl<T: PageTransport> PageFetcher<T> {
    pub fn new(transport: T, policy: FetchPolicy) -> Self {
        Self {
            transport,
            semaphore: Arc::new(Semaphore::new(policy.concurrency.max(1))),
            policy,
        }
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// 抓取并解析一页
    ///
    /// 返回空列表表示已经没有更多数据，不是错误。
    pub async fn fetch_page(&self, cursor: &PageCursor) -> Result<Vec<OrderRecord>, FetchError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| FetchError::Connection {
                message: "抓取信号量已关闭".to_string(),
            })?;

        let max_attempts = self.policy.retry_count.max(1);
        let mut attempt = 1;
        loop {
            if attempt > 1 {
                debug!(
                    "[第 {} 页] 第 {}/{} 次尝试",
                    cursor.page_no, attempt, max_attempts
                );
            }

            match self.attempt(cursor).await {
                Ok(records) => {
                    self.polite_wait().await;
                    return Ok(records);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        "[第 {} 页] ⚠️ 网络错误 (尝试 {}/{}): {}",
                        cursor.page_no, attempt, max_attempts, e
                    );
                    sleep(self.policy.retry_delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    error!("[第 {} 页] ❌ 多次重试后仍失败: {}", cursor.page_no, e);
                    return Err(e);
                }
                Err(e) => {
                    error!("[第 {} 页] ❌ 处理时遇到结构性错误: {}", cursor.page_no, e);
                    return Err(e);
                }
            }
        }
    }

    async fn attempt(&self, cursor: &PageCursor) -> Result<Vec<OrderRecord>, FetchError> {
        let body = match timeout(self.policy.request_timeout, self.transport.fetch(cursor)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FetchError::Timeout {
                    message: format!(
                        "第 {} 页超过 {}s 未响应",
                        cursor.page_no,
                        self.policy.request_timeout.as_secs()
                    ),
                })
            }
        };
        parse_page_body(&body)
    }

    async fn polite_wait(&self) {
        let delay = random_between(self.policy.polite_min, self.policy.polite_max);
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}

fn random_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let secs = rand::rng().random_range(min.as_secs_f64()..=max.as_secs_f64());
    Duration::from_secs_f64(secs)
}
