//! 截图处理流程 - 流程层
//!
//! 核心职责：定义"一条订单"的完整截图流程
//!
//! 流程顺序：
//! 1. 检查详情页地址，没有则直接失败
//! 2. 从资源池借出浏览器（带超时）
//! 3. 截图，按结果归还资源（成功计数 / 普通失败 / 致命错误重建）
//! 4. 失败则等待后重试，超过次数记为失败

use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::PoolError;
use crate::infrastructure::{ReleaseOutcome, ResourceFactory, ResourcePool};
use crate::models::{StoredOrder, TaskOutcome};
use crate::services::OrderCapture;
use crate::workflow::task_ctx::TaskCtx;

/// 重试策略
#[derive(Debug, Clone)]
pub struct FlowPolicy {
    /// 每条订单最多尝试次数
    pub retries: u32,
    pub retry_delay: Duration,
    pub acquire_timeout: Duration,
}

impl FlowPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retries: config.screenshot_retries.max(1),
            retry_delay: config.screenshot_retry_delay(),
            acquire_timeout: config.acquire_timeout(),
        }
    }
}

/// 截图处理流程
///
/// - 持有资源池和截图能力
/// - 决定何时重试、何时放弃、何时重建资源
/// - 不访问数据库，结果交给调用方写回
pub struct ScreenshotFlow<F: ResourceFactory, C> {
    pool: ResourcePool<F>,
    capture: C,
    policy: FlowPolicy,
}

impl<F, C> ScreenshotFlow<F, C>
where
    F: ResourceFactory,
    C: OrderCapture<F::Resource>,
{
    pub fn new(pool: ResourcePool<F>, capture: C, policy: FlowPolicy) -> Self {
        Self {
            pool,
            capture,
            policy,
        }
    }

    pub fn pool(&self) -> &ResourcePool<F> {
        &self.pool
    }

    /// 处理一条订单，永远返回终态结果
    pub async fn run(&self, order: &StoredOrder, ctx: &TaskCtx) -> TaskOutcome {
        let has_url = order
            .record
            .order_detail_url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty());
        if !has_url {
            warn!("{} ⚠️ 缺少详情页地址，跳过", ctx);
            return TaskOutcome::Failed {
                reason: "缺少详情页地址".to_string(),
            };
        }

        let retries = self.policy.retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=retries {
            if attempt > 1 {
                info!("{} 🔄 第 {}/{} 次尝试", ctx, attempt, retries);
            }

            let lease = match self.pool.acquire(self.policy.acquire_timeout).await {
                Ok(lease) => lease,
                Err(PoolError::Closed) => {
                    error!("{} ❌ 资源池已关闭", ctx);
                    return TaskOutcome::Failed {
                        reason: PoolError::Closed.to_string(),
                    };
                }
                Err(e) => {
                    warn!("{} ⚠️ 获取浏览器失败: {}", ctx, e);
                    last_error = e.to_string();
                    self.backoff(attempt, retries).await;
                    continue;
                }
            };

            match self.capture.capture(lease.resource(), order).await {
                Ok(path) => {
                    self.pool.release(lease, ReleaseOutcome::Success).await;
                    info!("{} ✅ 截图成功: {}", ctx, path);
                    return TaskOutcome::Completed {
                        artifact_path: path,
                    };
                }
                Err(e) => {
                    let release = if e.is_fatal() {
                        ReleaseOutcome::Fatal
                    } else {
                        ReleaseOutcome::Failure
                    };
                    self.pool.release(lease, release).await;

                    if !e.is_retryable() {
                        error!("{} ❌ 无法截图: {}", ctx, e);
                        return TaskOutcome::Failed {
                            reason: e.to_string(),
                        };
                    }

                    if e.is_fatal() {
                        warn!("{} 💥 浏览器异常，已重建: {}", ctx, e);
                    } else {
                        warn!("{} ⚠️ 截图失败 ({}/{}): {}", ctx, attempt, retries, e);
                    }
                    last_error = e.to_string();
                    self.backoff(attempt, retries).await;
                }
            }
        }

        error!("{} ❌ 超过最大重试次数，任务失败", ctx);
        TaskOutcome::Failed {
            reason: format!("超过最大重试次数: {}", last_error),
        }
    }

    async fn backoff(&self, attempt: u32, retries: u32) {
        if attempt < retries && !self.policy.retry_delay.is_zero() {
            tokio::time::sleep(self.policy.retry_delay).await;
        }
    }
}
