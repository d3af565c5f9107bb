//! 截图任务调度器 - 编排层
//!
//! ## 职责
//!
//! 1. 启动固定数量的 worker，每个 worker 循环"领取一条 pending → 截图 → 上报结果"
//! 2. 结果通过 channel 交给唯一的写回任务，由它调用 `update_status`
//! 3. 队列为空或收到中断后 worker 退出，正在处理的任务会先完成
//! 4. 所有 worker 和写回任务结束后关闭资源池
//!
//! 领取靠数据库事务保证互斥，这里不需要额外的锁。
//! 被领取的任务总会收到一条结果：流程 panic 记为失败，写库失败会重试。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult, StoreError};
use crate::infrastructure::{OrderStore, ResourceFactory};
use crate::models::{ProcessingStatus, TaskOutcome};
use crate::services::OrderCapture;
use crate::utils::truncate_text;
use crate::workflow::{ScreenshotFlow, TaskCtx};

/// 写回失败时最多尝试次数
const WRITE_BACK_ATTEMPTS: u32 = 3;
const WRITE_BACK_RETRY_DELAY: Duration = Duration::from_millis(200);

/// 调度结果统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// 被领取的任务数
    pub claimed: u64,
    pub completed: u64,
    pub failed: u64,
}

/// worker 上报给写回任务的消息
struct StatusUpdate {
    task_id: i64,
    order_id: String,
    outcome: TaskOutcome,
}

/// 截图任务调度器
pub struct Dispatcher {
    worker_count: usize,
}

impl Dispatcher {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
        }
    }

    /// 处理队列中所有 pending 任务
    pub async fn run<F, C>(
        &self,
        store: &OrderStore,
        flow: Arc<ScreenshotFlow<F, C>>,
        cancel: CancellationToken,
    ) -> AppResult<DispatchReport>
    where
        F: ResourceFactory,
        C: OrderCapture<F::Resource> + 'static,
    {
        info!("🚀 启动 {} 个截图 worker", self.worker_count);

        let (tx, rx) = mpsc::channel::<StatusUpdate>(self.worker_count * 2);
        let writer = tokio::spawn(write_back(store.clone(), rx));

        let mut worker_handles = Vec::with_capacity(self.worker_count);
        for worker_id in 1..=self.worker_count {
            let handle = tokio::spawn(worker_loop(
                worker_id,
                store.clone(),
                Arc::clone(&flow),
                tx.clone(),
                cancel.clone(),
            ));
            worker_handles.push((worker_id, handle));
        }
        // 只有 worker 持有发送端，全部退出后写回任务自然结束
        drop(tx);

        let mut claimed = 0;
        for (worker_id, handle) in worker_handles {
            match handle.await {
                Ok(count) => claimed += count,
                Err(e) => error!("[Worker-{}] ❌ 异常退出: {}", worker_id, e),
            }
        }

        let mut report = writer
            .await
            .map_err(|e| AppError::Other(format!("写回任务异常退出: {}", e)))?;
        report.claimed = claimed;

        flow.pool().close().await;
        Ok(report)
    }
}

async fn worker_loop<F, C>(
    worker_id: usize,
    store: OrderStore,
    flow: Arc<ScreenshotFlow<F, C>>,
    tx: mpsc::Sender<StatusUpdate>,
    cancel: CancellationToken,
) -> u64
where
    F: ResourceFactory,
    C: OrderCapture<F::Resource>,
{
    let mut claimed = 0;
    loop {
        if cancel.is_cancelled() {
            info!("[Worker-{}] 收到中断信号，停止领取任务", worker_id);
            break;
        }

        let Some(order) = store.claim_one_pending().await else {
            info!("[Worker-{}] 队列已空，退出", worker_id);
            break;
        };
        claimed += 1;

        let ctx = TaskCtx::new(worker_id, order.id, order.record.order_id.as_str());
        info!("{} 📸 开始截图", ctx);
        let outcome = match AssertUnwindSafe(flow.run(&order, &ctx)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("{} 💥 截图流程 panic", ctx);
                TaskOutcome::Failed {
                    reason: "截图流程 panic".to_string(),
                }
            }
        };
        if let TaskOutcome::Failed { reason } = &outcome {
            warn!("{} 任务失败: {}", ctx, truncate_text(reason, 120));
        }

        let update = StatusUpdate {
            task_id: order.id,
            order_id: order.record.order_id.clone(),
            outcome,
        };
        if tx.send(update).await.is_err() {
            error!("{} ❌ 写回通道已关闭", ctx);
            break;
        }
    }
    claimed
}

/// 唯一的写回任务
async fn write_back(store: OrderStore, mut rx: mpsc::Receiver<StatusUpdate>) -> DispatchReport {
    let mut report = DispatchReport::default();

    while let Some(update) = rx.recv().await {
        match finalize_with_retry(&store, update.task_id, &update.outcome).await {
            Ok(true) => match update.outcome.status() {
                ProcessingStatus::Completed => report.completed += 1,
                _ => report.failed += 1,
            },
            Ok(false) => warn!(
                "任务#{} (订单 {}) 不在 running 状态，忽略结果",
                update.task_id, update.order_id
            ),
            Err(e) => error!(
                "[DB Error] 任务#{} (订单 {}) 写回失败，已放弃: {}",
                update.task_id, update.order_id, e
            ),
        }
    }
    report
}

/// 写入终态，数据库出错时间隔递增重试
async fn finalize_with_retry(
    store: &OrderStore,
    task_id: i64,
    outcome: &TaskOutcome,
) -> Result<bool, StoreError> {
    let mut attempt = 1;
    loop {
        match store.update_status(task_id, outcome).await {
            Ok(updated) => return Ok(updated),
            Err(e) if attempt < WRITE_BACK_ATTEMPTS => {
                warn!(
                    "[DB Error] 任务#{} 写回失败 ({}/{}): {}",
                    task_id, attempt, WRITE_BACK_ATTEMPTS, e
                );
                tokio::time::sleep(WRITE_BACK_RETRY_DELAY * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
