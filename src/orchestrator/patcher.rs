//! 截图补拍 - 编排层
//!
//! 已完成的订单如果截图文件不见了（被清理、换了机器），重新截图并改写路径。
//! 订单状态始终保持 completed，补拍失败只记日志，下次再试。

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::AppResult;
use crate::infrastructure::{OrderStore, ResourceFactory};
use crate::models::{StoredOrder, TaskOutcome};
use crate::services::OrderCapture;
use crate::utils::truncate_text;
use crate::workflow::{ScreenshotFlow, TaskCtx};

/// 补拍统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    /// 检查过的已完成订单
    pub checked: u64,
    /// 截图文件缺失的订单
    pub missing: u64,
    pub patched: u64,
    pub failed: u64,
    /// 中断后未处理
    pub skipped: u64,
}

enum PatchOutcome {
    Patched,
    Failed,
    Skipped,
}

/// 截图补拍
pub struct Patcher {
    concurrency: usize,
}

impl Patcher {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// 找出缺图的已完成订单并重新截图，结束后关闭资源池
    pub async fn run<F, C>(
        &self,
        store: &OrderStore,
        flow: Arc<ScreenshotFlow<F, C>>,
        cancel: &CancellationToken,
    ) -> AppResult<PatchReport>
    where
        F: ResourceFactory,
        C: OrderCapture<F::Resource>,
    {
        let completed = store.list_completed().await?;
        let mut report = PatchReport {
            checked: completed.len() as u64,
            ..PatchReport::default()
        };

        let mut missing = Vec::new();
        for order in completed {
            if !artifact_exists(order.artifact_path.as_deref()).await {
                missing.push(order);
            }
        }
        report.missing = missing.len() as u64;
        info!(
            "🔍 已完成 {} 条，其中 {} 条缺少截图",
            report.checked, report.missing
        );

        let concurrency = self.concurrency;
        let flow_ref = flow.as_ref();
        let outcomes: Vec<PatchOutcome> = stream::iter(missing.into_iter().enumerate())
            .map(|(index, order)| async move {
                let worker_id = index % concurrency + 1;
                patch_one(worker_id, store, flow_ref, &order, cancel).await
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                PatchOutcome::Patched => report.patched += 1,
                PatchOutcome::Failed => report.failed += 1,
                PatchOutcome::Skipped => report.skipped += 1,
            }
        }

        flow.pool().close().await;
        Ok(report)
    }
}

async fn patch_one<F, C>(
    worker_id: usize,
    store: &OrderStore,
    flow: &ScreenshotFlow<F, C>,
    order: &StoredOrder,
    cancel: &CancellationToken,
) -> PatchOutcome
where
    F: ResourceFactory,
    C: OrderCapture<F::Resource>,
{
    if cancel.is_cancelled() {
        return PatchOutcome::Skipped;
    }

    let ctx = TaskCtx::new(worker_id, order.id, order.record.order_id.as_str());
    info!("{} 🩹 补拍截图", ctx);

    match flow.run(order, &ctx).await {
        TaskOutcome::Completed { artifact_path } => {
            match store.update_artifact_path(order.id, &artifact_path).await {
                Ok(true) => PatchOutcome::Patched,
                Ok(false) => {
                    warn!("{} 订单已不是 completed，丢弃新截图", ctx);
                    PatchOutcome::Failed
                }
                Err(e) => {
                    error!("[DB Error] {} 写入截图路径失败: {}", ctx, e);
                    PatchOutcome::Failed
                }
            }
        }
        TaskOutcome::Failed { reason } => {
            warn!("{} ❌ 补拍失败: {}", ctx, truncate_text(&reason, 120));
            PatchOutcome::Failed
        }
    }
}

/// 路径为空或文件不存在都算缺图
async fn artifact_exists(path: Option<&str>) -> bool {
    match path.map(str::trim) {
        Some(p) if !p.is_empty() => tokio::fs::try_exists(p).await.unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_artifact_exists() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("A1.png");
        tokio::fs::write(&file, b"png").await.unwrap();

        assert!(artifact_exists(file.to_str()).await);
        assert!(!artifact_exists(dir.path().join("A2.png").to_str()).await);
        assert!(!artifact_exists(Some("  ")).await);
        assert!(!artifact_exists(None).await);
    }
}
