//! 补拍阶段：只处理截图文件丢失的已完成订单

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use order_collector::error::{PoolError, TaskError};
use order_collector::infrastructure::{OrderStore, ResourceFactory, ResourcePool};
use order_collector::models::{OrderRecord, ProcessingStatus, StoredOrder};
use order_collector::orchestrator::{Dispatcher, PatchReport, Patcher};
use order_collector::services::OrderCapture;
use order_collector::workflow::{FlowPolicy, ScreenshotFlow};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CountingFactory(AtomicU32);

#[async_trait]
impl ResourceFactory for CountingFactory {
    type Resource = u32;

    async fn create(&self) -> Result<u32, PoolError> {
        Ok(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn destroy(&self, _resource: u32) {}
}

/// 把截图写成 `{dir}/{order_id}-{round}.png`；`failing` 里的订单一直失败
struct FileCapture {
    dir: PathBuf,
    round: u32,
    failing: Vec<String>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FileCapture {
    fn new(dir: &Path, round: u32, failing: &[&str]) -> Self {
        Self {
            dir: dir.to_path_buf(),
            round,
            failing: failing.iter().map(|s| s.to_string()).collect(),
            calls: Arc::default(),
        }
    }
}

#[async_trait]
impl OrderCapture<u32> for FileCapture {
    async fn capture(&self, _resource: &u32, order: &StoredOrder) -> Result<String, TaskError> {
        let order_id = &order.record.order_id;
        self.calls.lock().unwrap().push(order_id.clone());
        if self.failing.contains(order_id) {
            return Err(TaskError::Transient("元素未找到".into()));
        }

        let path = self.dir.join(format!("{}-{}.png", order_id, self.round));
        tokio::fs::write(&path, b"png").await?;
        Ok(path.to_string_lossy().into_owned())
    }
}

fn flow(capture: FileCapture) -> Arc<ScreenshotFlow<CountingFactory, FileCapture>> {
    Arc::new(ScreenshotFlow::new(
        ResourcePool::new(CountingFactory::default(), 2, 50),
        capture,
        FlowPolicy {
            retries: 2,
            retry_delay: Duration::ZERO,
            acquire_timeout: Duration::from_secs(5),
        },
    ))
}

fn record(order_id: &str) -> OrderRecord {
    OrderRecord {
        order_detail_url: Some(format!("https://weidian.com/detail?oid={}", order_id)),
        ..OrderRecord::new(order_id)
    }
}

/// 四条订单截图一轮：A1 A2 A3 完成，BAD4 失败
async fn screenshot_round(dir: &tempfile::TempDir, shots: &Path) -> OrderStore {
    let store = OrderStore::connect(dir.path().join("tasks.db")).await.unwrap();
    store.initialize().await.unwrap();
    store
        .insert_many(&[record("A1"), record("A2"), record("A3"), record("BAD4")])
        .await
        .unwrap();

    let report = Dispatcher::new(2)
        .run(&store, flow(FileCapture::new(shots, 1, &["BAD4"])), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.completed, 3);
    assert_eq!(report.failed, 1);
    store
}

async fn find(store: &OrderStore, order_id: &str) -> StoredOrder {
    for id in 1..=4 {
        if let Some(order) = store.get(id).await.unwrap() {
            if order.record.order_id == order_id {
                return order;
            }
        }
    }
    panic!("订单 {} 不存在", order_id);
}

#[tokio::test]
async fn test_patch_recaptures_only_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    let shots = dir.path().join("shots");
    tokio::fs::create_dir_all(&shots).await.unwrap();
    let store = screenshot_round(&dir, &shots).await;

    // A2 和 A3 的截图丢了，A3 补拍时仍然失败
    tokio::fs::remove_file(shots.join("A2-1.png")).await.unwrap();
    tokio::fs::remove_file(shots.join("A3-1.png")).await.unwrap();

    let capture = FileCapture::new(&shots, 2, &["A3"]);
    let calls = Arc::clone(&capture.calls);
    let patch_flow = flow(capture);
    let report = Patcher::new(2)
        .run(&store, Arc::clone(&patch_flow), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        report,
        PatchReport {
            checked: 3,
            missing: 2,
            patched: 1,
            failed: 1,
            skipped: 0,
        }
    );

    let mut calls = calls.lock().unwrap().clone();
    calls.sort();
    assert_eq!(calls, vec!["A2", "A3", "A3"]);
    assert!(patch_flow.pool().is_closed());

    let a1 = find(&store, "A1").await;
    assert!(a1.artifact_path.unwrap().ends_with("A1-1.png"));

    let a2 = find(&store, "A2").await;
    assert_eq!(a2.status, ProcessingStatus::Completed);
    let new_path = a2.artifact_path.unwrap();
    assert!(new_path.ends_with("A2-2.png"));
    assert!(Path::new(&new_path).exists());

    // 补拍失败不改状态，也不改路径
    let a3 = find(&store, "A3").await;
    assert_eq!(a3.status, ProcessingStatus::Completed);
    assert!(a3.artifact_path.unwrap().ends_with("A3-1.png"));

    let counts = store.status_counts().await.unwrap();
    assert_eq!(counts.completed, 3);
    assert_eq!(counts.failed, 1);
}

#[tokio::test]
async fn test_cancelled_patch_skips_everything() {
    let dir = tempfile::tempdir().unwrap();
    let shots = dir.path().join("shots");
    tokio::fs::create_dir_all(&shots).await.unwrap();
    let store = screenshot_round(&dir, &shots).await;
    tokio::fs::remove_file(shots.join("A1-1.png")).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let capture = FileCapture::new(&shots, 2, &[]);
    let calls = Arc::clone(&capture.calls);
    let patch_flow = flow(capture);
    let report = Patcher::new(2)
        .run(&store, Arc::clone(&patch_flow), &cancel)
        .await
        .unwrap();

    assert_eq!(report.missing, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.patched, 0);
    assert!(calls.lock().unwrap().is_empty());
    assert!(find(&store, "A1").await.artifact_path.unwrap().ends_with("A1-1.png"));
}

#[tokio::test]
async fn test_patch_with_nothing_missing() {
    let dir = tempfile::tempdir().unwrap();
    let shots = dir.path().join("shots");
    tokio::fs::create_dir_all(&shots).await.unwrap();
    let store = screenshot_round(&dir, &shots).await;

    let report = Patcher::new(2)
        .run(&store, flow(FileCapture::new(&shots, 2, &[])), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.checked, 3);
    assert_eq!(report.missing, 0);
    assert_eq!(report.patched, 0);
}
