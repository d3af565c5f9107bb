//! 任务库的插入、领取与状态流转

use std::collections::HashSet;

use order_collector::infrastructure::OrderStore;
use order_collector::models::{OrderRecord, ProcessingStatus, TaskOutcome};
use tempfile::TempDir;
use tokio_test::assert_ok;

async fn open_store() -> (TempDir, OrderStore) {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let store = OrderStore::connect(dir.path().join("tasks.db"))
        .await
        .expect("打开数据库失败");
    store.initialize().await.expect("建表失败");
    (dir, store)
}

fn records(ids: impl IntoIterator<Item = u32>) -> Vec<OrderRecord> {
    ids.into_iter()
        .map(|i| OrderRecord {
            order_detail_url: Some(format!("https://weidian.com/detail?oid=A{}", i)),
            ..OrderRecord::new(format!("A{}", i))
        })
        .collect()
}

#[tokio::test]
async fn test_overlapping_pages_insert_only_new_keys() {
    let (_dir, store) = open_store().await;

    let page1 = records(1..=10);
    assert_eq!(store.insert_many(&page1).await.unwrap(), 10);

    let page2 = records(8..=13);
    assert_eq!(store.insert_many(&page2).await.unwrap(), 3);

    assert_eq!(store.count().await.unwrap(), 13);
}

#[tokio::test]
async fn test_insert_is_idempotent() {
    let (_dir, store) = open_store().await;
    let batch = records(1..=5);

    assert_eq!(store.insert_many(&batch).await.unwrap(), 5);
    assert_eq!(store.insert_many(&batch).await.unwrap(), 0);
    assert_eq!(store.count().await.unwrap(), 5);
}

#[tokio::test]
async fn test_same_order_with_new_sub_status_is_kept() {
    let (_dir, store) = open_store().await;
    let original = OrderRecord::new("A1");
    let refunded = OrderRecord {
        sub_order_desc: "退款完成".to_string(),
        ..OrderRecord::new("A1")
    };

    assert_eq!(store.insert_many(&[original.clone()]).await.unwrap(), 1);
    assert_eq!(store.insert_many(&[original, refunded]).await.unwrap(), 1);
    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_concurrent_claims_are_exclusive() {
    for (workers, pending) in [(0usize, 0u32), (1, 0), (3, 5), (5, 3), (8, 8)] {
        let (_dir, store) = open_store().await;
        store.insert_many(&records(1..=pending)).await.unwrap();

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.claim_one_pending().await })
            })
            .collect();

        let mut claimed = Vec::new();
        for handle in handles {
            if let Some(order) = handle.await.unwrap() {
                assert_eq!(order.status, ProcessingStatus::Running);
                claimed.push(order.id);
            }
        }

        let expected = workers.min(pending as usize);
        let distinct: HashSet<_> = claimed.iter().collect();
        assert_eq!(claimed.len(), expected, "W={} P={}", workers, pending);
        assert_eq!(distinct.len(), expected, "W={} P={}", workers, pending);

        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.running as usize, expected);
        assert_eq!(counts.pending as usize, pending as usize - expected);
    }
}

#[tokio::test]
async fn test_terminal_orders_are_never_claimed_again() {
    let (_dir, store) = open_store().await;
    store.insert_many(&records(1..=2)).await.unwrap();

    let first = store.claim_one_pending().await.unwrap();
    let done = TaskOutcome::Completed {
        artifact_path: "screenshots/A1.png".to_string(),
    };
    assert!(store.update_status(first.id, &done).await.unwrap());

    let second = store.claim_one_pending().await.unwrap();
    let failed = TaskOutcome::Failed {
        reason: "超过最大重试次数".to_string(),
    };
    assert!(store.update_status(second.id, &failed).await.unwrap());

    assert!(store.claim_one_pending().await.is_none());
    // 终态不会被再次改写
    assert!(!store.update_status(first.id, &failed).await.unwrap());

    let first = store.get(first.id).await.unwrap().unwrap();
    assert_eq!(first.status, ProcessingStatus::Completed);
    assert_eq!(first.artifact_path.as_deref(), Some("screenshots/A1.png"));
}

#[tokio::test]
async fn test_reopened_store_keeps_progress() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");

    {
        let store = OrderStore::connect(&path).await.unwrap();
        store.initialize().await.unwrap();
        store.insert_many(&records(1..=3)).await.unwrap();
        let claimed = store.claim_one_pending().await.unwrap();
        let done = TaskOutcome::Completed {
            artifact_path: "screenshots/A1.png".to_string(),
        };
        store.update_status(claimed.id, &done).await.unwrap();
        store.close().await;
    }

    let store = OrderStore::connect(&path).await.unwrap();
    // 重复建表不影响已有数据
    assert_ok!(store.initialize().await);
    assert_eq!(store.insert_many(&records(1..=4)).await.unwrap(), 1);

    let counts = store.status_counts().await.unwrap();
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.pending, 3);
    assert_eq!(store.list_completed().await.unwrap().len(), 1);
}
