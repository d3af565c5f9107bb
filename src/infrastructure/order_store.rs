//! 订单存储 - 基础设施层
//!
//! 整个流水线唯一的共享状态。所有状态变更都通过这里的原子操作完成：
//! - `insert_many`：批量写入，重复的 (order_id, sub_order_desc) 静默忽略
//! - `claim_one_pending`：在一个事务里把一条 pending 改成 running 并取出
//! - `update_status`：只对 running 的记录写入最终状态
//! - `update_artifact_path`：补图时只改 completed 记录的截图路径

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Connection, Row, SqlitePool};
use tracing::{debug, error};

use crate::error::StoreError;
use crate::models::{OrderRecord, ProcessingStatus, StoredOrder, TaskOutcome};

const CREATE_ORDERS_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS orders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        order_id TEXT NOT NULL,
        shop_name TEXT,
        item_title TEXT,
        item_sku_title TEXT,
        order_status TEXT,
        sub_order_desc TEXT NOT NULL DEFAULT '',
        total_price TEXT,
        creation_time TEXT,
        payment_time TEXT,
        shipping_time TEXT,
        order_detail_url TEXT,
        screenshot_path TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        UNIQUE(order_id, sub_order_desc)
    )
"#;

const CREATE_STATUS_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_orders_status ON orders (status, id)";

const INSERT_ORDER_SQL: &str = r#"
    INSERT OR IGNORE INTO orders (
        order_id, shop_name, item_title, item_sku_title, order_status, sub_order_desc,
        total_price, creation_time, payment_time, shipping_time, order_detail_url, status
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending')
"#;

const CLAIM_PENDING_SQL: &str = r#"
    UPDATE orders SET status = 'running'
    WHERE id = (
        SELECT id FROM orders WHERE status = 'pending' ORDER BY id LIMIT 1
    )
    RETURNING *
"#;

/// 各状态的记录数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.running + self.completed + self.failed
    }
}

/// SQLite 订单存储
///
/// 内部是连接池，`clone()` 得到的是同一个数据库的句柄。
#[derive(Clone)]
pub struct OrderStore {
    pool: SqlitePool,
}

impl OrderStore {
    /// 打开（必要时创建）数据库文件
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    StoreError::OpenFailed {
                        path: path.display().to_string(),
                        source: sqlx::Error::Io(e),
                    }
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|source| StoreError::OpenFailed {
                path: path.display().to_string(),
                source,
            })?;

        debug!("数据库已打开: {}", path.display());
        Ok(Self { pool })
    }

    /// 建表，可重复调用
    pub async fn initialize(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_ORDERS_SQL).execute(&self.pool).await?;
        sqlx::query(CREATE_STATUS_INDEX_SQL)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// 批量写入，返回本次真正新增的行数
    ///
    /// 新增行数由同一连接上 `total_changes()` 的前后差值得到，被忽略的重复行不计入。
    pub async fn insert_many(&self, records: &[OrderRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.pool.acquire().await?;
        let before: i64 = sqlx::query_scalar("SELECT total_changes()")
            .fetch_one(&mut *conn)
            .await?;

        let mut tx = conn.begin().await?;
        for r in records {
            sqlx::query(INSERT_ORDER_SQL)
                .bind(&r.order_id)
                .bind(&r.shop_name)
                .bind(&r.item_title)
                .bind(&r.item_sku_title)
                .bind(&r.order_status)
                .bind(&r.sub_order_desc)
                .bind(&r.total_price)
                .bind(&r.creation_time)
                .bind(&r.payment_time)
                .bind(&r.shipping_time)
                .bind(&r.order_detail_url)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        let after: i64 = sqlx::query_scalar("SELECT total_changes()")
            .fetch_one(&mut *conn)
            .await?;

        Ok((after - before).max(0) as u64)
    }

    /// 领取一条待处理任务
    ///
    /// 选中与改为 running 在同一条语句、同一个事务内完成，并发调用者不会领到同一条。
    /// 任何数据库错误都会回滚并返回 `None`。
    pub async fn claim_one_pending(&self) -> Option<StoredOrder> {
        match self.try_claim_one_pending().await {
            Ok(claimed) => claimed,
            Err(e) => {
                error!("[DB Error] 获取任务失败: {}", e);
                None
            }
        }
    }

    async fn try_claim_one_pending(&self) -> Result<Option<StoredOrder>, StoreError> {
        // 未提交的事务在 drop 时回滚
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(CLAIM_PENDING_SQL)
            .fetch_optional(&mut *tx)
            .await?;

        let claimed = match row {
            Some(row) => Some(row_to_order(&row)?),
            None => None,
        };
        tx.commit().await?;
        Ok(claimed)
    }

    /// 写入任务最终状态
    ///
    /// 只更新当前为 running 的记录，返回是否有记录被更新。
    pub async fn update_status(&self, id: i64, outcome: &TaskOutcome) -> Result<bool, StoreError> {
        let result = match outcome {
            TaskOutcome::Completed { artifact_path } => {
                sqlx::query(
                    "UPDATE orders SET status = ?, screenshot_path = ? WHERE id = ? AND status = 'running'",
                )
                .bind(ProcessingStatus::Completed.as_str())
                .bind(artifact_path)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            TaskOutcome::Failed { .. } => {
                sqlx::query(
                    "UPDATE orders SET status = ?, screenshot_path = NULL WHERE id = ? AND status = 'running'",
                )
                .bind(ProcessingStatus::Failed.as_str())
                .bind(id)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }

    /// 补图后改写截图路径
    ///
    /// 只改 completed 记录的 `screenshot_path`，状态不变。
    pub async fn update_artifact_path(
        &self,
        id: i64,
        artifact_path: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE orders SET screenshot_path = ? WHERE id = ? AND status = 'completed'",
        )
        .bind(artifact_path)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// 所有已完成的订单，按下单时间降序
    pub async fn list_completed(&self) -> Result<Vec<StoredOrder>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM orders WHERE status = 'completed' ORDER BY creation_time DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_order).collect()
    }

    /// 按主键读取一行
    pub async fn get(&self, id: i64) -> Result<Option<StoredOrder>, StoreError> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_order).transpose()
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM orders GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            match status.parse::<ProcessingStatus>()? {
                ProcessingStatus::Pending => counts.pending = n as u64,
                ProcessingStatus::Running => counts.running = n as u64,
                ProcessingStatus::Completed => counts.completed = n as u64,
                ProcessingStatus::Failed => counts.failed = n as u64,
            }
        }
        Ok(counts)
    }

    /// 关闭连接池，等待所有连接归还
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_order(row: &SqliteRow) -> Result<StoredOrder, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(StoredOrder {
        id: row.try_get("id")?,
        record: OrderRecord {
            order_id: row.try_get("order_id")?,
            sub_order_desc: row.try_get("sub_order_desc")?,
            shop_name: row.try_get("shop_name")?,
            item_title: row.try_get("item_title")?,
            item_sku_title: row.try_get("item_sku_title")?,
            order_status: row.try_get("order_status")?,
            total_price: row.try_get("total_price")?,
            creation_time: row.try_get("creation_time")?,
            payment_time: row.try_get("payment_time")?,
            shipping_time: row.try_get("shipping_time")?,
            order_detail_url: row.try_get("order_detail_url")?,
        },
        status: status.parse()?,
        artifact_path: row.try_get("screenshot_path")?,
    })
}
