//! 订单数据模型
//!
//! 所有采集方式共用同一个 `OrderRecord`，可选字段缺失时为 `None`。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// 单个订单的核心信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OrderRecord {
    /// 订单号
    pub order_id: String,
    /// 子订单状态（如"退款完成"），没有时为空字符串
    #[serde(default)]
    pub sub_order_desc: String,
    pub shop_name: Option<String>,
    /// 商品名称
    pub item_title: Option<String>,
    /// 商品规格
    pub item_sku_title: Option<String>,
    pub order_status: Option<String>,
    /// 实付金额，保持为字符串
    pub total_price: Option<String>,
    pub creation_time: Option<String>,
    pub payment_time: Option<String>,
    pub shipping_time: Option<String>,
    /// 用于截图的详情页 URL
    pub order_detail_url: Option<String>,
}

impl OrderRecord {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            ..Default::default()
        }
    }

    /// 去重键
    pub fn key(&self) -> OrderKey {
        OrderKey {
            order_id: self.order_id.clone(),
            sub_order_desc: self.sub_order_desc.clone(),
        }
    }
}

/// 去重键：(订单号, 子订单状态)
///
/// 同一订单在退款等状态变化后会以不同的 `sub_order_desc` 重新出现，两条都保留。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderKey {
    pub order_id: String,
    pub sub_order_desc: String,
}

/// 截图任务状态
///
/// 只允许 `Pending → Running → Completed | Failed`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Running => "running",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "running" => Ok(ProcessingStatus::Running),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(StoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// 数据库中的一行订单
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredOrder {
    pub id: i64,
    pub record: OrderRecord,
    pub status: ProcessingStatus,
    /// 截图路径，只有 `Completed` 时才有值
    pub artifact_path: Option<String>,
}

/// 截图任务的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed { artifact_path: String },
    Failed { reason: String },
}

impl TaskOutcome {
    pub fn status(&self) -> ProcessingStatus {
        match self {
            TaskOutcome::Completed { .. } => ProcessingStatus::Completed,
            TaskOutcome::Failed { .. } => ProcessingStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_text() {
        for status in [
            ProcessingStatus::Pending,
            ProcessingStatus::Running,
            ProcessingStatus::Completed,
            ProcessingStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ProcessingStatus>().unwrap(), status);
        }
        assert!("done".parse::<ProcessingStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ProcessingStatus::Pending.is_terminal());
        assert!(!ProcessingStatus::Running.is_terminal());
        assert!(ProcessingStatus::Completed.is_terminal());
        assert!(ProcessingStatus::Failed.is_terminal());
    }

    #[test]
    fn test_key_includes_sub_order_desc() {
        let mut refunded = OrderRecord::new("A1");
        refunded.sub_order_desc = "退款完成".to_string();
        assert_ne!(OrderRecord::new("A1").key(), refunded.key());
    }
}
