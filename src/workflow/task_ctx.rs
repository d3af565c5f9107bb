//! 截图任务上下文
//!
//! 封装"哪个 worker 在处理哪条订单"这一信息

use std::fmt::Display;

/// 截图任务上下文
#[derive(Debug, Clone)]
pub struct TaskCtx {
    /// worker 编号（从 1 开始，仅用于日志显示）
    pub worker_id: usize,

    /// 数据库主键
    pub task_id: i64,

    /// 订单号
    pub order_id: String,
}

impl TaskCtx {
    pub fn new(worker_id: usize, task_id: i64, order_id: impl Into<String>) -> Self {
        Self {
            worker_id,
            task_id,
            order_id: order_id.into(),
        }
    }
}

impl Display for TaskCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[Worker-{} 任务#{} 订单#{}]",
            self.worker_id, self.task_id, self.order_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let ctx = TaskCtx::new(2, 17, "791234567");
        assert_eq!(ctx.to_string(), "[Worker-2 任务#17 订单#791234567]");
    }
}
