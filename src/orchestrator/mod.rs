//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责阶段调度、并发控制和统计汇总，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `app` - 应用入口
//! - 管理应用生命周期（初始化、运行、清理）
//! - 按阶段创建浏览器、资源池、传输层
//! - Ctrl-C 中断
//! - 输出每个阶段的统计和数据库状态
//!
//! ### `collector` - 订单采集
//! - 锚定并发翻页（`AnchorCollector`）
//! - 点击"加载更多"的串行翻页（`SequentialCollector`）
//! - 逐页入库，结束后汇总统计
//!
//! ### `dispatcher` - 截图调度
//! - 多个 worker 从数据库领取 pending 任务
//! - 单一写回任务更新状态
//! - 结束后关闭资源池
//!
//! ### `patcher` - 截图补拍
//! - 找出截图文件丢失的已完成订单
//! - 复用截图流程重新截图，只改写截图路径
//!
//! ## 层次关系
//!
//! ```text
//! app (选择阶段)
//!     ↓
//! collector / dispatcher / patcher (处理一批页面 / 一批任务)
//!     ↓
//! workflow::ScreenshotFlow (处理单条订单)
//!     ↓
//! services (能力层：fetch / parse / screenshot / export)
//!     ↓
//! infrastructure (基础设施：OrderStore / ResourcePool / JsExecutor)
//! ```

pub mod app;
pub mod collector;
pub mod dispatcher;
pub mod patcher;

// 重新导出主要类型
pub use app::{prepare_log_file, App, Phase};
pub use collector::{AnchorCollector, CollectReport, SequentialCollector, StopReason};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use patcher::{PatchReport, Patcher};
