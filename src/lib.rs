//! # Order Collector
//!
//! 微店订单采集、截图与导出工具
//!
//! ## 架构设计
//!
//! 本系统沿用四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源，只暴露能力
//! - `OrderStore` - SQLite 任务库，去重插入与原子领取
//! - `ResourcePool` - 有容量上限、可重建的资源池
//! - `JsExecutor` - 页面 owner，提供 eval() 能力
//! - `HttpTransport` / `BrowserTransport` / `UiPageAdvancer` - 三种取页方式
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `PageFetcher` - 限流、超时、重试的单页抓取
//! - `order_parser` - 响应解压与订单提取
//! - `ScreenshotService` / `image_trim` - 订单详情截图与裁剪
//! - `exporter` - Excel 报表
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一条订单"的截图流程
//! - `TaskCtx` - 上下文封装（worker + 任务 + 订单号）
//! - `ScreenshotFlow` - 借资源 → 截图 → 归还 → 重试
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/app` - 阶段选择与资源创建
//! - `orchestrator/collector` - 翻页采集
//! - `orchestrator/dispatcher` - 截图 worker 调度
//! - `orchestrator/patcher` - 截图文件丢失后的补拍
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{OrderStore, ResourcePool};
pub use models::{OrderRecord, ProcessingStatus, StoredOrder, TaskOutcome};
pub use orchestrator::{App, Phase};
pub use workflow::{ScreenshotFlow, TaskCtx};
