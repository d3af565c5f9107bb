//! 应用入口 - 编排层
//!
//! ## 职责
//!
//! 1. **应用初始化**：日志文件、启动信息、打开并初始化任务数据库
//! 2. **阶段选择**：采集 / 界面采集 / 截图 / 补拍 / 导出 / 全部
//! 3. **中断处理**：Ctrl-C 触发 `CancellationToken`，正在处理的页面或任务会先完成
//! 4. **全局统计**：每个阶段结束后打印统计和数据库状态
//!
//! 只有本模块创建浏览器、资源池和传输层，下层只拿到能力。

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::browser::{BrowserFactory, BrowserSession};
use crate::config::Config;
use crate::error::AppError;
use crate::infrastructure::{
    BrowserTransport, HttpTransport, JsExecutor, OrderStore, ResourcePool, UiPageAdvancer,
};
use crate::models::extract_wdtoken;
use crate::orchestrator::collector::{AnchorCollector, CollectReport, SequentialCollector};
use crate::orchestrator::dispatcher::{DispatchReport, Dispatcher};
use crate::orchestrator::patcher::{PatchReport, Patcher};
use crate::services::{
    export_report, FailedPageLog, FetchPolicy, PageFetcher, PageTransport, ScreenshotService,
};
use crate::utils::logging::{
    init_log_file, log_phase_start, print_collect_stats, print_dispatch_stats,
    print_patch_stats, print_status_counts,
};
use crate::workflow::{FlowPolicy, ScreenshotFlow};

/// 运行阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// 接口并发采集
    Collect,
    /// 点击"加载更多"的界面采集
    CollectUi,
    Screenshot,
    /// 为截图文件丢失的已完成订单重新截图
    Patch,
    Export,
    /// 采集 → 截图 → 导出
    All,
}

impl FromStr for Phase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "collect" => Ok(Phase::Collect),
            "collect-ui" => Ok(Phase::CollectUi),
            "screenshot" => Ok(Phase::Screenshot),
            "patch" => Ok(Phase::Patch),
            "export" => Ok(Phase::Export),
            "all" => Ok(Phase::All),
            other => bail!(
                "未知的运行阶段 '{}'，可选: collect, collect-ui, screenshot, patch, export, all",
                other
            ),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Collect => "collect",
            Phase::CollectUi => "collect-ui",
            Phase::Screenshot => "screenshot",
            Phase::Patch => "patch",
            Phase::Export => "export",
            Phase::All => "all",
        };
        f.write_str(name)
    }
}

/// 应用主结构
pub struct App {
    config: Config,
    store: OrderStore,
    cancel: CancellationToken,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        log_startup(&config);

        let store = OrderStore::connect(&config.db_path)
            .await
            .with_context(|| format!("无法打开任务数据库: {}", config.db_path))?;
        store.initialize().await.context("初始化数据库表失败")?;
        info!("✓ 数据库已就绪: {}", config.db_path);

        Ok(Self {
            config,
            store,
            cancel: CancellationToken::new(),
        })
    }

    /// 运行指定阶段
    pub async fn run(&self, phase: Phase) -> Result<()> {
        let ctrl_c = self.spawn_ctrl_c_listener();

        let result = self.run_phase(phase).await;

        ctrl_c.abort();
        match self.store.status_counts().await {
            Ok(counts) => print_status_counts(&counts, &self.config.output_log_file),
            Err(e) => warn!("读取数据库统计失败: {}", e),
        }
        self.store.close().await;
        result
    }

    async fn run_phase(&self, phase: Phase) -> Result<()> {
        match phase {
            Phase::Collect => {
                self.collect().await?;
            }
            Phase::CollectUi => {
                self.collect_ui().await?;
            }
            Phase::Screenshot => {
                self.screenshot().await?;
            }
            Phase::Patch => {
                self.patch().await?;
            }
            Phase::Export => {
                self.export().await?;
            }
            Phase::All => {
                self.collect().await?;
                if self.cancel.is_cancelled() {
                    warn!("⚠️ 已中断，跳过截图和导出");
                    return Ok(());
                }
                self.screenshot().await?;
                self.export().await?;
            }
        }
        Ok(())
    }

    fn spawn_ctrl_c_listener(&self) -> tokio::task::JoinHandle<()> {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("\n⚠️ 收到 Ctrl-C，等待进行中的任务完成后退出...");
                cancel.cancel();
            }
        })
    }

    /// 接口并发采集
    ///
    /// 配置了调试端口时在已登录的浏览器页面里发请求，否则直接走 HTTP。
    async fn collect(&self) -> Result<CollectReport> {
        log_phase_start("订单采集 (锚定并发)");
        let policy = FetchPolicy::from_config(&self.config);

        let report = match self.config.browser_debug_port {
            Some(port) => {
                info!("🔗 通过浏览器 (端口 {}) 发起请求", port);
                let session = BrowserSession::open(&self.config).await?;
                let page = session
                    .page_for(&self.config.list_page_url, "weidian.com")
                    .await?;
                let wdtoken = extract_wdtoken(&self.config.cookie)
                    .ok_or_else(|| AppError::config_missing("wdtoken"))?;
                let transport = BrowserTransport::new(
                    JsExecutor::new(page),
                    self.config.api_url.as_str(),
                    wdtoken,
                    self.config.page_size,
                );
                let report = self.run_anchor_collector(transport, policy).await;
                session.close().await;
                report
            }
            None => {
                let transport =
                    HttpTransport::new(&self.config).context("创建 HTTP 客户端失败")?;
                self.run_anchor_collector(transport, policy).await
            }
        };

        print_collect_stats(&report);
        Ok(report)
    }

    async fn run_anchor_collector<T: PageTransport>(
        &self,
        transport: T,
        policy: FetchPolicy,
    ) -> CollectReport {
        AnchorCollector::new(
            PageFetcher::new(transport, policy),
            self.store.clone(),
            self.config.max_pages,
        )
        .stop_when_caught_up(self.config.stop_when_caught_up)
        .with_failed_log(FailedPageLog::new(&self.config.failed_pages_file))
        .run(&self.cancel)
        .await
    }

    /// 界面驱动采集
    async fn collect_ui(&self) -> Result<CollectReport> {
        log_phase_start("订单采集 (加载更多)");

        let session = BrowserSession::open(&self.config).await?;
        let result = async {
            let page = session.new_page("about:blank").await?;
            let advancer = UiPageAdvancer::new(
                JsExecutor::new(page),
                self.config.list_page_url.as_str(),
                self.config.navigation_timeout(),
            )
            .await?;

            let mut collector = SequentialCollector::new(
                advancer,
                self.store.clone(),
                self.config.max_pages,
                self.config.advance_timeout(),
            );
            Ok::<_, anyhow::Error>(collector.run(&self.cancel).await)
        }
        .await;
        session.close().await;

        let report = result?;
        print_collect_stats(&report);
        Ok(report)
    }

    /// 截图目录、浏览器池和截图流程，截图与补拍共用
    async fn screenshot_flow(
        &self,
    ) -> Result<Arc<ScreenshotFlow<BrowserFactory, ScreenshotService>>> {
        tokio::fs::create_dir_all(&self.config.screenshot_dir)
            .await
            .with_context(|| format!("无法创建截图目录: {}", self.config.screenshot_dir))?;

        let pool = ResourcePool::new(
            BrowserFactory::new(self.config.clone()),
            self.config.pool_size,
            self.config.max_uses_per_resource,
        );
        if pool.warm_up().await == 0 {
            warn!("⚠️ 没有可用的浏览器实例，将在领取任务时重试创建");
        }

        Ok(Arc::new(ScreenshotFlow::new(
            pool,
            ScreenshotService::new(&self.config),
            FlowPolicy::from_config(&self.config),
        )))
    }

    /// 截图
    async fn screenshot(&self) -> Result<DispatchReport> {
        log_phase_start("订单截图");
        let flow = self.screenshot_flow().await?;

        let report = Dispatcher::new(self.config.worker_count)
            .run(&self.store, Arc::clone(&flow), self.cancel.clone())
            .await?;
        print_dispatch_stats(&report);
        info!(
            "♻️ 浏览器实例: 创建 {} 个, 销毁 {} 个",
            flow.pool().created(),
            flow.pool().destroyed()
        );
        Ok(report)
    }

    /// 补拍缺失的截图，不改变订单状态
    async fn patch(&self) -> Result<PatchReport> {
        log_phase_start("截图补拍");
        let flow = self.screenshot_flow().await?;

        let report = Patcher::new(self.config.worker_count)
            .run(&self.store, Arc::clone(&flow), &self.cancel)
            .await?;
        print_patch_stats(&report);
        info!(
            "♻️ 浏览器实例: 创建 {} 个, 销毁 {} 个",
            flow.pool().created(),
            flow.pool().destroyed()
        );
        Ok(report)
    }

    /// 导出 Excel
    async fn export(&self) -> Result<usize> {
        log_phase_start("导出 Excel");
        let rows = export_report(&self.store, &self.config.export_file).await?;
        if rows == 0 {
            warn!("⚠️ 没有已完成的订单，未生成文件");
        } else {
            info!("✅ 已导出 {} 条订单到 {}", rows, self.config.export_file);
        }
        Ok(rows)
    }
}

// ========== 日志辅助函数 ==========

/// 写入日志文件头
pub fn prepare_log_file(config: &Config) -> Result<()> {
    init_log_file(&config.output_log_file, "微店订单采集日志")
}

fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 微店订单采集");
    info!("📊 最大并发请求数: {}", config.concurrent_requests);
    info!("👷 截图 worker 数: {}", config.worker_count);
    info!("🧭 浏览器池容量: {}", config.pool_size);
    info!("{}", "=".repeat(60));
}
