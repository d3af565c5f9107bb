//! 订单采集器 - 编排层
//!
//! ## 两种翻页方式
//!
//! 1. **锚定并发**（`AnchorCollector`）：先单独抓第一页拿到锚定订单号，
//!    之后第 2..N 页全部带着同一个锚点并发抓取（并发数由 `PageFetcher` 的信号量限制）
//! 2. **界面驱动**（`SequentialCollector`）：在列表页反复点击"加载更多"，
//!    每次等页面自己的请求完成，只能串行
//!
//! 两者都把每一页交给 `OrderStore::insert_many`，统计数在所有页结束后汇总，
//! 不使用跨任务共享的计数器。

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::infrastructure::OrderStore;
use crate::models::OrderRecord;
use crate::services::order_parser::parse_page_body;
use crate::services::{FailedPageLog, PageAdvancer, PageCursor, PageFetcher, PageTransport};

/// 采集停止的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// 某一页没有数据
    EndOfData { page_no: u32 },
    /// 达到最大页数
    PageBudget,
    /// 整页数据都已入库
    CaughtUp { page_no: u32 },
    /// 界面上没有新的一页
    NoMorePages,
    /// 多次重试后仍失败
    FetchFailed { page_no: u32, reason: String },
    /// 外部中断
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EndOfData { page_no } => write!(f, "第 {} 页没有数据，已到末页", page_no),
            StopReason::PageBudget => write!(f, "已达到最大页数"),
            StopReason::CaughtUp { page_no } => {
                write!(f, "第 {} 页的订单均已入库，停止增量采集", page_no)
            }
            StopReason::NoMorePages => write!(f, "没有更多页面"),
            StopReason::FetchFailed { page_no, reason } => {
                write!(f, "第 {} 页抓取失败: {}", page_no, reason)
            }
            StopReason::Cancelled => write!(f, "收到中断信号"),
        }
    }
}

/// 一次采集的汇总
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectReport {
    pub pages_fetched: u32,
    pub pages_failed: u32,
    /// 解析出的订单数（含重复）
    pub discovered: u64,
    /// 新入库的订单数
    pub inserted: u64,
    pub stop_reason: StopReason,
}

impl CollectReport {
    /// 被去重忽略的订单数
    pub fn duplicates(&self) -> u64 {
        self.discovered.saturating_sub(self.inserted)
    }

    fn from_results(results: &[PageResult], stop_reason: StopReason) -> Self {
        let mut report = CollectReport {
            pages_fetched: 0,
            pages_failed: 0,
            discovered: 0,
            inserted: 0,
            stop_reason,
        };
        for result in results {
            match &result.outcome {
                PageOutcome::Stored {
                    discovered,
                    inserted,
                } => {
                    report.pages_fetched += 1;
                    report.discovered += discovered;
                    report.inserted += inserted;
                }
                PageOutcome::Empty => report.pages_fetched += 1,
                PageOutcome::Failed(_) => report.pages_failed += 1,
                PageOutcome::Skipped => {}
            }
        }
        report
    }
}

/// 单页结果
#[derive(Debug, Clone)]
struct PageResult {
    page_no: u32,
    outcome: PageOutcome,
}

#[derive(Debug, Clone)]
enum PageOutcome {
    Stored { discovered: u64, inserted: u64 },
    Empty,
    Failed(String),
    /// 因末页水位或中断而没有发起
    Skipped,
}

impl PageOutcome {
    fn is_caught_up(&self) -> bool {
        matches!(self, PageOutcome::Stored { discovered, inserted } if *discovered > 0 && *inserted == 0)
    }
}

/// 一页订单入库
async fn store_page(store: &OrderStore, page_no: u32, records: &[OrderRecord]) -> PageOutcome {
    if records.is_empty() {
        info!("[第 {} 页] 没有发现订单数据，可能已达末页", page_no);
        return PageOutcome::Empty;
    }

    match store.insert_many(records).await {
        Ok(inserted) => {
            info!(
                "[第 {} 页] ✅ 发现 {} 条，新存入 {} 条",
                page_no,
                records.len(),
                inserted
            );
            PageOutcome::Stored {
                discovered: records.len() as u64,
                inserted,
            }
        }
        Err(e) => {
            error!("[第 {} 页] ❌ 写入数据库失败: {}", page_no, e);
            PageOutcome::Failed(e.to_string())
        }
    }
}

// ========== 锚定并发采集 ==========

/// 锚定并发采集器
pub struct AnchorCollector<T> {
    fetcher: PageFetcher<T>,
    store: OrderStore,
    max_pages: u32,
    stop_when_caught_up: bool,
    failed_log: Option<FailedPageLog>,
}

impl<T: PageTransport> AnchorCollector<T> {
    pub fn new(fetcher: PageFetcher<T>, store: OrderStore, max_pages: u32) -> Self {
        Self {
            fetcher,
            store,
            max_pages: max_pages.max(1),
            stop_when_caught_up: false,
            failed_log: None,
        }
    }

    /// 整页都已入库时不再发起更高的页
    pub fn stop_when_caught_up(mut self, enabled: bool) -> Self {
        self.stop_when_caught_up = enabled;
        self
    }

    /// 记录放弃的页码
    pub fn with_failed_log(mut self, log: FailedPageLog) -> Self {
        self.failed_log = Some(log);
        self
    }

    pub async fn run(&self, cancel: &CancellationToken) -> CollectReport {
        info!("--- 正在获取第一页和关键锚定ID ---");
        let first_cursor = PageCursor::first();
        let (first, anchor) = self.process_page(&first_cursor).await;
        let first_results = [first.clone()];

        let anchor = match (&first.outcome, anchor) {
            (PageOutcome::Failed(reason), _) => {
                error!("❌ 无法获取第一页数据，请检查 Cookie、代理或网络");
                return CollectReport::from_results(
                    &first_results,
                    StopReason::FetchFailed {
                        page_no: 1,
                        reason: reason.clone(),
                    },
                );
            }
            (PageOutcome::Empty, _) | (_, None) => {
                return CollectReport::from_results(
                    &first_results,
                    StopReason::EndOfData { page_no: 1 },
                );
            }
            (_, Some(anchor)) => anchor,
        };
        info!("✅ 成功获取到锚定订单ID: {}", anchor);

        if self.stop_when_caught_up && first.outcome.is_caught_up() {
            return CollectReport::from_results(
                &first_results,
                StopReason::CaughtUp { page_no: 1 },
            );
        }
        if self.max_pages <= 1 {
            return CollectReport::from_results(&first_results, StopReason::PageBudget);
        }
        if cancel.is_cancelled() {
            return CollectReport::from_results(&first_results, StopReason::Cancelled);
        }

        let concurrency = self.fetcher.policy().concurrency.max(1);
        info!(
            "--- 并发抓取第 2..={} 页 (最大并发数: {}) ---",
            self.max_pages, concurrency
        );

        // 末页水位：高于它且尚未发起的页直接跳过
        let end_mark = AtomicU32::new(u32::MAX);
        let anchor = anchor.as_str();
        let end_mark_ref = &end_mark;

        let mut results: Vec<PageResult> = stream::iter(2..=self.max_pages)
            .map(|page_no| async move {
                if cancel.is_cancelled() || page_no > end_mark_ref.load(Ordering::SeqCst) {
                    return PageResult {
                        page_no,
                        outcome: PageOutcome::Skipped,
                    };
                }

                let cursor = PageCursor::anchored(page_no, anchor);
                let (result, _) = self.process_page(&cursor).await;
                let reached_end = matches!(result.outcome, PageOutcome::Empty)
                    || (self.stop_when_caught_up && result.outcome.is_caught_up());
                if reached_end {
                    end_mark_ref.fetch_min(page_no, Ordering::SeqCst);
                }
                result
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        results.push(first);
        results.sort_by_key(|r| r.page_no);

        let stop_reason = self.stop_reason(&results, cancel);
        CollectReport::from_results(&results, stop_reason)
    }

    /// 抓取并入库一页，同时返回该页第一条订单号（作为锚点）
    async fn process_page(&self, cursor: &PageCursor) -> (PageResult, Option<String>) {
        let page_no = cursor.page_no;
        match self.fetcher.fetch_page(cursor).await {
            Ok(records) => {
                let anchor = records.first().map(|r| r.order_id.clone());
                let outcome = store_page(&self.store, page_no, &records).await;
                (PageResult { page_no, outcome }, anchor)
            }
            Err(e) => {
                let reason = e.to_string();
                if let Some(log) = &self.failed_log {
                    if let Err(write_err) = log.record(cursor, &reason).await {
                        warn!("写入失败页记录失败: {}", write_err);
                    }
                }
                (
                    PageResult {
                        page_no,
                        outcome: PageOutcome::Failed(reason),
                    },
                    None,
                )
            }
        }
    }

    fn stop_reason(&self, results: &[PageResult], cancel: &CancellationToken) -> StopReason {
        let first_empty = results
            .iter()
            .filter(|r| matches!(r.outcome, PageOutcome::Empty))
            .map(|r| r.page_no)
            .min();
        if let Some(page_no) = first_empty {
            return StopReason::EndOfData { page_no };
        }

        if self.stop_when_caught_up {
            let first_caught_up = results
                .iter()
                .filter(|r| r.outcome.is_caught_up())
                .map(|r| r.page_no)
                .min();
            if let Some(page_no) = first_caught_up {
                return StopReason::CaughtUp { page_no };
            }
        }

        let skipped = results
            .iter()
            .any(|r| matches!(r.outcome, PageOutcome::Skipped));
        if skipped && cancel.is_cancelled() {
            return StopReason::Cancelled;
        }
        StopReason::PageBudget
    }
}

// ========== 界面驱动采集 ==========

/// 界面驱动的串行采集器
pub struct SequentialCollector<A> {
    advancer: A,
    store: OrderStore,
    max_pages: u32,
    advance_timeout: Duration,
}

impl<A: PageAdvancer> SequentialCollector<A> {
    pub fn new(advancer: A, store: OrderStore, max_pages: u32, advance_timeout: Duration) -> Self {
        Self {
            advancer,
            store,
            max_pages: max_pages.max(1),
            advance_timeout,
        }
    }

    pub async fn run(&mut self, cancel: &CancellationToken) -> CollectReport {
        let mut results = Vec::new();
        let mut page_no = 1;

        let mut body = match self.advancer.first_page().await {
            Ok(body) => body,
            Err(e) => {
                error!("[第 1 页] ❌ 打开订单列表失败: {}", e);
                results.push(PageResult {
                    page_no,
                    outcome: PageOutcome::Failed(e.to_string()),
                });
                return CollectReport::from_results(
                    &results,
                    StopReason::FetchFailed {
                        page_no,
                        reason: e.to_string(),
                    },
                );
            }
        };

        let stop_reason = loop {
            let records = match parse_page_body(&body) {
                Ok(records) => records,
                Err(e) => {
                    error!("[第 {} 页] ❌ 响应无法解析: {}", page_no, e);
                    results.push(PageResult {
                        page_no,
                        outcome: PageOutcome::Failed(e.to_string()),
                    });
                    break StopReason::FetchFailed {
                        page_no,
                        reason: e.to_string(),
                    };
                }
            };

            let outcome = store_page(&self.store, page_no, &records).await;
            let stop = match &outcome {
                PageOutcome::Empty => Some(StopReason::EndOfData { page_no }),
                PageOutcome::Failed(reason) => Some(StopReason::FetchFailed {
                    page_no,
                    reason: reason.clone(),
                }),
                PageOutcome::Stored { inserted: 0, .. } => Some(StopReason::CaughtUp { page_no }),
                _ => None,
            };
            results.push(PageResult { page_no, outcome });

            if let Some(reason) = stop {
                break reason;
            }
            if page_no >= self.max_pages {
                break StopReason::PageBudget;
            }
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            info!("--- 第 {}/{} 次点击 '加载更多' ---", page_no, self.max_pages - 1);
            match self.advancer.advance(self.advance_timeout).await {
                Ok(Some(next)) => {
                    body = next;
                    page_no += 1;
                }
                Ok(None) => break StopReason::NoMorePages,
                Err(e) => {
                    error!("[第 {} 页] ❌ 翻页失败: {}", page_no + 1, e);
                    results.push(PageResult {
                        page_no: page_no + 1,
                        outcome: PageOutcome::Failed(e.to_string()),
                    });
                    break StopReason::FetchFailed {
                        page_no: page_no + 1,
                        reason: e.to_string(),
                    };
                }
            }
        };

        CollectReport::from_results(&results, stop_reason)
    }
}
