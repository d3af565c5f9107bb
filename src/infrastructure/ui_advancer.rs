//! 界面驱动翻页 - 基础设施层
//!
//! 在订单列表页点击"加载更多"，等待页面自己发出的订单列表请求完成，取回响应体。
//! 只关心匹配 `ORDER_LIST_PATTERN` 的那一个请求，不做全量流量监听。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFinished, EventResponseReceived, GetResponseBodyParams, RequestId, ResourceType,
};
use chromiumoxide::listeners::EventStream;
use futures::StreamExt;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::error::FetchError;
use crate::infrastructure::JsExecutor;
use crate::services::PageAdvancer;

/// 订单列表接口的 URL 片段
pub const ORDER_LIST_PATTERN: &str = "tradeview/buyer.order.list/1.1";

/// "加载更多"按钮
pub const LOAD_MORE_XPATH: &str = r#"//div[contains(@class, "more_span")]"#;

/// 列表中的订单条目
pub const ORDER_ITEMS_XPATH: &str = r#"//*[@id="app"]/div[3]/ul/li"#;

/// 基于 chromiumoxide 页面事件的翻页器
pub struct UiPageAdvancer {
    executor: JsExecutor,
    list_url: String,
    navigation_timeout: Duration,
    responses: EventStream<EventResponseReceived>,
    finished: EventStream<EventLoadingFinished>,
}

impl UiPageAdvancer {
    /// 创建翻页器，监听在导航之前建立
    pub async fn new(
        executor: JsExecutor,
        list_url: impl Into<String>,
        navigation_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let responses = executor
            .page()
            .event_listener::<EventResponseReceived>()
            .await?;
        let finished = executor
            .page()
            .event_listener::<EventLoadingFinished>()
            .await?;

        Ok(Self {
            executor,
            list_url: list_url.into(),
            navigation_timeout,
            responses,
            finished,
        })
    }

    /// 等待下一个订单列表请求完成并取回响应体
    async fn next_order_body(&mut self, limit: Duration) -> Result<Option<Vec<u8>>, FetchError> {
        let deadline = Instant::now() + limit;
        let mut matched: HashSet<RequestId> = HashSet::new();

        loop {
            tokio::select! {
                Some(event) = self.responses.next() => {
                    let is_api_call = matches!(event.r#type, ResourceType::Xhr | ResourceType::Fetch);
                    if is_api_call && event.response.url.contains(ORDER_LIST_PATTERN) {
                        debug!("捕获订单列表响应: {}", event.response.url);
                        matched.insert(event.request_id.clone());
                    }
                }
                Some(event) = self.finished.next() => {
                    if matched.contains(&event.request_id) {
                        return self.read_body(event.request_id.clone()).await.map(Some);
                    }
                }
                _ = sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn read_body(&self, request_id: RequestId) -> Result<Vec<u8>, FetchError> {
        let response = self
            .executor
            .page()
            .execute(GetResponseBodyParams::new(request_id))
            .await
            .map_err(|e| FetchError::Browser {
                message: format!("读取响应体失败: {}", e),
            })?;

        let body = &response.result;
        if body.base64_encoded {
            BASE64.decode(&body.body).map_err(|e| FetchError::Decode {
                message: format!("响应体 base64 解码失败: {}", e),
            })
        } else {
            Ok(body.body.clone().into_bytes())
        }
    }

    async fn visible_items(&self) -> u64 {
        self.executor.count_xpath(ORDER_ITEMS_XPATH).await.unwrap_or(0)
    }
}

#[async_trait]
impl PageAdvancer for UiPageAdvancer {
    async fn first_page(&mut self) -> Result<Vec<u8>, FetchError> {
        info!("🌐 打开订单列表页: {}", self.list_url);
        self.executor
            .page()
            .goto(self.list_url.as_str())
            .await
            .map_err(|e| FetchError::Browser {
                message: format!("打开列表页失败: {}", e),
            })?;

        match self.next_order_body(self.navigation_timeout).await? {
            Some(body) => Ok(body),
            None => Err(FetchError::Timeout {
                message: format!(
                    "{}s 内没有等到第一页订单数据",
                    self.navigation_timeout.as_secs()
                ),
            }),
        }
    }

    async fn advance(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, FetchError> {
        let before = self.visible_items().await;

        let clicked = self
            .executor
            .click_xpath(LOAD_MORE_XPATH)
            .await
            .map_err(|e| FetchError::Browser {
                message: format!("点击加载更多失败: {}", e),
            })?;
        if !clicked {
            info!("没有找到'加载更多'按钮，已到末页");
            return Ok(None);
        }

        let body = self.next_order_body(timeout).await?;
        if body.is_some() {
            let after = self.visible_items().await;
            debug!("页面订单条目: {} → {}", before, after);
        }
        Ok(body)
    }
}
