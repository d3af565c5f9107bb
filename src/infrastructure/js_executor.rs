//! JS 执行器 - 基础设施层
//!
//! 持有一个 page，只暴露"执行 JS / 等待 DOM"的能力

use std::time::Duration;

use anyhow::{anyhow, Result};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::time::{sleep, Instant};

/// 轮询 DOM 的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// JS 执行器
///
/// 职责：
/// - 持有 Page 资源
/// - 暴露 eval() / eval_promise() 能力
/// - 不认识订单，不处理业务流程
#[derive(Clone)]
pub struct JsExecutor {
    page: Page,
}

impl JsExecutor {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// 获取 page 的引用（导航、截图等非 JS 操作）
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// 执行同步 JS 表达式并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> Result<JsonValue> {
        self.evaluate(js_code.into(), false).await
    }

    /// 执行返回 Promise 的表达式，等待其完成
    pub async fn eval_promise(&self, js_code: impl Into<String>) -> Result<JsonValue> {
        self.evaluate(js_code.into(), true).await
    }

    // 统一走 Runtime.evaluate，表达式原样执行
    async fn evaluate(&self, expression: String, await_promise: bool) -> Result<JsonValue> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(await_promise)
            .return_by_value(true)
            .build()
            .map_err(|e| anyhow!("构造 Evaluate 参数失败: {}", e))?;
        let result = self.page.evaluate_expression(params).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> Result<T> {
        let json_value = self.eval_promise(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }

    /// 等待 CSS 选择器出现，超时返回错误
    pub async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        let js = format!(
            "document.querySelector({}) !== null",
            serde_json::to_string(selector)?
        );
        let deadline = Instant::now() + timeout;
        loop {
            if self.eval(js.clone()).await?.as_bool() == Some(true) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(anyhow!(
                    "等待元素 {} 超时 ({}s)",
                    selector,
                    timeout.as_secs()
                ));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// 统计 XPath 命中的节点数
    pub async fn count_xpath(&self, xpath: &str) -> Result<u64> {
        let js = format!(
            "document.evaluate({}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null).snapshotLength",
            serde_json::to_string(xpath)?
        );
        Ok(self.eval(js).await?.as_u64().unwrap_or(0))
    }

    /// 点击 XPath 命中的第一个节点，返回是否找到
    pub async fn click_xpath(&self, xpath: &str) -> Result<bool> {
        let js = format!(
            r#"(() => {{
                const node = document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
                if (!node) return false;
                node.scrollIntoView({{block: "center"}});
                node.click();
                return true;
            }})()"#,
            serde_json::to_string(xpath)?
        );
        Ok(self.eval(js).await?.as_bool().unwrap_or(false))
    }
}
