//! HTTP 传输层 - 基础设施层
//!
//! 直接用 reqwest 调用订单列表接口，模拟浏览器请求头，可选走代理。

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, COOKIE, ORIGIN, REFERER, USER_AGENT};
use serde_json::json;
use tracing::debug;

use crate::config::Config;
use crate::error::{AppError, AppResult, FetchError};
use crate::models::cookie;
use crate::services::{PageCursor, PageTransport};

/// 表单中固定的 context 字段
pub const FIXED_CONTEXT: &str = r#"{"shopping_center":""}"#;

/// 每次请求随机挑选一个，包括重试
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36 Edg/138.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
];

/// 构造订单列表接口的 `param` 字段（紧凑 JSON）
pub fn order_list_param(cursor: &PageCursor, page_size: u32) -> String {
    let mut param = json!({
        "type": "0",
        "from": "h5",
        "page_no": cursor.page_no,
        "page_size": page_size,
        "v_seller_id": "",
    });
    if let Some(anchor) = &cursor.anchor {
        param["statusOrderId"] = json!(anchor);
    }
    param.to_string()
}

/// 完整表单：param + context + wdtoken
pub fn order_list_form(cursor: &PageCursor, page_size: u32, wdtoken: &str) -> Vec<(&'static str, String)> {
    vec![
        ("param", order_list_param(cursor, page_size)),
        ("context", FIXED_CONTEXT.to_string()),
        ("wdtoken", wdtoken.to_string()),
    ]
}

/// reqwest 传输层
pub struct HttpTransport {
    client: reqwest::Client,
    api_url: String,
    cookie: String,
    wdtoken: String,
    page_size: u32,
}

impl HttpTransport {
    /// Cookie 里没有 wdtoken 或代理地址不合法时返回配置错误
    pub fn new(config: &Config) -> AppResult<Self> {
        let wdtoken = cookie::extract_wdtoken(&config.cookie)
            .ok_or_else(|| AppError::config_missing("wdtoken"))?;

        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.request_timeout());

        if let Some(proxy_url) = config.proxy_url() {
            let proxy = reqwest::Proxy::all(&proxy_url)
                .map_err(|e| AppError::config_invalid("SMARTPROXY_ENDPOINT", e.to_string()))?;
            builder = builder.proxy(proxy);
            debug!("已启用代理: {}", config.proxy_endpoint.as_deref().unwrap_or_default());
        }

        let client = builder.build().map_err(|e| FetchError::Connection {
            message: format!("创建 HTTP 客户端失败: {}", e),
        })?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            cookie: config.cookie.clone(),
            wdtoken,
            page_size: config.page_size,
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let ua = USER_AGENTS
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);
        headers.insert(USER_AGENT, HeaderValue::from_static(ua));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded; charset=UTF-8"),
        );
        headers.insert(ORIGIN, HeaderValue::from_static("https://weidian.com"));
        headers.insert(REFERER, HeaderValue::from_static("https://weidian.com/"));
        if let Ok(cookie) = HeaderValue::from_str(&self.cookie) {
            headers.insert(COOKIE, cookie);
        }
        headers
    }
}

#[async_trait]
impl PageTransport for HttpTransport {
    async fn fetch(&self, cursor: &PageCursor) -> Result<Vec<u8>, FetchError> {
        let form = order_list_form(cursor, self.page_size, &self.wdtoken);
        let response = self
            .client
            .post(&self.api_url)
            .headers(self.headers())
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        debug!("[第 {} 页] 收到 {} 字节", cursor.page_no, body.len());
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use serde_json::Value as JsonValue;

    #[test]
    fn test_first_page_param_has_no_anchor() {
        let param: JsonValue =
            serde_json::from_str(&order_list_param(&PageCursor::first(), 10)).unwrap();
        assert_eq!(param["page_no"], 1);
        assert_eq!(param["page_size"], 10);
        assert_eq!(param["type"], "0");
        assert!(param.get("statusOrderId").is_none());
    }

    #[test]
    fn test_anchored_form() {
        let form = order_list_form(&PageCursor::anchored(7, "791234567"), 10, "075e7b03");
        assert_eq!(form.len(), 3);

        let param: JsonValue = serde_json::from_str(&form[0].1).unwrap();
        assert_eq!(param["statusOrderId"], "791234567");
        assert_eq!(param["page_no"], 7);
        assert_eq!(form[1].1, FIXED_CONTEXT);
        assert_eq!(form[2], ("wdtoken", "075e7b03".to_string()));
    }

    #[test]
    fn test_transport_requires_wdtoken() {
        let config = Config {
            cookie: "uid=1".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            HttpTransport::new(&config),
            Err(AppError::Config(ConfigError::Missing { name })) if name == "wdtoken"
        ));

        let config = Config {
            cookie: "uid=1; wdtoken=abc".to_string(),
            ..Config::default()
        };
        assert!(HttpTransport::new(&config).is_ok());
    }
}
