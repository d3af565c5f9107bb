//! 浏览器内请求 - 基础设施层
//!
//! 在已登录的页面里调用 `fetch`，Cookie 和指纹都由浏览器自己带上。

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::FetchError;
use crate::infrastructure::http_transport::order_list_form;
use crate::infrastructure::JsExecutor;
use crate::services::{PageCursor, PageTransport};

#[derive(Debug, Deserialize)]
struct InPageResponse {
    status: u16,
    body: String,
}

/// 通过页面 JS 发请求的传输层
pub struct BrowserTransport {
    executor: JsExecutor,
    api_url: String,
    wdtoken: String,
    page_size: u32,
}

impl BrowserTransport {
    pub fn new(
        executor: JsExecutor,
        api_url: impl Into<String>,
        wdtoken: impl Into<String>,
        page_size: u32,
    ) -> Self {
        Self {
            executor,
            api_url: api_url.into(),
            wdtoken: wdtoken.into(),
            page_size,
        }
    }

    fn build_script(&self, cursor: &PageCursor) -> Result<String, FetchError> {
        let form = order_list_form(cursor, self.page_size, &self.wdtoken);
        let mut appends = String::new();
        for (name, value) in &form {
            appends.push_str(&format!(
                "body.append({}, {});\n",
                serde_json::to_string(name)?,
                serde_json::to_string(value)?
            ));
        }

        Ok(format!(
            r#"(async () => {{
                const body = new URLSearchParams();
                {appends}
                const resp = await fetch({url}, {{
                    method: "POST",
                    credentials: "include",
                    headers: {{ "Content-Type": "application/x-www-form-urlencoded; charset=UTF-8" }},
                    body: body.toString(),
                }});
                return {{ status: resp.status, body: await resp.text() }};
            }})()"#,
            appends = appends,
            url = serde_json::to_string(&self.api_url)?,
        ))
    }
}

#[async_trait]
impl PageTransport for BrowserTransport {
    async fn fetch(&self, cursor: &PageCursor) -> Result<Vec<u8>, FetchError> {
        let script = self.build_script(cursor)?;
        let response: InPageResponse =
            self.executor
                .eval_as(script)
                .await
                .map_err(|e| FetchError::Browser {
                    message: e.to_string(),
                })?;

        if !(200..300).contains(&response.status) {
            return Err(FetchError::HttpStatus {
                status: response.status,
            });
        }
        debug!(
            "[第 {} 页] 浏览器内请求返回 {} 字节",
            cursor.page_no,
            response.body.len()
        );
        Ok(response.body.into_bytes())
    }
}
