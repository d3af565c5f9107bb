//! Cookie 字符串解析

use regex::Regex;

/// 一个 Cookie 键值对
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookiePair {
    pub name: String,
    pub value: String,
}

/// 将浏览器复制的 `a=1; b=2` 格式解析为键值对，忽略没有 `=` 的片段
pub fn parse_cookie_string(cookie: &str) -> Vec<CookiePair> {
    cookie
        .split(';')
        .filter_map(|item| {
            let (name, value) = item.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some(CookiePair {
                name: name.to_string(),
                value: value.trim().to_string(),
            })
        })
        .collect()
}

/// 提取 `wdtoken`，表单参数里需要和 Cookie 保持一致
pub fn extract_wdtoken(cookie: &str) -> Option<String> {
    let re = Regex::new(r"(?:^|;)\s*wdtoken=([^;]+)").ok()?;
    re.captures(cookie)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|v| !v.is_empty())
}
