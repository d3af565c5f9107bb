//! 订单列表响应解析 - 业务能力层
//!
//! 只负责"把一页响应变成订单列表"，不关心请求从哪里来。

use std::io::Read;

use flate2::read::GzDecoder;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::models::OrderRecord;

/// 解压响应体
///
/// 先尝试 gzip，失败则认为本身就是明文。永远不会报错。
pub fn decode_body(raw: &[u8]) -> Vec<u8> {
    let mut decoder = GzDecoder::new(raw);
    let mut decompressed = Vec::new();
    match decoder.read_to_end(&mut decompressed) {
        Ok(_) => decompressed,
        Err(e) => {
            debug!("响应体不是 gzip 格式，按明文处理: {}", e);
            raw.to_vec()
        }
    }
}

/// 解压 + 反序列化 + 提取订单
pub fn parse_page_body(raw: &[u8]) -> Result<Vec<OrderRecord>, FetchError> {
    let body = decode_body(raw);
    let text = String::from_utf8_lossy(&body);
    let json: JsonValue = serde_json::from_str(text.trim())?;
    parse_orders(&json)
}

/// 从 `result.listRespDTOList` 中提取订单
///
/// `result` 或列表缺失、为 `null` 时返回空列表，表示已到末页。
pub fn parse_orders(response: &JsonValue) -> Result<Vec<OrderRecord>, FetchError> {
    let root = response.as_object().ok_or_else(|| FetchError::Schema {
        message: "响应顶层不是 JSON 对象".to_string(),
    })?;

    let result = match root.get("result") {
        None | Some(JsonValue::Null) => return Ok(Vec::new()),
        Some(JsonValue::Object(result)) => result,
        Some(other) => {
            return Err(FetchError::Schema {
                message: format!("result 字段类型异常: {}", type_name(other)),
            })
        }
    };

    let list = match result.get("listRespDTOList") {
        None | Some(JsonValue::Null) => return Ok(Vec::new()),
        Some(JsonValue::Array(list)) => list,
        Some(other) => {
            return Err(FetchError::Schema {
                message: format!("listRespDTOList 字段类型异常: {}", type_name(other)),
            })
        }
    };

    let mut orders = Vec::with_capacity(list.len());
    for item in list {
        match parse_order(item) {
            Some(order) => orders.push(order),
            None => warn!("跳过缺少订单号的记录: {}", truncate_json(item)),
        }
    }
    Ok(orders)
}

/// 映射单条订单，只有订单号是必需的
fn parse_order(item: &JsonValue) -> Option<OrderRecord> {
    let order_id = text_field(item, "order_id").filter(|id| !id.is_empty())?;

    let sub_order = item
        .get("sub_orders")
        .and_then(|v| v.as_array())
        .and_then(|subs| subs.first());

    // 改价后的金额优先
    let total_price = text_field(item, "modified_total_price")
        .filter(|p| !p.is_empty())
        .or_else(|| text_field(item, "total_price"))
        .or_else(|| Some("0.0".to_string()));

    Some(OrderRecord {
        order_id,
        sub_order_desc: sub_order
            .and_then(|s| text_field(s, "sub_order_desc"))
            .unwrap_or_default(),
        shop_name: text_field(item, "shop_name"),
        item_title: sub_order.and_then(|s| text_field(s, "item_title")),
        item_sku_title: sub_order.and_then(|s| text_field(s, "item_sku_title")),
        order_status: text_field(item, "status_desc"),
        total_price,
        creation_time: text_field(item, "add_time"),
        payment_time: text_field(item, "pay_time"),
        shipping_time: text_field(item, "express_time"),
        order_detail_url: text_field(item, "order_detail_url"),
    })
}

/// 字符串原样返回，数字保留 JSON 文本（不经过浮点转换），其它类型视为缺失
fn text_field(value: &JsonValue, key: &str) -> Option<String> {
    match value.get(key)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn truncate_json(value: &JsonValue) -> String {
    let text = value.to_string();
    if text.chars().count() > 120 {
        text.chars().take(120).collect::<String>() + "..."
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::json;
    use std::io::Write;

    fn sample_page() -> JsonValue {
        json!({
            "status": {"code": 0},
            "result": {
                "listRespDTOList": [
                    {
                        "order_id": "791234567",
                        "shop_name": "小店",
                        "status_desc": "已完成",
                        "total_price": "19.90",
                        "modified_total_price": "18.80",
                        "add_time": "2024-05-01 10:00:00",
                        "pay_time": "2024-05-01 10:01:00",
                        "order_detail_url": "https://weidian.com/detail?oid=791234567",
                        "sub_orders": [
                            {"item_title": "帆布包", "item_sku_title": "黑色", "sub_order_desc": "退款完成"}
                        ]
                    },
                    {
                        "order_id": 791234568,
                        "total_price": 25.5,
                        "sub_orders": []
                    },
                    {
                        "shop_name": "没有订单号"
                    }
                ]
            }
        })
    }

    #[test]
    fn test_parse_orders_maps_fields() {
        let orders = parse_orders(&sample_page()).unwrap();
        assert_eq!(orders.len(), 2);

        let first = &orders[0];
        assert_eq!(first.order_id, "791234567");
        assert_eq!(first.total_price.as_deref(), Some("18.80"));
        assert_eq!(first.item_title.as_deref(), Some("帆布包"));
        assert_eq!(first.sub_order_desc, "退款完成");
        assert_eq!(first.shipping_time, None);

        let second = &orders[1];
        assert_eq!(second.order_id, "791234568");
        assert_eq!(second.total_price.as_deref(), Some("25.5"));
        assert_eq!(second.sub_order_desc, "");
        assert_eq!(second.item_title, None);
    }

    #[test]
    fn test_empty_price_falls_back() {
        let orders = parse_orders(&json!({
            "result": {"listRespDTOList": [
                {"order_id": "1", "modified_total_price": "", "total_price": "9.99"},
                {"order_id": "2"}
            ]}
        }))
        .unwrap();
        assert_eq!(orders[0].total_price.as_deref(), Some("9.99"));
        assert_eq!(orders[1].total_price.as_deref(), Some("0.0"));
    }

    #[test]
    fn test_null_or_missing_list_means_end_of_data() {
        assert!(parse_orders(&json!({"result": {"listRespDTOList": null}})).unwrap().is_empty());
        assert!(parse_orders(&json!({"result": {}})).unwrap().is_empty());
        assert!(parse_orders(&json!({"result": null})).unwrap().is_empty());
        assert!(parse_orders(&json!({"status": {"code": 2}})).unwrap().is_empty());
    }

    #[test]
    fn test_unexpected_shape_is_schema_error() {
        assert!(matches!(
            parse_orders(&json!([1, 2])),
            Err(FetchError::Schema { .. })
        ));
        assert!(matches!(
            parse_orders(&json!({"result": {"listRespDTOList": "oops"}})),
            Err(FetchError::Schema { .. })
        ));
    }

    #[test]
    fn test_decode_body_handles_gzip_and_plain() {
        let payload = sample_page().to_string();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload.as_bytes()).unwrap();
        let gzipped = encoder.finish().unwrap();

        assert_eq!(decode_body(&gzipped), payload.as_bytes());
        assert_eq!(decode_body(payload.as_bytes()), payload.as_bytes());
        assert_eq!(parse_page_body(&gzipped).unwrap().len(), 2);
        assert_eq!(parse_page_body(payload.as_bytes()).unwrap().len(), 2);
    }

    #[test]
    fn test_garbage_body_is_decode_error() {
        assert!(matches!(
            parse_page_body(b"<html>502 Bad Gateway</html>"),
            Err(FetchError::Decode { .. })
        ));
    }
}
