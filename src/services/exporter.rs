//! 报表导出服务 - 业务能力层
//!
//! 读取所有已完成的订单，生成带截图的 Excel 报表。对数据库只读。

use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Image, Workbook, XlsxError};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::OrderStore;
use crate::models::StoredOrder;

pub const SHEET_NAME: &str = "订单详情";

/// 表头，最后一列放截图
pub const HEADERS: [&str; 11] = [
    "订单号",
    "店铺名称",
    "商品名称",
    "商品规格",
    "订单状态",
    "订单退款状态",
    "实付金额",
    "下单时间",
    "付款时间",
    "_截图路径",
    "订单截图",
];

const COLUMN_WIDTHS: [f64; 11] = [25.0, 30.0, 40.0, 20.0, 20.0, 20.0, 15.0, 18.0, 18.0, 25.0, 95.0];
const IMAGE_COLUMN: u16 = 10;
const DATA_ROW_HEIGHT: f64 = 400.0;

/// 导出已完成的订单，返回写入的行数
///
/// 没有已完成的订单时不生成文件，返回 0。
pub async fn export_report(store: &OrderStore, path: impl AsRef<Path>) -> AppResult<usize> {
    let orders = store.list_completed().await?;
    info!("发现 {} 条已完成的订单记录", orders.len());

    if orders.is_empty() {
        warn!("⚠️ 没有已完成的订单数据可供导出");
        return Ok(0);
    }

    let path: PathBuf = path.as_ref().to_path_buf();
    let rows = tokio::task::spawn_blocking(move || render_report(&orders, &path))
        .await
        .map_err(|e| AppError::Other(format!("导出任务异常退出: {}", e)))??;

    Ok(rows)
}

/// 把订单写成 xlsx 文件
pub fn render_report(orders: &[StoredOrder], path: &Path) -> Result<usize, XlsxError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    let header_format = Format::new()
        .set_bold()
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
        .set_border(FormatBorder::Thin);
    let cell_format = Format::new()
        .set_align(FormatAlign::Left)
        .set_align(FormatAlign::VerticalCenter)
        .set_text_wrap();

    for (col, (title, width)) in HEADERS.iter().zip(COLUMN_WIDTHS).enumerate() {
        let col = col as u16;
        worksheet.set_column_width(col, width)?;
        worksheet.write_string_with_format(0, col, *title, &header_format)?;
    }

    for (index, order) in orders.iter().enumerate() {
        let row = (index + 1) as u32;
        worksheet.set_row_height(row, DATA_ROW_HEIGHT)?;

        for (col, value) in row_values(order).iter().enumerate() {
            worksheet.write_string_with_format(row, col as u16, value.as_str(), &cell_format)?;
        }

        if let Some(artifact) = order.artifact_path.as_deref() {
            if Path::new(artifact).exists() {
                match Image::new(artifact) {
                    Ok(image) => {
                        worksheet.insert_image_fit_to_cell(row, IMAGE_COLUMN, &image, true)?;
                    }
                    Err(e) => warn!("订单 {} 的截图无法读取: {}", order.record.order_id, e),
                }
            } else {
                warn!("订单 {} 的截图不存在: {}", order.record.order_id, artifact);
            }
        }
    }

    workbook.save(path)?;
    info!("✅ Excel 报告 '{}' 已成功生成！", path.display());
    Ok(orders.len())
}

/// 文本列（不含截图列）
fn row_values(order: &StoredOrder) -> [String; 10] {
    let r = &order.record;
    let text = |v: &Option<String>| v.clone().unwrap_or_default();
    [
        r.order_id.clone(),
        text(&r.shop_name),
        text(&r.item_title),
        text(&r.item_sku_title),
        text(&r.order_status),
        r.sub_order_desc.clone(),
        text(&r.total_price),
        text(&r.creation_time),
        text(&r.payment_time),
        text(&order.artifact_path),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderRecord, ProcessingStatus};
    use tempfile::tempdir;

    fn completed(id: i64, order_id: &str, artifact: &str) -> StoredOrder {
        StoredOrder {
            id,
            record: OrderRecord {
                shop_name: Some("小店".into()),
                total_price: Some("19.90".into()),
                ..OrderRecord::new(order_id)
            },
            status: ProcessingStatus::Completed,
            artifact_path: Some(artifact.to_string()),
        }
    }

    #[test]
    fn test_row_values_follow_header_order() {
        let order = completed(1, "A1", "screenshots/A1.png");
        let values = row_values(&order);
        assert_eq!(values.len(), HEADERS.len() - 1);
        assert_eq!(values[0], "A1");
        assert_eq!(values[1], "小店");
        assert_eq!(values[6], "19.90");
        assert_eq!(values[9], "screenshots/A1.png");
    }

    #[test]
    fn test_render_report_with_missing_screenshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.xlsx");

        let rows = render_report(&[completed(1, "A1", "does/not/exist.png")], &path).unwrap();
        assert_eq!(rows, 1);
        assert!(path.exists());
    }
}
