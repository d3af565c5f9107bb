//! 截图裁剪 - 业务能力层
//!
//! 纯像素处理：先按固定框居中裁剪，再去掉与左上角颜色一致的边框。

use image::{DynamicImage, GenericImageView, ImageFormat, Rgba};

/// 最终截图尺寸
pub const FINAL_WIDTH: u32 = 640;
pub const FINAL_HEIGHT: u32 = 960;

/// 任一通道与背景色相差超过该值即视为内容
pub const TRIM_THRESHOLD: u8 = 100;

/// 水平居中、从顶部开始裁剪，超出原图的部分自动收缩
pub fn center_crop(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    let (img_w, img_h) = image.dimensions();
    let width = width.min(img_w);
    let height = height.min(img_h);
    let left = (img_w - width) / 2;
    image.crop_imm(left, 0, width, height)
}

/// 以左上角像素为背景色，裁掉四周的纯色边框
///
/// 整张图都是背景色时原样返回。
pub fn trim_border(image: &DynamicImage, threshold: u8) -> DynamicImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }

    let rgba = image.to_rgba8();
    let bg = *rgba.get_pixel(0, 0);

    let mut min_x = w;
    let mut min_y = h;
    let mut max_x = 0;
    let mut max_y = 0;
    let mut found = false;

    for (x, y, pixel) in rgba.enumerate_pixels() {
        if differs(pixel, &bg, threshold) {
            found = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    if !found {
        return image.clone();
    }
    image.crop_imm(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
}

fn differs(pixel: &Rgba<u8>, bg: &Rgba<u8>, threshold: u8) -> bool {
    pixel
        .0
        .iter()
        .zip(bg.0.iter())
        .any(|(a, b)| a.abs_diff(*b) > threshold)
}

/// 视口截图 → 居中裁剪 → 去边框 → PNG 字节
pub fn process_screenshot(raw_png: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let image = image::load_from_memory(raw_png)?;
    let cropped = center_crop(&image, FINAL_WIDTH, FINAL_HEIGHT);
    let trimmed = trim_border(&cropped, TRIM_THRESHOLD);

    let mut out = std::io::Cursor::new(Vec::new());
    trimmed.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    #[test]
    fn test_center_crop_takes_middle_columns() {
        let mut img = RgbaImage::from_pixel(1200, 1000, WHITE);
        // 中间 640 列的最左一列标黑
        for y in 0..1000 {
            img.put_pixel(280, y, BLACK);
        }
        let cropped = center_crop(&DynamicImage::ImageRgba8(img), 640, 960);
        assert_eq!(cropped.dimensions(), (640, 960));
        assert_eq!(cropped.to_rgba8().get_pixel(0, 10), &BLACK);
    }

    #[test]
    fn test_center_crop_clamps_to_small_images() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(300, 200, WHITE));
        assert_eq!(center_crop(&img, 640, 960).dimensions(), (300, 200));
    }

    #[test]
    fn test_trim_border_finds_content_box() {
        let mut img = RgbaImage::from_pixel(100, 80, WHITE);
        for x in 20..50 {
            for y in 10..30 {
                img.put_pixel(x, y, BLACK);
            }
        }
        // 浅灰噪点低于阈值，不算内容
        img.put_pixel(90, 70, Rgba([230, 230, 230, 255]));

        let trimmed = trim_border(&DynamicImage::ImageRgba8(img), TRIM_THRESHOLD);
        assert_eq!(trimmed.dimensions(), (30, 20));
    }

    #[test]
    fn test_trim_border_keeps_blank_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(40, 40, WHITE));
        assert_eq!(trim_border(&img, TRIM_THRESHOLD).dimensions(), (40, 40));
    }

    #[test]
    fn test_process_screenshot_round_trip() {
        let mut img = RgbaImage::from_pixel(1200, 1000, WHITE);
        for x in 400..800 {
            for y in 100..500 {
                img.put_pixel(x, y, BLACK);
            }
        }
        let mut raw = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut raw, ImageFormat::Png)
            .unwrap();

        let out = process_screenshot(raw.get_ref()).unwrap();
        let result = image::load_from_memory(&out).unwrap();
        assert_eq!(result.dimensions(), (400, 400));
    }

    #[test]
    fn test_invalid_png_is_error() {
        assert!(process_screenshot(b"not a png").is_err());
    }
}
