use base64::Engine as _;
use dm_error::{DmError, Result};
use image::ImageFormat;
use std::io::Cursor;

pub const THUMBNAIL_MAX_EDGE: u32 = 400;

/// 缩放到最长边不超过 `max_edge` 的 PNG data URL
pub fn make_thumbnail(bytes: &[u8], max_edge: u32) -> Result<String> {
    let img = image::load_from_memory(bytes).map_err(|e| DmError::Image {
        message: format!("Failed to load image: {}", e),
    })?;
    let thumb = img.thumbnail(max_edge, max_edge);
    let mut out = Cursor::new(Vec::new());
    thumb
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| DmError::Image {
            message: format!("Failed to encode thumbnail: {}", e),
        })?;
    Ok(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(out.into_inner())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GenericImageView, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_thumbnail_is_downscaled_png() {
        let url = make_thumbnail(&png(1200, 600), THUMBNAIL_MAX_EDGE).unwrap();
        let payload = url.strip_prefix("data:image/png;base64,").unwrap();
        let raw = base64::engine::general_purpose::STANDARD.decode(payload).unwrap();
        let decoded = image::load_from_memory(&raw).unwrap();
        assert_eq!(decoded.dimensions(), (400, 200));
    }

    #[test]
    fn test_garbage_is_image_error() {
        let err = make_thumbnail(b"not an image", THUMBNAIL_MAX_EDGE).unwrap_err();
        assert!(matches!(err, DmError::Image { .. }));
    }
}
