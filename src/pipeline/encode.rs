//! Image encoding: PNG bytes, base64 payloads and region crops.
//!
//! PNG is used everywhere because it is lossless: text crispness matters
//! more to a vision model than file size, and figure crops end up embedded
//! in DOCX/HTML output where JPEG artefacts would be visible.

use crate::model::BBox;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode an image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Encode a rasterised page as a base64 PNG ready for a vision model.
///
/// `detail: "high"` lets GPT-4-class models tile the image instead of
/// downsampling it to a single 512 px overview, which loses small glyphs
/// in subscripts and table cells.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let b64 = STANDARD.encode(encode_png(img)?);
    debug!("Encoded page image → {} bytes base64", b64.len());
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Crop the normalized `bbox` out of a page raster and encode it as PNG.
///
/// Returns `None` when the crop rounds to zero pixels.
pub fn crop_png(page: &DynamicImage, bbox: &BBox) -> Result<Option<Vec<u8>>, image::ImageError> {
    let (w, h) = (page.width() as f64, page.height() as f64);
    let x0 = (bbox.x0 * w).floor().max(0.0) as u32;
    let y0 = (bbox.y0 * h).floor().max(0.0) as u32;
    let x1 = ((bbox.x1 * w).ceil() as u32).min(page.width());
    let y1 = ((bbox.y1 * h).ceil() as u32).min(page.height());
    if x1 <= x0 || y1 <= y0 {
        return Ok(None);
    }
    let crop = page.crop_imm(x0, y0, x1 - x0, y1 - y0);
    encode_png(&crop).map(Some)
}

/// `data:` URI for embedding PNG bytes directly in HTML.
pub fn png_data_uri(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

/// Pixel size of encoded image bytes, if they decode.
pub fn image_size(bytes: &[u8]) -> Option<(u32, u32)> {
    image::load_from_memory(bytes)
        .ok()
        .map(|img| (img.width(), img.height()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn page(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255])))
    }

    #[test]
    fn encode_small_image() {
        let data = encode_page(&page(10, 10)).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(decoded.starts_with(b"\x89PNG"));
    }

    #[test]
    fn crop_covers_normalized_box() {
        let bbox = BBox::new(0.25, 0.5, 0.75, 1.0).unwrap();
        let png = crop_png(&page(100, 40), &bbox).unwrap().expect("non-empty crop");
        assert_eq!(image_size(&png), Some((50, 20)));
    }

    #[test]
    fn data_uri_has_png_prefix() {
        let uri = png_data_uri(&[1, 2, 3]);
        assert!(uri.starts_with("data:image/png;base64,"));
    }
}
