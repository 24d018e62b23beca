//! Image encoding: `DynamicImage` → PNG bytes ready for delivery.
//!
//! PNG is lossless; spreadsheet captures are mostly thin text and gridlines,
//! which JPEG smears.

use crate::error::CaptureError;
use crate::pipeline::crop::{self, BoundingBox};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// The final image handed to the reply sink.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub image: DynamicImage,
    /// PNG-encoded `image`.
    pub png: Vec<u8>,
    /// The crop that was applied, if the margin was trimmed.
    pub crop: Option<BoundingBox>,
}

impl CapturedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn was_cropped(&self) -> bool {
        self.crop.is_some()
    }
}

/// Encode an image as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!(
        "Encoded {}x{} image → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

/// Optionally auto-crop `raw`, then PNG-encode it.
pub fn finish_capture(raw: DynamicImage, autocrop: bool) -> Result<CapturedImage, CaptureError> {
    let (image, crop) = if autocrop {
        match crop::auto_crop(&raw) {
            (cropped, Some(b)) if !b.is_full(raw.width(), raw.height()) => (cropped, Some(b)),
            (unchanged, _) => (unchanged, None),
        }
    } else {
        (raw, None)
    };

    let png = encode_png(&image)
        .map_err(|e| CaptureError::Internal(format!("PNG encoding failed: {e}")))?;

    Ok(CapturedImage { image, png, crop })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let png = encode_png(&img).expect("encode should succeed");
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));

        let decoded = image::load_from_memory(&png).expect("valid PNG");
        assert_eq!((decoded.width(), decoded.height()), (10, 10));
    }

    #[test]
    fn finish_capture_crops_when_enabled() {
        let mut buf = RgbImage::from_pixel(30, 30, Rgb([255, 255, 255]));
        buf.put_pixel(4, 5, Rgb([0, 0, 0]));
        buf.put_pixel(9, 7, Rgb([0, 0, 0]));
        let captured = finish_capture(DynamicImage::ImageRgb8(buf), true).unwrap();
        assert!(captured.was_cropped());
        assert_eq!((captured.width(), captured.height()), (6, 3));
    }

    #[test]
    fn finish_capture_keeps_raw_when_disabled() {
        let mut buf = RgbImage::from_pixel(30, 30, Rgb([255, 255, 255]));
        buf.put_pixel(4, 5, Rgb([0, 0, 0]));
        let captured = finish_capture(DynamicImage::ImageRgb8(buf), false).unwrap();
        assert!(!captured.was_cropped());
        assert_eq!((captured.width(), captured.height()), (30, 30));
    }
}
