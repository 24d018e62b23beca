//! Auto-crop: trim the uniform white margin around rendered content.
//!
//! The exported page is mostly paper. To find the content we flatten the
//! image onto white, compare every pixel against white with an exact
//! per-channel test, and take the bounding box of everything that differs.
//! The crop is then applied to the original image, so alpha and colour
//! survive untouched in the delivered result.
//!
//! The comparison has no tolerance. Anti-aliased near-white edge pixels
//! count as content, which keeps the box tight around anything visible at
//! the cost of an occasional one-pixel fringe.

use image::{DynamicImage, Rgb, RgbImage};

/// The colour treated as empty background.
pub const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// Minimal rectangle enclosing all non-background pixels.
///
/// `right` and `bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }

    /// Whether the box covers the whole `width` × `height` image.
    pub fn is_full(&self, width: u32, height: u32) -> bool {
        self.left == 0 && self.top == 0 && self.right == width && self.bottom == height
    }
}

/// Flatten `image` onto the background colour as opaque RGB.
///
/// Alpha is blended with standard "over" compositing; images without an
/// alpha channel are just converted.
pub fn flatten_onto_background(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        out.put_pixel(
            x,
            y,
            Rgb([
                blend(r, BACKGROUND.0[0], a),
                blend(g, BACKGROUND.0[1], a),
                blend(b, BACKGROUND.0[2], a),
            ]),
        );
    }
    out
}

/// `fg` over `bg` with coverage `alpha`, rounded to nearest.
fn blend(fg: u8, bg: u8, alpha: u8) -> u8 {
    let a = alpha as u32;
    let v = fg as u32 * a + bg as u32 * (255 - a);
    ((v + 127) / 255) as u8
}

/// Bounding box of pixels that differ from the background in any channel.
///
/// `None` when the image is entirely background (or empty).
pub fn content_bounds(flat: &RgbImage) -> Option<BoundingBox> {
    let mut bounds: Option<BoundingBox> = None;
    for (x, y, px) in flat.enumerate_pixels() {
        if *px == BACKGROUND {
            continue;
        }
        bounds = Some(match bounds {
            None => BoundingBox {
                left: x,
                top: y,
                right: x + 1,
                bottom: y + 1,
            },
            Some(b) => BoundingBox {
                left: b.left.min(x),
                top: b.top.min(y),
                right: b.right.max(x + 1),
                bottom: b.bottom.max(y + 1),
            },
        });
    }
    bounds
}

/// Crop `image` to its content, or return it unchanged if it is blank.
///
/// Returns the resulting image and the box that was applied, if any.
pub fn auto_crop(image: &DynamicImage) -> (DynamicImage, Option<BoundingBox>) {
    let flat = flatten_onto_background(image);
    match content_bounds(&flat) {
        Some(b) if !b.is_full(image.width(), image.height()) => {
            let cropped = image.crop_imm(b.left, b.top, b.width(), b.height());
            (cropped, Some(b))
        }
        Some(b) => (image.clone(), Some(b)),
        None => (image.clone(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn white(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, BACKGROUND)
    }

    #[test]
    fn blank_image_is_returned_unchanged() {
        let img = DynamicImage::ImageRgb8(white(40, 30));
        let (out, bounds) = auto_crop(&img);
        assert_eq!(bounds, None);
        assert_eq!(out, img);
    }

    #[test]
    fn single_pixel_yields_one_by_one_crop() {
        let mut buf = white(50, 20);
        buf.put_pixel(17, 9, Rgb([0, 0, 0]));
        let img = DynamicImage::ImageRgb8(buf);

        let (out, bounds) = auto_crop(&img);
        assert_eq!(
            bounds,
            Some(BoundingBox {
                left: 17,
                top: 9,
                right: 18,
                bottom: 10
            })
        );
        assert_eq!((out.width(), out.height()), (1, 1));
        assert_eq!(out.to_rgb8().get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn near_white_counts_as_content() {
        let mut buf = white(10, 10);
        buf.put_pixel(2, 3, Rgb([255, 255, 254]));
        buf.put_pixel(6, 7, Rgb([254, 255, 255]));
        let (out, bounds) = auto_crop(&DynamicImage::ImageRgb8(buf));
        assert_eq!(
            bounds,
            Some(BoundingBox {
                left: 2,
                top: 3,
                right: 7,
                bottom: 8
            })
        );
        assert_eq!((out.width(), out.height()), (5, 5));
    }

    #[test]
    fn crop_is_idempotent() {
        let mut buf = white(64, 48);
        for x in 10..30 {
            buf.put_pixel(x, 12, Rgb([10, 20, 30]));
            buf.put_pixel(x, 40, Rgb([200, 0, 0]));
        }
        let img = DynamicImage::ImageRgb8(buf);
        let (once, _) = auto_crop(&img);
        let (twice, bounds) = auto_crop(&once);
        assert_eq!(once, twice);
        assert!(bounds.unwrap().is_full(once.width(), once.height()));
    }

    #[test]
    fn fully_transparent_image_is_not_cropped() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([12, 34, 56, 0])));
        let flat = flatten_onto_background(&img);
        assert!(flat.pixels().all(|p| *p == BACKGROUND));

        let (out, bounds) = auto_crop(&img);
        assert_eq!(bounds, None);
        assert_eq!(out, img);
    }

    #[test]
    fn crop_preserves_original_alpha() {
        let mut buf = RgbaImage::from_pixel(20, 20, Rgba([0, 0, 0, 0]));
        buf.put_pixel(5, 5, Rgba([255, 0, 0, 128]));
        buf.put_pixel(8, 6, Rgba([0, 0, 255, 255]));
        let img = DynamicImage::ImageRgba8(buf);

        let (out, bounds) = auto_crop(&img);
        assert_eq!(
            bounds,
            Some(BoundingBox {
                left: 5,
                top: 5,
                right: 9,
                bottom: 7
            })
        );
        assert!(out.color().has_alpha());
        let rgba = out.to_rgba8();
        assert_eq!(rgba.get_pixel(0, 0), &Rgba([255, 0, 0, 128]));
        assert_eq!(rgba.get_pixel(3, 1), &Rgba([0, 0, 255, 255]));
        assert_eq!(rgba.get_pixel(1, 0), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn blend_matches_over_operator() {
        assert_eq!(blend(0, 255, 255), 0);
        assert_eq!(blend(0, 255, 0), 255);
        assert_eq!(blend(0, 255, 128), 127);
        assert_eq!(blend(200, 255, 255), 200);
    }

    #[test]
    fn opaque_white_alpha_image_is_blank() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255])));
        assert_eq!(auto_crop(&img).1, None);
    }
}
