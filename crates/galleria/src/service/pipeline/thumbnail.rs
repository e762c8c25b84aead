//! Thumbnail generation for image uploads.

use std::io::Cursor;

use image::DynamicImage;

#[derive(Debug)]
pub struct ImageDerivation {
    pub thumbnail_jpeg: Vec<u8>,
    /// Display dimensions of the original, orientation applied.
    pub width: u32,
    pub height: u32,
}

/// Decodes the original, applies the EXIF orientation and produces a JPEG
/// thumbnail bounded by `max_edge`.
///
/// CPU-bound; callers run this under `spawn_blocking`.
pub fn derive_image(
    bytes: &[u8],
    max_edge: u32,
    orientation: Option<u16>,
) -> Result<ImageDerivation, image::ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    let oriented = apply_orientation(decoded, orientation);
    let (width, height) = (oriented.width(), oriented.height());

    // Originals already within bounds are re-encoded as-is, never upscaled.
    let thumbnail = if width <= max_edge && height <= max_edge {
        oriented
    } else {
        oriented.thumbnail(max_edge, max_edge)
    };
    let mut jpeg = Cursor::new(Vec::new());
    // JPEG has no alpha channel.
    DynamicImage::ImageRgb8(thumbnail.into_rgb8()).write_to(&mut jpeg, image::ImageFormat::Jpeg)?;

    Ok(ImageDerivation {
        thumbnail_jpeg: jpeg.into_inner(),
        width,
        height,
    })
}

/// The three rotation-only EXIF orientations. Mirrored variants (2, 4, 5,
/// 7) are rare in camera output and pass through untouched.
fn apply_orientation(image: DynamicImage, orientation: Option<u16>) -> DynamicImage {
    match orientation {
        Some(3) => image.rotate180(),
        Some(6) => image.rotate90(),
        Some(8) => image.rotate270(),
        _ => image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_of(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::new(width, height);
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn thumbnail_is_bounded_by_max_edge() {
        let derived = derive_image(&png_of(800, 600), 128, None).unwrap();
        assert_eq!((derived.width, derived.height), (800, 600));
        let thumb = image::load_from_memory(&derived.thumbnail_jpeg).unwrap();
        assert!(thumb.width() <= 128 && thumb.height() <= 128);
        assert_eq!(thumb.width(), 128);
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let derived = derive_image(&png_of(32, 16), 128, None).unwrap();
        let thumb = image::load_from_memory(&derived.thumbnail_jpeg).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (32, 16));
    }

    #[test]
    fn orientation_six_swaps_reported_dimensions() {
        let derived = derive_image(&png_of(800, 600), 128, Some(6)).unwrap();
        assert_eq!((derived.width, derived.height), (600, 800));
    }

    #[test]
    fn undecodable_bytes_error_out() {
        assert!(derive_image(b"definitely not an image", 128, None).is_err());
    }
}
