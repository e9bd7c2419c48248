//! TIFF micrographs and camera images.

use super::{Decoded, DecoderKind, Scalar};
use crate::error::EchemError;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

fn load(file: &str, bytes: &[u8]) -> Result<DynamicImage, EchemError> {
    image::load_from_memory_with_format(bytes, ImageFormat::Tiff)
        .map_err(|e| EchemError::decode(file, format!("unreadable TIFF: {e}")))
}

pub fn decode(file: &str, bytes: &[u8]) -> Result<Decoded, EchemError> {
    let image = load(file, bytes)?;
    let mut decoded = Decoded::new(DecoderKind::Tiff);
    decoded.technique = Some("TIF".to_string());
    decoded
        .metadata
        .insert("width".to_string(), Scalar::Int(i64::from(image.width())));
    decoded
        .metadata
        .insert("height".to_string(), Scalar::Int(i64::from(image.height())));
    decoded.metadata.insert(
        "color".to_string(),
        Scalar::Text(format!("{:?}", image.color())),
    );
    Ok(decoded)
}

/// Re-encodes a TIFF as PNG so browsers can show it.
pub fn png_preview(file: &str, bytes: &[u8]) -> Result<Vec<u8>, EchemError> {
    let image = load(file, bytes)?;
    let mut out = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|e| EchemError::decode(file, format!("PNG encoding failed: {e}")))?;
    Ok(out)
}

/// `image.tif` → `image.png`.
pub fn preview_name(file: &str) -> String {
    let stem = file
        .strip_suffix(".tiff")
        .or_else(|| file.strip_suffix(".tif"))
        .or_else(|| file.strip_suffix(".TIFF"))
        .or_else(|| file.strip_suffix(".TIF"))
        .unwrap_or(file);
    format!("{stem}.png")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn tiff_bytes() -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 2, image::Rgb([10, 20, 30])));
        let mut out = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Tiff)
            .unwrap();
        out
    }

    #[test]
    fn test_dimensions() {
        let decoded = decode("sem.tif", &tiff_bytes()).unwrap();
        assert_eq!(decoded.meta_f64("width"), Some(3.0));
        assert_eq!(decoded.meta_f64("height"), Some(2.0));
    }

    #[test]
    fn test_png_preview_has_png_signature() {
        let png = png_preview("sem.tif", &tiff_bytes()).unwrap();
        assert!(png.starts_with(b"\x89PNG"));
        assert_eq!(preview_name("dir/sem.tif"), "dir/sem.png");
    }

    #[test]
    fn test_garbage_is_decode_failure() {
        assert!(decode("x.tif", b"not an image").is_err());
    }
}
