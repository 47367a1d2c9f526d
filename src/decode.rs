//! Raw buffer to image decoding.
//!
//! The host hands the pipeline an opaque byte buffer plus a shape
//! descriptor. This module checks that the two are consistent before any
//! tensor work happens; a mismatch is a caller bug and is reported as an
//! explicit error rather than propagating into the inference runtime.

use image::RgbImage;

use crate::error::{FacepipeError, Result};

/// Interpret a raw byte buffer as an 8-bit RGB image.
///
/// `shape` must describe a row-major `[height, width, 3]` layout, optionally
/// with a leading batch dimension of 1. The buffer length must equal the
/// product of the shape dimensions.
pub fn decode_image(item: &[u8], shape: &[usize]) -> Result<RgbImage> {
    let (height, width, channels) = match *shape {
        [h, w, c] => (h, w, c),
        [1, h, w, c] => (h, w, c),
        _ => {
            return Err(FacepipeError::UnsupportedLayout(format!(
                "expected [H, W, C] or [1, H, W, C], got {:?}",
                shape
            )))
        }
    };

    if channels != 3 {
        return Err(FacepipeError::UnsupportedLayout(format!(
            "expected 3 channels, got {}",
            channels
        )));
    }
    if height == 0 || width == 0 {
        return Err(FacepipeError::UnsupportedLayout(format!(
            "degenerate image dimensions {}x{}",
            width, height
        )));
    }
    if height > u32::MAX as usize || width > u32::MAX as usize {
        return Err(FacepipeError::UnsupportedLayout(format!(
            "image dimensions {}x{} exceed the supported range",
            width, height
        )));
    }

    let expected = height
        .checked_mul(width)
        .and_then(|pixels| pixels.checked_mul(channels))
        .ok_or_else(|| {
            FacepipeError::UnsupportedLayout(format!("shape product overflows: {:?}", shape))
        })?;
    if item.len() != expected {
        return Err(FacepipeError::InvalidShape {
            expected,
            actual: item.len(),
        });
    }

    RgbImage::from_raw(width as u32, height as u32, item.to_vec())
        .ok_or_else(|| FacepipeError::Image("buffer does not fit image dimensions".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hwc_buffer() {
        let buffer = vec![0u8; 4 * 6 * 3];
        let img = decode_image(&buffer, &[4, 6, 3]).unwrap();
        assert_eq!(img.dimensions(), (6, 4));
    }

    #[test]
    fn test_decode_batched_layout() {
        let buffer = vec![255u8; 2 * 2 * 3];
        let img = decode_image(&buffer, &[1, 2, 2, 3]).unwrap();
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(img.get_pixel(1, 1).0, [255, 255, 255]);
    }

    #[test]
    fn test_decode_preserves_pixel_order() {
        // One row, two pixels: red then green
        let buffer = vec![255, 0, 0, 0, 255, 0];
        let img = decode_image(&buffer, &[1, 2, 3]).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(img.get_pixel(1, 0).0, [0, 255, 0]);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let buffer = vec![0u8; 100];
        let err = decode_image(&buffer, &[4, 6, 3]).unwrap_err();
        match err {
            FacepipeError::InvalidShape { expected, actual } => {
                assert_eq!(expected, 72);
                assert_eq!(actual, 100);
            }
            other => panic!("expected InvalidShape, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_rank_is_rejected() {
        let buffer = vec![0u8; 12];
        assert!(matches!(
            decode_image(&buffer, &[12]),
            Err(FacepipeError::UnsupportedLayout(_))
        ));
        assert!(matches!(
            decode_image(&buffer, &[2, 2, 3, 1]),
            Err(FacepipeError::UnsupportedLayout(_))
        ));
    }

    #[test]
    fn test_non_rgb_channels_rejected() {
        let buffer = vec![0u8; 4 * 6];
        assert!(matches!(
            decode_image(&buffer, &[4, 6, 1]),
            Err(FacepipeError::UnsupportedLayout(_))
        ));
    }

    #[test]
    fn test_huge_dimensions_rejected_without_panicking() {
        let err = decode_image(&[0u8; 16], &[1usize << 62, 2, 3]).unwrap_err();
        assert!(matches!(err, FacepipeError::UnsupportedLayout(_)));
    }

    #[test]
    fn test_shape_product_overflow_rejected() {
        let dim = u32::MAX as usize;
        let err = decode_image(&[0u8; 16], &[dim, dim, 3]).unwrap_err();
        assert!(matches!(err, FacepipeError::UnsupportedLayout(_)));
    }

    #[test]
    fn test_zero_sized_image_rejected() {
        assert!(matches!(
            decode_image(&[], &[0, 6, 3]),
            Err(FacepipeError::UnsupportedLayout(_))
        ));
    }
}
