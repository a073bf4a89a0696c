//! RGB encoding of global ids for label display layers
//!
//! `R = id / 256^2`, `G = (id % 256^2) / 256`, `B = id % 256`. The encoding is
//! only lossless in PNG; ID layers must never be written as JPEG.

use image::{ImageBuffer, Rgb, RgbImage};

use crate::mosaic::Raster;

use super::types::LabelError;

/// Largest id an RGB triple can hold
pub const MAX_RGB_ID: u32 = 256 * 256 * 256 - 1;

pub fn encode(id: u32) -> Result<[u8; 3], LabelError> {
    if id > MAX_RGB_ID {
        return Err(LabelError::LabelOverflow {
            id: id as u64,
            max: MAX_RGB_ID,
        });
    }
    Ok([(id >> 16) as u8, (id >> 8) as u8, id as u8])
}

pub fn decode(rgb: [u8; 3]) -> u32 {
    (rgb[0] as u32) * 65536 + (rgb[1] as u32) * 256 + rgb[2] as u32
}

/// Encode a whole label raster; fails on the first id that does not fit
pub fn encode_raster(labels: &Raster<u32>) -> Result<RgbImage, LabelError> {
    let mut out = ImageBuffer::new(labels.width(), labels.height());
    for (src, dst) in labels.pixels().zip(out.pixels_mut()) {
        *dst = Rgb(encode(src.0[0])?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_channel_layout() {
        assert_eq!(encode(0).unwrap(), [0, 0, 0]);
        assert_eq!(encode(255).unwrap(), [0, 0, 255]);
        assert_eq!(encode(256).unwrap(), [0, 1, 0]);
        assert_eq!(encode(65536).unwrap(), [1, 0, 0]);
        assert_eq!(encode(MAX_RGB_ID).unwrap(), [255, 255, 255]);
    }

    #[test]
    fn test_decode_inverts_encode_over_full_range() {
        for id in 0..=MAX_RGB_ID {
            assert_eq!(decode(encode(id).unwrap()), id);
        }
    }

    #[test]
    fn test_overflow() {
        let err = encode(MAX_RGB_ID + 1).unwrap_err();
        assert!(matches!(err, LabelError::LabelOverflow { id: 16_777_216, .. }));
    }

    #[test]
    fn test_raster_encoding_and_overflow() {
        let labels: Raster<u32> = ImageBuffer::from_fn(4, 4, |x, y| Luma([x * 70_000 + y]));
        let rgb = encode_raster(&labels).unwrap();
        for (x, y, pixel) in rgb.enumerate_pixels() {
            assert_eq!(decode(pixel.0), labels.get_pixel(x, y).0[0]);
        }

        let too_big: Raster<u32> = ImageBuffer::from_pixel(2, 2, Luma([MAX_RGB_ID + 5]));
        assert!(encode_raster(&too_big).is_err());
    }
}
