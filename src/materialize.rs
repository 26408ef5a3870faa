use std::io::Cursor;

use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};

use crate::error::{ConvertError, ConvertResult};
use crate::resolver::RawImage;

/// A PNG-encoded image at its native pixel size.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Re-encode decoded pixels as PNG.
///
/// A raster whose buffer does not match its stated dimensions is rejected
/// as unsupported.
pub fn materialize(raw: RawImage) -> ConvertResult<EncodedImage> {
    let img = match raw {
        RawImage::Bitmap(img) => img,
        RawImage::Raster { bytes, width, height, has_alpha } => {
            let len = bytes.len();
            let buffer = if has_alpha {
                RgbaImage::from_raw(width, height, bytes).map(DynamicImage::ImageRgba8)
            } else {
                RgbImage::from_raw(width, height, bytes).map(DynamicImage::ImageRgb8)
            };
            buffer.ok_or_else(|| {
                ConvertError::UnsupportedImage(format!(
                    "{} bytes of pixel data do not fill a {}x{} image",
                    len, width, height
                ))
            })?
        }
    };

    let (width, height) = (img.width(), img.height());
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(EncodedImage { png, width, height })
}
