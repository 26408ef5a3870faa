//! Colour spaces of image XObjects, reduced to what is needed to turn raw
//! samples into 8-bit RGB.

use log::debug;
use lopdf::{Dictionary, Document, Object};

use crate::error::{ConvertError, ConvertResult};
use crate::objects::{self, get_contents, maybe_get};

#[derive(Clone, Debug, PartialEq)]
pub enum ColorSpace {
    DeviceGray,
    DeviceRGB,
    DeviceCMYK,
    Indexed { base: Box<ColorSpace>, hival: u8, lookup: Vec<u8> },
}

fn unsupported(name: &[u8]) -> ConvertError {
    ConvertError::UnsupportedImage(format!("colour space {}", String::from_utf8_lossy(name)))
}

impl ColorSpace {
    /// Build a colour space from an image's `/ColorSpace` (or inline `/CS`)
    /// entry. Names not defined by PDF are looked up in the resource
    /// dictionary's `/ColorSpace` map.
    pub fn from_object(doc: &Document, obj: &Object, resources: Option<&Dictionary>) -> ConvertResult<ColorSpace> {
        match objects::maybe_deref(doc, obj)? {
            Object::Name(name) => Self::from_name(doc, name, resources),
            Object::Array(cs) => Self::from_array(doc, cs, resources),
            _ => Err(ConvertError::InvalidStructure("ColorSpace must be name or array".to_string())),
        }
    }

    fn from_name(doc: &Document, name: &[u8], resources: Option<&Dictionary>) -> ConvertResult<ColorSpace> {
        match name {
            b"DeviceGray" | b"G" | b"CalGray" => Ok(ColorSpace::DeviceGray),
            b"DeviceRGB" | b"RGB" | b"CalRGB" => Ok(ColorSpace::DeviceRGB),
            b"DeviceCMYK" | b"CMYK" => Ok(ColorSpace::DeviceCMYK),
            _ => {
                let named = resources
                    .and_then(|r| objects::maybe_get_obj(doc, r, b"ColorSpace"))
                    .and_then(|cs| cs.as_dict().ok())
                    .and_then(|cs| objects::maybe_get_obj(doc, cs, name))
                    .ok_or_else(|| unsupported(name))?;
                // Resource entries never refer back to resources.
                Self::from_object(doc, named, None)
            }
        }
    }

    fn from_array(doc: &Document, cs: &[Object], resources: Option<&Dictionary>) -> ConvertResult<ColorSpace> {
        let family = cs
            .first()
            .and_then(|n| n.as_name().ok())
            .ok_or_else(|| ConvertError::InvalidStructure("ColorSpace array must start with name".to_string()))?;

        match family {
            b"ICCBased" => {
                let stream = cs
                    .get(1)
                    .map(|s| objects::maybe_deref(doc, s))
                    .transpose()?
                    .and_then(|s| s.as_stream().ok())
                    .ok_or_else(|| ConvertError::MissingField("ICCBased stream".to_string()))?;
                match maybe_get::<i64>(doc, &stream.dict, b"N") {
                    Some(1) => Ok(ColorSpace::DeviceGray),
                    Some(3) => Ok(ColorSpace::DeviceRGB),
                    Some(4) => Ok(ColorSpace::DeviceCMYK),
                    _ => match objects::maybe_get_obj(doc, &stream.dict, b"Alternate") {
                        Some(alt) => Self::from_object(doc, alt, resources),
                        None => Err(unsupported(b"ICCBased")),
                    },
                }
            }
            b"Indexed" | b"I" => {
                let (Some(base), Some(hival), Some(lookup)) = (cs.get(1), cs.get(2), cs.get(3)) else {
                    return Err(ConvertError::InvalidStructure("Indexed needs base, hival and lookup".to_string()));
                };
                let base = Self::from_object(doc, base, resources)?;
                if matches!(base, ColorSpace::Indexed { .. }) {
                    return Err(ConvertError::InvalidStructure("Indexed base cannot be Indexed".to_string()));
                }
                let hival = objects::as_num(objects::maybe_deref(doc, hival)?)?.clamp(0.0, 255.0) as u8;
                let lookup = match objects::maybe_deref(doc, lookup)? {
                    Object::String(bytes, _) => bytes.clone(),
                    Object::Stream(stream) => get_contents(stream),
                    _ => return Err(ConvertError::InvalidStructure("Invalid Indexed lookup".to_string())),
                };
                Ok(ColorSpace::Indexed { base: Box::new(base), hival, lookup })
            }
            b"CalGray" => Ok(ColorSpace::DeviceGray),
            b"CalRGB" => Ok(ColorSpace::DeviceRGB),
            b"DeviceGray" | b"DeviceRGB" | b"DeviceCMYK" => Self::from_name(doc, family, resources),
            other => {
                debug!("Unsupported image colour space family {:?}", String::from_utf8_lossy(other));
                Err(unsupported(other))
            }
        }
    }

    pub fn components(&self) -> usize {
        match self {
            ColorSpace::DeviceGray | ColorSpace::Indexed { .. } => 1,
            ColorSpace::DeviceRGB => 3,
            ColorSpace::DeviceCMYK => 4,
        }
    }

    /// Convert unpacked 8-bit samples to packed RGB.
    ///
    /// For `Indexed`, `samples` holds palette indices rather than
    /// intensities.
    pub fn to_rgb(&self, samples: &[u8]) -> Vec<u8> {
        match self {
            ColorSpace::DeviceGray => samples.iter().flat_map(|&g| [g, g, g]).collect(),
            ColorSpace::DeviceRGB => samples.to_vec(),
            ColorSpace::DeviceCMYK => samples.chunks_exact(4).flat_map(|p| cmyk_to_rgb(p[0], p[1], p[2], p[3])).collect(),
            ColorSpace::Indexed { base, hival, lookup } => {
                let n = base.components();
                let mut entries = Vec::with_capacity(samples.len() * n);
                for &index in samples {
                    let start = index.min(*hival) as usize * n;
                    match lookup.get(start..start + n) {
                        Some(entry) => entries.extend_from_slice(entry),
                        None => entries.extend(std::iter::repeat_n(0, n)),
                    }
                }
                base.to_rgb(&entries)
            }
        }
    }
}

fn cmyk_to_rgb(c: u8, m: u8, y: u8, k: u8) -> [u8; 3] {
    let channel = |v: u8| ((255 - v as u32) * (255 - k as u32) / 255) as u8;
    [channel(c), channel(m), channel(y)]
}

/// Expand packed samples of `bpc` bits into one byte per sample.
///
/// Rows are padded to whole bytes. With `scale` set, values are stretched
/// to 0..=255 (intensities); otherwise they are kept as-is (palette indices).
pub fn unpack_samples(data: &[u8], width: usize, height: usize, components: usize, bpc: u8, scale: bool) -> ConvertResult<Vec<u8>> {
    let per_row = width * components;
    let row_bytes = (per_row * bpc as usize).div_ceil(8);
    if data.len() < row_bytes * height {
        return Err(ConvertError::UnsupportedImage(format!(
            "sample data too short: {} < {}",
            data.len(),
            row_bytes * height
        )));
    }

    match bpc {
        8 => Ok(data[..per_row * height].to_vec()),
        16 => Ok(data.chunks_exact(2).take(per_row * height).map(|p| p[0]).collect()),
        1 | 2 | 4 => {
            let max = (1u16 << bpc) - 1;
            let mut out = Vec::with_capacity(per_row * height);
            for row in data.chunks(row_bytes).take(height) {
                for i in 0..per_row {
                    let bit = i * bpc as usize;
                    let shift = 8 - bpc as usize - bit % 8;
                    let value = ((row[bit / 8] >> shift) as u16) & max;
                    out.push(if scale { (value * 255 / max) as u8 } else { value as u8 });
                }
            }
            Ok(out)
        }
        _ => Err(ConvertError::UnsupportedImage(format!("{} bits per component", bpc))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream, StringFormat};

    #[test]
    fn names_and_abbreviations() {
        let doc = Document::with_version("1.5");
        let gray = ColorSpace::from_object(&doc, &Object::Name(b"G".to_vec()), None).unwrap();
        assert_eq!(gray, ColorSpace::DeviceGray);
        let cmyk = ColorSpace::from_object(&doc, &Object::Name(b"DeviceCMYK".to_vec()), None).unwrap();
        assert_eq!(cmyk.components(), 4);
        assert!(ColorSpace::from_object(&doc, &Object::Name(b"Lab".to_vec()), None).is_err());
    }

    #[test]
    fn resource_named_icc_space() {
        let mut doc = Document::with_version("1.5");
        let icc = doc.add_object(Stream::new(dictionary! { "N" => 3 }, vec![]));
        let resources = dictionary! {
            "ColorSpace" => dictionary! { "CS0" => vec![Object::Name(b"ICCBased".to_vec()), icc.into()] },
        };
        let cs = ColorSpace::from_object(&doc, &Object::Name(b"CS0".to_vec()), Some(&resources)).unwrap();
        assert_eq!(cs, ColorSpace::DeviceRGB);
    }

    #[test]
    fn indexed_palette_lookup() {
        let doc = Document::with_version("1.5");
        let cs = vec![
            Object::Name(b"Indexed".to_vec()),
            Object::Name(b"DeviceRGB".to_vec()),
            Object::Integer(1),
            Object::String(vec![255, 0, 0, 0, 0, 255], StringFormat::Hexadecimal),
        ];
        let cs = ColorSpace::from_object(&doc, &Object::Array(cs), None).unwrap();
        assert_eq!(cs.to_rgb(&[1, 0, 7]), vec![0, 0, 255, 255, 0, 0, 0, 0, 255]);
    }

    #[test]
    fn cmyk_black_and_white() {
        assert_eq!(ColorSpace::DeviceCMYK.to_rgb(&[0, 0, 0, 255, 0, 0, 0, 0]), vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn unpacks_one_bit_rows_with_padding() {
        // 3 pixels per row, two rows, each row padded to one byte
        let data = [0b1010_0000, 0b0110_0000];
        assert_eq!(unpack_samples(&data, 3, 2, 1, 1, true).unwrap(), vec![255, 0, 255, 0, 255, 255]);
        assert_eq!(unpack_samples(&data, 3, 2, 1, 1, false).unwrap(), vec![1, 0, 1, 0, 1, 1]);
        assert!(unpack_samples(&data[..1], 3, 2, 1, 1, true).is_err());
        assert!(unpack_samples(&data, 3, 2, 1, 3, true).is_err());
    }
}
