//! Looking up image data for the references found by the scanner.
//!
//! Resolution is asynchronous so that a stuck lookup can be abandoned after
//! a deadline; the lopdf-backed resolver does its decoding on the blocking
//! thread pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use log::debug;
use lopdf::{Dictionary, Document, Object, Stream};
use tokio::time::timeout;

use crate::colors::{unpack_samples, ColorSpace};
use crate::error::{ConvertError, ConvertResult};
use crate::objects::{self, maybe_get, maybe_get_obj};
use crate::scanner::ImageRef;

/// Largest pixel count decoded from raw samples.
const MAX_PIXELS: u64 = 1 << 28;

/// Decoded pixels of an embedded image.
#[derive(Clone, Debug)]
pub enum RawImage {
    /// A fully decoded image, e.g. from a JPEG stream.
    Bitmap(DynamicImage),
    /// Packed 8-bit RGB, or RGBA when `has_alpha` is set.
    Raster {
        bytes: Vec<u8>,
        width: u32,
        height: u32,
        has_alpha: bool,
    },
}

impl RawImage {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            RawImage::Bitmap(img) => (img.width(), img.height()),
            RawImage::Raster { width, height, .. } => (*width, *height),
        }
    }
}

#[async_trait]
pub trait ImageResolver: Send + Sync {
    /// Fetch and decode the image behind `reference`.
    async fn resolve(&self, reference: &ImageRef) -> ConvertResult<RawImage>;
}

/// Resolve `reference`, giving up after `deadline`.
pub async fn resolve_with_deadline<R>(resolver: &R, reference: &ImageRef, deadline: Duration) -> ConvertResult<RawImage>
where
    R: ImageResolver + ?Sized,
{
    timeout(deadline, resolver.resolve(reference))
        .await
        .map_err(|_| ConvertError::ImageTimeout(deadline))?
}

/// Resolves images from the object table of a loaded document.
#[derive(Clone, Debug)]
pub struct LopdfResolver {
    doc: Arc<Document>,
}

impl LopdfResolver {
    pub fn new(doc: Arc<Document>) -> Self {
        LopdfResolver { doc }
    }
}

/// Raises its flag when dropped, telling a detached decode to stop.
struct AbortOnDrop(Arc<AtomicBool>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl ImageResolver for LopdfResolver {
    async fn resolve(&self, reference: &ImageRef) -> ConvertResult<RawImage> {
        let doc = self.doc.clone();
        let reference = reference.clone();
        let abort = Arc::new(AtomicBool::new(false));
        // Dropped with this future, e.g. when the deadline fires.
        let _guard = AbortOnDrop(abort.clone());
        tokio::task::spawn_blocking(move || decode_image_ref_until(&doc, &reference, &abort)).await?
    }
}

/// Synchronously decode the image behind `reference`.
///
/// Every failure is reported as image-local, so a broken image never
/// aborts the page it sits on.
pub fn decode_image_ref(doc: &Document, reference: &ImageRef) -> ConvertResult<RawImage> {
    decode_image_ref_until(doc, reference, &AtomicBool::new(false))
}

fn decode_image_ref_until(doc: &Document, reference: &ImageRef, abort: &AtomicBool) -> ConvertResult<RawImage> {
    let decoded = match reference {
        ImageRef::Object(id) => {
            let stream = doc
                .get_object(*id)
                .and_then(Object::as_stream)
                .map_err(|e| ConvertError::UnsupportedImage(format!("image {:?}: {}", id, e)))?;
            decode_pixels(doc, stream, true, abort)
        }
        ImageRef::Inline(stream) => {
            let expanded = Stream::new(expand_inline_dict(&stream.dict), stream.content.clone()).with_compression(false);
            decode_pixels(doc, &expanded, true, abort)
        }
    };
    decoded.map_err(|e| {
        if e.is_image_local() {
            e
        } else {
            ConvertError::UnsupportedImage(e.to_string())
        }
    })
}

/// Decode an image XObject (or expanded inline image) stream.
pub fn decode_image(doc: &Document, stream: &Stream) -> ConvertResult<RawImage> {
    decode_pixels(doc, stream, true, &AtomicBool::new(false))
}

fn check_abort(abort: &AtomicBool) -> ConvertResult<()> {
    if abort.load(Ordering::Relaxed) {
        Err(ConvertError::Cancelled)
    } else {
        Ok(())
    }
}

fn decode_pixels(doc: &Document, stream: &Stream, apply_soft_mask: bool, abort: &AtomicBool) -> ConvertResult<RawImage> {
    let dict = &stream.dict;
    check_abort(abort)?;
    let data = match filtered_data(doc, stream)? {
        ImageData::Jpeg(bytes) => {
            let img = image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg)?;
            return Ok(RawImage::Bitmap(img));
        }
        ImageData::Samples(bytes) => bytes,
    };
    check_abort(abort)?;

    let width = dimension(doc, dict, b"Width")?;
    let height = dimension(doc, dict, b"Height")?;
    if width as u64 * height as u64 > MAX_PIXELS {
        return Err(ConvertError::UnsupportedImage(format!("{}x{} image is too large", width, height)));
    }

    let image_mask = maybe_get::<bool>(doc, dict, b"ImageMask").unwrap_or(false);
    let (color_space, bpc) = if image_mask {
        (ColorSpace::DeviceGray, 1)
    } else {
        let cs = maybe_get_obj(doc, dict, b"ColorSpace")
            .ok_or_else(|| ConvertError::UnsupportedImage("image without ColorSpace".to_string()))?;
        let bpc = maybe_get::<i64>(doc, dict, b"BitsPerComponent").unwrap_or(8);
        (ColorSpace::from_object(doc, cs, None)?, bpc.clamp(0, 255) as u8)
    };

    let indexed = matches!(color_space, ColorSpace::Indexed { .. });
    let mut samples = unpack_samples(
        &data,
        width as usize,
        height as usize,
        color_space.components(),
        bpc,
        !indexed,
    )?;
    drop(data);
    check_abort(abort)?;
    if !indexed && color_space.components() == 1 && inverted_decode(doc, dict) {
        samples.iter_mut().for_each(|s| *s = 255 - *s);
    }
    let rgb = color_space.to_rgb(&samples);
    drop(samples);
    check_abort(abort)?;

    let alpha = if apply_soft_mask { soft_mask(doc, dict, width, height, abort) } else { None };
    check_abort(abort)?;
    match alpha {
        Some(alpha) => {
            let bytes = rgb
                .chunks_exact(3)
                .zip(alpha)
                .flat_map(|(p, a)| [p[0], p[1], p[2], a])
                .collect();
            Ok(RawImage::Raster { bytes, width, height, has_alpha: true })
        }
        None => Ok(RawImage::Raster { bytes: rgb, width, height, has_alpha: false }),
    }
}

enum ImageData {
    Jpeg(Vec<u8>),
    Samples(Vec<u8>),
}

fn filter_names(doc: &Document, dict: &Dictionary) -> Vec<Vec<u8>> {
    match maybe_get_obj(doc, dict, b"Filter") {
        Some(Object::Name(name)) => vec![name.clone()],
        Some(Object::Array(filters)) => filters
            .iter()
            .filter_map(|f| objects::maybe_deref(doc, f).ok())
            .filter_map(|f| f.as_name().ok())
            .map(<[u8]>::to_vec)
            .collect(),
        _ => Vec::new(),
    }
}

fn filtered_data(doc: &Document, stream: &Stream) -> ConvertResult<ImageData> {
    let filters = filter_names(doc, &stream.dict);
    if let Some(f) = filters
        .iter()
        .find(|f| matches!(f.as_slice(), b"JPXDecode" | b"JBIG2Decode" | b"CCITTFaxDecode"))
    {
        return Err(ConvertError::UnsupportedImage(String::from_utf8_lossy(f).to_string()));
    }

    let decode_err = |e: lopdf::Error| ConvertError::UnsupportedImage(format!("failed to decode image stream: {}", e));
    match filters.split_last() {
        None => Ok(ImageData::Samples(stream.content.clone())),
        Some((last, [])) if last == b"DCTDecode" => Ok(ImageData::Jpeg(stream.content.clone())),
        Some((last, outer)) if last == b"DCTDecode" => {
            let mut dict = stream.dict.clone();
            let outer: Vec<Object> = outer.iter().map(|f| Object::Name(f.clone())).collect();
            dict.set("Filter", outer);
            if let Ok(Object::Array(parms)) = stream.dict.get(b"DecodeParms") {
                let mut parms = parms.clone();
                parms.pop();
                dict.set("DecodeParms", parms);
            }
            let outer_stream = Stream::new(dict, stream.content.clone()).with_compression(false);
            outer_stream.decompressed_content().map(ImageData::Jpeg).map_err(decode_err)
        }
        Some(_) => stream.decompressed_content().map(ImageData::Samples).map_err(decode_err),
    }
}

fn dimension(doc: &Document, dict: &Dictionary, key: &[u8]) -> ConvertResult<u32> {
    match maybe_get::<i64>(doc, dict, key) {
        Some(v) if v > 0 && v <= u32::MAX as i64 => Ok(v as u32),
        Some(v) => Err(ConvertError::UnsupportedImage(format!(
            "{} of {}",
            String::from_utf8_lossy(key),
            v
        ))),
        None => Err(ConvertError::UnsupportedImage(format!("missing {}", String::from_utf8_lossy(key)))),
    }
}

fn inverted_decode(doc: &Document, dict: &Dictionary) -> bool {
    match maybe_get::<Vec<f64>>(doc, dict, b"Decode").as_deref() {
        Some([d0, d1, ..]) => d0 > d1,
        _ => false,
    }
}

/// Alpha channel from `/SMask`, when it decodes to the image's size.
fn soft_mask(doc: &Document, dict: &Dictionary, width: u32, height: u32, abort: &AtomicBool) -> Option<Vec<u8>> {
    let smask = maybe_get_obj(doc, dict, b"SMask")?.as_stream().ok()?;
    let alpha = match decode_pixels(doc, smask, false, abort) {
        Ok(RawImage::Bitmap(img)) if img.width() == width && img.height() == height => img.to_luma8().into_raw(),
        Ok(RawImage::Raster { bytes, width: w, height: h, has_alpha: false }) if w == width && h == height => {
            bytes.chunks_exact(3).map(|p| p[0]).collect()
        }
        Ok(other) => {
            debug!("Ignoring soft mask of size {:?} for {}x{} image", other.dimensions(), width, height);
            return None;
        }
        Err(e) => {
            debug!("Ignoring undecodable soft mask: {}", e);
            return None;
        }
    };
    Some(alpha)
}

/// Expand the abbreviated keys and values allowed in inline image
/// dictionaries to their full XObject names.
fn expand_inline_dict(dict: &Dictionary) -> Dictionary {
    let mut expanded = Dictionary::new();
    for (key, value) in dict.iter() {
        let key: &[u8] = match key.as_slice() {
            b"W" => b"Width",
            b"H" => b"Height",
            b"CS" => b"ColorSpace",
            b"BPC" => b"BitsPerComponent",
            b"F" => b"Filter",
            b"DP" => b"DecodeParms",
            b"IM" => b"ImageMask",
            b"D" => b"Decode",
            b"I" => b"Interpolate",
            other => other,
        };
        expanded.set(key.to_vec(), expand_inline_value(value));
    }
    expanded
}

fn expand_inline_value(value: &Object) -> Object {
    match value {
        Object::Name(name) => Object::Name(expand_inline_name(name).to_vec()),
        Object::Array(items) => Object::Array(items.iter().map(expand_inline_value).collect()),
        other => other.clone(),
    }
}

fn expand_inline_name(name: &[u8]) -> &[u8] {
    match name {
        b"G" => b"DeviceGray",
        b"RGB" => b"DeviceRGB",
        b"CMYK" => b"DeviceCMYK",
        b"I" => b"Indexed",
        b"AHx" => b"ASCIIHexDecode",
        b"A85" => b"ASCII85Decode",
        b"LZW" => b"LZWDecode",
        b"Fl" => b"FlateDecode",
        b"RL" => b"RunLengthDecode",
        b"CCF" => b"CCITTFaxDecode",
        b"DCT" => b"DCTDecode",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn gray_image(doc: &mut Document, width: i64, height: i64, data: Vec<u8>) -> lopdf::ObjectId {
        doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            data,
        ))
    }

    #[test_log::test]
    fn gray_samples_become_rgb() {
        let mut doc = Document::with_version("1.5");
        let id = gray_image(&mut doc, 2, 1, vec![0, 200]);
        let raw = decode_image_ref(&doc, &ImageRef::Object(id)).unwrap();
        match raw {
            RawImage::Raster { bytes, width, height, has_alpha } => {
                assert_eq!((width, height, has_alpha), (2, 1, false));
                assert_eq!(bytes, vec![0, 0, 0, 200, 200, 200]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test_log::test]
    fn flate_compressed_samples_are_decoded() {
        let mut doc = Document::with_version("1.5");
        let mut stream = Stream::new(
            dictionary! {
                "Subtype" => "Image",
                "Width" => 1,
                "Height" => 1,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            vec![10, 20, 30],
        );
        stream.compress().unwrap();
        let id = doc.add_object(stream);
        let raw = decode_image_ref(&doc, &ImageRef::Object(id)).unwrap();
        assert!(matches!(raw, RawImage::Raster { ref bytes, .. } if bytes == &vec![10, 20, 30]));
    }

    #[test_log::test]
    fn soft_mask_becomes_alpha() {
        let mut doc = Document::with_version("1.5");
        let mask = gray_image(&mut doc, 2, 1, vec![255, 0]);
        let id = doc.add_object(Stream::new(
            dictionary! {
                "Subtype" => "Image",
                "Width" => 2,
                "Height" => 1,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "SMask" => mask,
            },
            vec![50, 60],
        ));
        let raw = decode_image_ref(&doc, &ImageRef::Object(id)).unwrap();
        match raw {
            RawImage::Raster { bytes, has_alpha, .. } => {
                assert!(has_alpha);
                assert_eq!(bytes, vec![50, 50, 50, 255, 60, 60, 60, 0]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test_log::test]
    fn inline_abbreviations_are_expanded() {
        let doc = Document::with_version("1.5");
        let inline = Stream::new(
            dictionary! { "W" => 8, "H" => 1, "IM" => true, "D" => vec![1.into(), 0.into()] },
            vec![0b1111_0000],
        );
        let raw = decode_image_ref(&doc, &ImageRef::Inline(Box::new(inline))).unwrap();
        match raw {
            RawImage::Raster { bytes, width, .. } => {
                assert_eq!(width, 8);
                // inverted stencil: set bits paint black
                assert_eq!(&bytes[..3], &[0, 0, 0]);
                assert_eq!(&bytes[21..], &[255, 255, 255]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test_log::test]
    fn unsupported_filters_and_missing_fields_are_image_local() {
        let mut doc = Document::with_version("1.5");
        let jpx = doc.add_object(Stream::new(
            dictionary! { "Subtype" => "Image", "Width" => 30, "Height" => 30, "Filter" => "JPXDecode" },
            vec![0; 16],
        ));
        let err = decode_image_ref(&doc, &ImageRef::Object(jpx)).unwrap_err();
        assert!(err.is_image_local(), "{err}");

        let no_cs = doc.add_object(Stream::new(dictionary! { "Subtype" => "Image", "Width" => 1, "Height" => 1 }, vec![0]));
        let err = decode_image_ref(&doc, &ImageRef::Object(no_cs)).unwrap_err();
        assert!(err.is_image_local(), "{err}");
    }

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40])));
        let mut out = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Jpeg).unwrap();
        out
    }

    fn rgb_image_dict(width: i64, height: i64) -> Dictionary {
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width,
            "Height" => height,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        }
    }

    #[test_log::test]
    fn dct_streams_decode_as_jpeg() {
        let mut doc = Document::with_version("1.5");
        let mut dict = rgb_image_dict(16, 8);
        dict.set("Filter", "DCTDecode");
        let id = doc.add_object(Stream::new(dict, jpeg_bytes(16, 8)).with_compression(false));

        let raw = decode_image_ref(&doc, &ImageRef::Object(id)).unwrap();
        assert!(matches!(raw, RawImage::Bitmap(_)));
        assert_eq!(raw.dimensions(), (16, 8));
    }

    #[test_log::test]
    fn jpeg_wrapped_in_flate_is_unwrapped_first() {
        let mut doc = Document::with_version("1.5");
        let mut jpeg = jpeg_bytes(24, 12);
        // trailing bytes after EOI keep the flate pass worthwhile
        jpeg.extend(std::iter::repeat_n(0u8, 4096));
        let mut stream = Stream::new(rgb_image_dict(24, 12), jpeg);
        stream.compress().unwrap();
        stream.dict.set(
            "Filter",
            vec![Object::Name(b"FlateDecode".to_vec()), Object::Name(b"DCTDecode".to_vec())],
        );
        let id = doc.add_object(stream);

        let raw = decode_image_ref(&doc, &ImageRef::Object(id)).unwrap();
        assert_eq!(raw.dimensions(), (24, 12));
    }

    #[test_log::test]
    fn raised_abort_flag_stops_decoding() {
        let mut doc = Document::with_version("1.5");
        let id = gray_image(&mut doc, 2, 1, vec![0, 200]);
        let err = decode_image_ref_until(&doc, &ImageRef::Object(id), &AtomicBool::new(true)).unwrap_err();
        assert!(err.is_image_local(), "{err}");
    }

    #[test]
    fn dropped_guard_raises_abort_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        drop(AbortOnDrop(flag.clone()));
        assert!(flag.load(Ordering::Relaxed));
    }

    struct Stalled;

    #[async_trait]
    impl ImageResolver for Stalled {
        async fn resolve(&self, _reference: &ImageRef) -> ConvertResult<RawImage> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(ConvertError::UnsupportedImage("unreachable".to_string()))
        }
    }

    #[test_log::test(tokio::test)]
    async fn deadline_turns_into_timeout_error() {
        let reference = ImageRef::Object((1, 0));
        let err = resolve_with_deadline(&Stalled, &reference, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::ImageTimeout(d) if d == Duration::from_millis(20)));
    }

    #[test_log::test(tokio::test)]
    async fn lopdf_resolver_decodes_on_blocking_pool() {
        let mut doc = Document::with_version("1.5");
        let id = gray_image(&mut doc, 3, 2, vec![1, 2, 3, 4, 5, 6]);
        let resolver = LopdfResolver::new(Arc::new(doc));
        let raw = resolve_with_deadline(&resolver, &ImageRef::Object(id), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(raw.dimensions(), (3, 2));
    }
}
