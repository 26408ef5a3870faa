//! Walks a page's operator list and records where images are painted.
//!
//! The vertical position tracked here is deliberately coarse: a `cm`
//! replaces the running Y with its translation operand instead of
//! concatenating matrices, and `q`/`Q` do not save or restore it.

use std::fmt;

use log::{debug, warn};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::objects::{self, get_contents, maybe_get_name};

/// Where the bytes of an image live.
#[derive(Clone, Debug, PartialEq)]
pub enum ImageRef {
    /// An image XObject stored as an indirect object.
    Object(ObjectId),
    /// An inline image (`BI … ID … EI`) or an image stream embedded
    /// directly in a resource dictionary.
    Inline(Box<Stream>),
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRef::Object((num, generation)) => write!(f, "image object {} {}", num, generation),
            ImageRef::Inline(stream) => write!(f, "inline image ({} bytes)", stream.content.len()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScannedImage {
    pub reference: ImageRef,
    pub y: f64,
}

#[derive(Debug, Default)]
struct ScanState {
    current_y: f64,
    images: Vec<ScannedImage>,
}

/// Collect every image painted by `operations`, in paint order, tagged
/// with the Y value current at the time it was painted.
///
/// Form XObjects are followed up to `max_form_depth` levels deep.
pub fn scan_page_images(
    doc: &Document,
    operations: &[Operation],
    resources: &Dictionary,
    max_form_depth: usize,
) -> Vec<ScannedImage> {
    let scanner = Scanner { doc, max_form_depth };
    scanner.scan(ScanState::default(), operations, resources, 0).images
}

struct Scanner<'a> {
    doc: &'a Document,
    max_form_depth: usize,
}

impl<'a> Scanner<'a> {
    fn scan(&self, state: ScanState, operations: &[Operation], resources: &Dictionary, depth: usize) -> ScanState {
        operations
            .iter()
            .fold(state, |state, op| self.step(state, op, resources, depth))
    }

    fn step(&self, mut state: ScanState, op: &Operation, resources: &Dictionary, depth: usize) -> ScanState {
        match op.operator.as_ref() {
            "cm" => match objects::as_matrix(&op.operands) {
                Some(m) => state.current_y = m[5],
                None => debug!("Ignoring malformed cm {:?}", op.operands),
            },
            "Do" => {
                let Some(name) = op.operands.first().and_then(|n| n.as_name().ok()) else {
                    debug!("Do without a name operand");
                    return state;
                };
                return self.paint_xobject(state, name, resources, depth);
            }
            "BI" => match inline_image(self.doc, &op.operands, resources) {
                Some(stream) => state.images.push(ScannedImage {
                    reference: ImageRef::Inline(Box::new(stream)),
                    y: state.current_y,
                }),
                None => debug!("Skipping inline image without data"),
            },
            _ => {}
        }
        state
    }

    fn paint_xobject(&self, mut state: ScanState, name: &[u8], resources: &Dictionary, depth: usize) -> ScanState {
        let doc = self.doc;
        let Some(entry) = objects::maybe_get_obj(doc, resources, b"XObject")
            .and_then(|x| x.as_dict().ok())
            .and_then(|x| x.get(name).ok())
        else {
            debug!("Unknown XObject {:?}", String::from_utf8_lossy(name));
            return state;
        };

        let (reference, stream) = match entry {
            Object::Reference(id) => match doc.get_object(*id).and_then(Object::as_stream) {
                Ok(stream) => (ImageRef::Object(*id), stream),
                Err(e) => {
                    warn!("XObject {:?} is not a stream: {}", id, e);
                    return state;
                }
            },
            Object::Stream(stream) => (ImageRef::Inline(Box::new(stream.clone())), stream),
            _ => {
                debug!("XObject {:?} is not a stream", String::from_utf8_lossy(name));
                return state;
            }
        };

        match maybe_get_name(doc, &stream.dict, b"Subtype") {
            Some(b"Image") => {
                state.images.push(ScannedImage { reference, y: state.current_y });
                state
            }
            Some(b"Form") => {
                if depth >= self.max_form_depth {
                    warn!("Form XObjects nested deeper than {}; not descending", self.max_form_depth);
                    return state;
                }
                let form_resources = objects::maybe_get_obj(doc, &stream.dict, b"Resources")
                    .and_then(|r| r.as_dict().ok())
                    .unwrap_or(resources);
                match Content::decode(&get_contents(stream)) {
                    Ok(content) => self.scan(state, &content.operations, form_resources, depth + 1),
                    Err(e) => {
                        warn!("Failed to decode form XObject: {}", e);
                        state
                    }
                }
            }
            other => {
                debug!("Ignoring XObject subtype {:?}", other.map(String::from_utf8_lossy));
                state
            }
        }
    }
}

/// Turn the operands of a `BI` operation into a stream.
///
/// A colour space given by resource name is replaced with its definition,
/// since the image is detached from the page's resources once recorded.
fn inline_image(doc: &Document, operands: &[Object], resources: &Dictionary) -> Option<Stream> {
    let mut stream = match operands.first()? {
        Object::Stream(stream) => stream.clone(),
        Object::Dictionary(dict) => {
            let data = match operands.get(1) {
                Some(Object::String(data, _)) => data.clone(),
                _ => return None,
            };
            Stream::new(dict.clone(), data).with_compression(false)
        }
        _ => return None,
    };

    for key in [&b"CS"[..], b"ColorSpace"] {
        let Some(name) = stream.dict.get(key).ok().and_then(|n| n.as_name().ok()) else {
            continue;
        };
        if is_device_space(name) {
            continue;
        }
        let named = objects::maybe_get_obj(doc, resources, b"ColorSpace")
            .and_then(|cs| cs.as_dict().ok())
            .and_then(|cs| objects::maybe_get_obj(doc, cs, name))
            .cloned();
        if let Some(named) = named {
            stream.dict.set(key.to_vec(), named);
        }
    }
    Some(stream)
}

fn is_device_space(name: &[u8]) -> bool {
    matches!(
        name,
        b"DeviceGray" | b"DeviceRGB" | b"DeviceCMYK" | b"G" | b"RGB" | b"CMYK" | b"I" | b"Indexed"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn op(operator: &str, operands: Vec<Object>) -> Operation {
        Operation::new(operator, operands)
    }

    fn cm(f: f64) -> Operation {
        op("cm", vec![100.into(), 0.into(), 0.into(), 50.into(), 72.into(), Object::Real(f as f32)])
    }

    fn image_doc() -> (Document, ObjectId, Dictionary) {
        let mut doc = Document::with_version("1.5");
        let img = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 2,
                "Height" => 2,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![0, 64, 128, 255],
        ));
        let resources = dictionary! { "XObject" => dictionary! { "Im0" => img } };
        (doc, img, resources)
    }

    #[test_log::test]
    fn images_take_y_of_latest_cm() {
        let (doc, img, resources) = image_doc();
        let ops = vec![
            cm(700.0),
            op("Do", vec![Object::Name(b"Im0".to_vec())]),
            cm(300.0),
            op("q", vec![]),
            op("Do", vec![Object::Name(b"Im0".to_vec())]),
            op("Q", vec![]),
            op("Do", vec![Object::Name(b"Im0".to_vec())]),
        ];
        let images = scan_page_images(&doc, &ops, &resources, 10);
        let ys: Vec<f64> = images.iter().map(|i| i.y).collect();
        assert_eq!(ys, vec![700.0, 300.0, 300.0]);
        assert!(images.iter().all(|i| i.reference == ImageRef::Object(img)));
    }

    #[test_log::test]
    fn image_before_any_cm_is_at_zero() {
        let (doc, _, resources) = image_doc();
        let ops = vec![op("Do", vec![Object::Name(b"Im0".to_vec())])];
        let images = scan_page_images(&doc, &ops, &resources, 10);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].y, 0.0);
    }

    #[test_log::test]
    fn unknown_names_and_malformed_cm_are_skipped() {
        let (doc, _, resources) = image_doc();
        let ops = vec![
            cm(500.0),
            op("cm", vec![1.into(), 0.into()]),
            op("Do", vec![Object::Name(b"Missing".to_vec())]),
            op("Do", vec![Object::Name(b"Im0".to_vec())]),
        ];
        let images = scan_page_images(&doc, &ops, &resources, 10);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].y, 500.0);
    }

    #[test_log::test]
    fn forms_are_descended_with_running_y() {
        let (mut doc, img, _) = image_doc();
        let form_content = Content { operations: vec![cm(250.0), op("Do", vec![Object::Name(b"Im0".to_vec())])] };
        let form = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![0.into(), 0.into(), 100.into(), 100.into()],
                "Resources" => dictionary! { "XObject" => dictionary! { "Im0" => img } },
            },
            form_content.encode().unwrap(),
        ));
        let resources = dictionary! { "XObject" => dictionary! { "Fm0" => form } };
        let ops = vec![cm(600.0), op("Do", vec![Object::Name(b"Fm0".to_vec())])];

        let images = scan_page_images(&doc, &ops, &resources, 10);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].y, 250.0);
        assert!(scan_page_images(&doc, &ops, &resources, 0).is_empty());
    }

    #[test_log::test]
    fn inline_images_resolve_named_colour_space() {
        let doc = Document::with_version("1.5");
        let resources = dictionary! {
            "ColorSpace" => dictionary! { "CS1" => vec![Object::Name(b"CalRGB".to_vec()), Object::Dictionary(Dictionary::new())] },
        };
        let inline = Stream::new(dictionary! { "W" => 1, "H" => 1, "CS" => "CS1", "BPC" => 8 }, vec![1, 2, 3]);
        let ops = vec![cm(42.0), op("BI", vec![Object::Stream(inline)])];

        let images = scan_page_images(&doc, &ops, &resources, 10);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].y, 42.0);
        let ImageRef::Inline(stream) = &images[0].reference else {
            panic!("expected inline image");
        };
        assert!(stream.dict.get(b"CS").unwrap().as_array().is_ok());
    }
}
