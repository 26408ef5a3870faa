//! Font dictionaries: character-code iteration, glyph widths and Unicode
//! decoding for the fonts a content stream selects with `Tf`.

use std::{collections::HashMap, fmt::Debug, slice::Iter, sync::Arc};

use adobe_cmap_parser::{ByteMapping, CIDRange, CodeRange};
use cff_parser::Table;
use log::{debug, warn};
use lopdf::{Dictionary, Document, Object};

use crate::encodings::{self, PDF_DOC_ENCODING};
use crate::error::{ConvertError, ConvertResult};
use crate::metrics;
use crate::objects::{self, get, get_contents, get_name_string, maybe_get, maybe_get_array, maybe_get_name};

pub type CharCode = u32;

pub trait PdfFont: Debug + Send + Sync {
    /// Advance width of `code` in thousandths of text space units.
    fn get_width(&self, code: CharCode) -> f64;
    fn next_char(&self, iter: &mut Iter<u8>) -> Option<(CharCode, u8)>;
    fn decode_char(&self, code: CharCode) -> String;
}

/// Largest CID a `/W` range may cover.
const MAX_CID: i64 = 0xFFFF;

// Advance for glyphs of a font without /Widths that the bundled core
// metrics do not cover.
fn fallback_width(base_name: &str) -> f64 {
    if base_name.starts_with("Courier") { 600.0 } else { 500.0 }
}

#[derive(Debug)]
pub struct PdfSimpleFont {
    base_name: String,
    encoding: Vec<u16>,
    differences: HashMap<CharCode, String>,
    unicode_map: Option<HashMap<CharCode, String>>,
    widths: HashMap<CharCode, f64>,
    missing_width: f64,
}

impl PdfSimpleFont {
    pub fn new(doc: &Document, font: &Dictionary) -> ConvertResult<Self> {
        let base_name = get_name_string(doc, font, b"BaseFont").unwrap_or_default();
        let subtype = get_name_string(doc, font, b"Subtype")?;
        debug!("Creating {} font: {}", subtype, base_name);

        let (encoding, differences) = load_encoding(doc, font, &subtype, &base_name)?;
        let unicode_map = get_unicode_map(doc, font).unwrap_or_else(|e| {
            warn!("Ignoring ToUnicode of {}: {}", base_name, e);
            None
        });
        let (widths, missing_width) = Self::load_widths(doc, font, &base_name, &encoding, &differences)?;

        Ok(Self { base_name, encoding, differences, unicode_map, widths, missing_width })
    }

    fn load_widths(
        doc: &Document,
        font: &Dictionary,
        base_name: &str,
        encoding: &[u16],
        differences: &HashMap<CharCode, String>,
    ) -> ConvertResult<(HashMap<CharCode, f64>, f64)> {
        let mut width_map = HashMap::new();
        let descriptor: Option<&Dictionary> = get(doc, font, b"FontDescriptor")?;
        let mut missing_width = descriptor
            .and_then(|d| maybe_get::<f64>(doc, d, b"MissingWidth"))
            .unwrap_or(0.0);

        if let (Some(first_char), Some(widths)) = (
            maybe_get::<i64>(doc, font, b"FirstChar"),
            maybe_get::<Vec<f64>>(doc, font, b"Widths"),
        ) {
            for (i, &width) in widths.iter().enumerate() {
                width_map.insert((first_char + i as i64) as CharCode, width);
            }
        } else {
            missing_width = fallback_width(base_name);
            width_map.extend((0..=255).filter_map(|code| {
                let text = decode_simple(None, differences, encoding, code);
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(ch), None) => metrics::core_width(base_name, ch).map(|w| (code, w)),
                    _ => None,
                }
            }));
            if width_map.is_empty() {
                debug!("No widths for font {}, using average advance", base_name);
            }
        }

        Ok((width_map, missing_width))
    }
}

fn load_encoding(
    doc: &Document,
    font: &Dictionary,
    subtype: &str,
    base_name: &str,
) -> ConvertResult<(Vec<u16>, HashMap<CharCode, String>)> {
    let encoding_obj: Option<&Object> = get(doc, font, b"Encoding")?;
    let default_table = || {
        if subtype == "TrueType" {
            encodings::win_ansi()
        } else if base_name.contains("Symbol") || base_name.contains("Dingbats") {
            Vec::from(PDF_DOC_ENCODING)
        } else {
            encodings::standard()
        }
    };

    match encoding_obj {
        Some(Object::Name(name)) => {
            let table = encodings::encoding_to_unicode_table(name).unwrap_or_else(|e| {
                warn!("{}: {}", base_name, e);
                default_table()
            });
            Ok((table, HashMap::new()))
        }
        Some(Object::Dictionary(dict)) => {
            let base = maybe_get_name(doc, dict, b"BaseEncoding");
            let table = base
                .and_then(|name| encodings::encoding_to_unicode_table(name).ok())
                .unwrap_or_else(default_table);
            let mut differences = match base {
                Some(_) => HashMap::new(),
                None => builtin_encoding(doc, font),
            };
            if let Some(entries) = maybe_get_array(doc, dict, b"Differences") {
                differences.extend(parse_differences(doc, entries)?);
            }
            Ok((table, differences))
        }
        None => Ok((default_table(), builtin_encoding(doc, font))),
        _ => Err(ConvertError::InvalidStructure("Invalid encoding type".to_string())),
    }
}

/// The encoding built into an embedded Type1 or CFF font program, as
/// code to text overrides.
fn builtin_encoding(doc: &Document, font: &Dictionary) -> HashMap<CharCode, String> {
    let mut map = HashMap::new();
    let Some(descriptor) = objects::maybe_get_obj(doc, font, b"FontDescriptor").and_then(|d| d.as_dict().ok()) else {
        return map;
    };

    if let Some(Object::Stream(s)) = objects::maybe_get_obj(doc, descriptor, b"FontFile") {
        match type1_encoding_parser::get_encoding_map(&get_contents(s)) {
            Ok(encoding_map) => {
                for (code, name) in encoding_map {
                    let Ok(name) = encodings::pdf_to_utf8(&name) else {
                        continue;
                    };
                    if let Some(text) = encodings::glyph_name_to_unicode(&name) {
                        if code >= 0 && (code as usize) < 256 {
                            map.insert(code as CharCode, text);
                        }
                    }
                }
            }
            Err(_) => debug!("No built-in encoding in Type1 font program"),
        }
    } else if let Some(Object::Stream(s)) = objects::maybe_get_obj(doc, descriptor, b"FontFile3") {
        if maybe_get_name(doc, &s.dict, b"Subtype") == Some(&b"Type1C"[..]) {
            let contents = get_contents(s);
            if let Some(cff) = Table::parse(&contents) {
                let charset = cff.charset.get_table();
                let encoding = cff.encoding.get_table();
                for (&code, &sid) in encoding.iter().zip(charset.iter()) {
                    let Some(name) = cff_parser::string_by_id(&cff, sid) else {
                        continue;
                    };
                    if let Some(text) = encodings::glyph_name_to_unicode(&name) {
                        map.insert(code as CharCode, text);
                    }
                }
            }
        }
    }
    map
}

fn parse_differences(doc: &Document, differences: &[Object]) -> ConvertResult<HashMap<CharCode, String>> {
    let mut map = HashMap::new();
    let mut code = 0i64;

    for obj in differences {
        match objects::maybe_deref(doc, obj)? {
            Object::Integer(i) => code = *i,
            Object::Name(n) => {
                let name = String::from_utf8_lossy(n);
                match encodings::glyph_name_to_unicode(&name) {
                    Some(text) if code >= 0 => {
                        map.insert(code as CharCode, text);
                    }
                    _ => debug!("Unknown glyph name: {}", name),
                }
                code += 1;
            }
            _ => return Err(ConvertError::InvalidStructure("Invalid differences entry".to_string())),
        }
    }

    Ok(map)
}

fn decode_simple(
    unicode_map: Option<&HashMap<CharCode, String>>,
    differences: &HashMap<CharCode, String>,
    encoding: &[u16],
    code: CharCode,
) -> String {
    if let Some(s) = unicode_map.and_then(|m| m.get(&code)) {
        return s.clone();
    }
    if let Some(s) = differences.get(&code) {
        return s.clone();
    }
    let byte = (code & 0xFF) as u8;
    encodings::to_utf8(encoding, &[byte])
        .map(|s| s.trim_matches('\0').to_string())
        .unwrap_or_default()
}

impl PdfFont for PdfSimpleFont {
    fn get_width(&self, code: CharCode) -> f64 {
        self.widths.get(&code).copied().unwrap_or(self.missing_width)
    }

    fn next_char(&self, iter: &mut Iter<u8>) -> Option<(CharCode, u8)> {
        iter.next().map(|&b| (b as CharCode, 1))
    }

    fn decode_char(&self, code: CharCode) -> String {
        let s = decode_simple(self.unicode_map.as_ref(), &self.differences, &self.encoding, code);
        if s.is_empty() {
            debug!("Undecodable char {} in font {}", code, self.base_name);
        }
        s
    }
}

#[derive(Debug)]
pub struct PdfType3Font {
    encoding: Vec<u16>,
    differences: HashMap<CharCode, String>,
    unicode_map: Option<HashMap<CharCode, String>>,
    widths: HashMap<CharCode, f64>,
    // glyph space -> text space, horizontal component
    scale: f64,
}

impl PdfType3Font {
    pub fn new(doc: &Document, font: &Dictionary) -> ConvertResult<Self> {
        let (encoding, differences) = load_encoding(doc, font, "Type3", "")?;
        let unicode_map = get_unicode_map(doc, font).unwrap_or(None);
        let matrix: Option<Vec<f64>> = maybe_get(doc, font, b"FontMatrix");
        let scale = matrix.and_then(|m| m.first().copied()).unwrap_or(0.001);

        let mut widths = HashMap::new();
        if let (Some(first_char), Some(w)) = (
            maybe_get::<i64>(doc, font, b"FirstChar"),
            maybe_get::<Vec<f64>>(doc, font, b"Widths"),
        ) {
            for (i, &width) in w.iter().enumerate() {
                widths.insert((first_char + i as i64) as CharCode, width);
            }
        }

        Ok(Self { encoding, differences, unicode_map, widths, scale })
    }
}

impl PdfFont for PdfType3Font {
    fn get_width(&self, code: CharCode) -> f64 {
        self.widths.get(&code).copied().unwrap_or(0.0) * self.scale * 1000.0
    }

    fn next_char(&self, iter: &mut Iter<u8>) -> Option<(CharCode, u8)> {
        iter.next().map(|&b| (b as CharCode, 1))
    }

    fn decode_char(&self, code: CharCode) -> String {
        decode_simple(self.unicode_map.as_ref(), &self.differences, &self.encoding, code)
    }
}

#[derive(Debug)]
struct CidEncoding {
    codespace: Vec<CodeRange>,
    cid: Vec<CIDRange>,
}

impl From<ByteMapping> for CidEncoding {
    fn from(mapping: ByteMapping) -> Self {
        Self { codespace: mapping.codespace, cid: mapping.cid }
    }
}

impl CidEncoding {
    fn identity() -> Self {
        Self {
            codespace: vec![CodeRange { width: 2, start: 0, end: 0xffff }],
            cid: vec![CIDRange { src_code_lo: 0, src_code_hi: 0xffff, dst_CID_lo: 0 }],
        }
    }

    fn cid(&self, code: CharCode) -> CharCode {
        self.cid
            .iter()
            .find(|r| code >= r.src_code_lo && code <= r.src_code_hi)
            .map(|r| code - r.src_code_lo + r.dst_CID_lo)
            .unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct PdfCIDFont {
    encoding: CidEncoding,
    to_unicode: Option<HashMap<CharCode, String>>,
    widths: HashMap<CharCode, f64>,
    default_width: f64,
}

impl PdfCIDFont {
    pub fn new(doc: &Document, font: &Dictionary) -> ConvertResult<Self> {
        let base_name = get_name_string(doc, font, b"BaseFont").unwrap_or_default();
        debug!("Creating CID font: {}", base_name);

        let descendants = maybe_get_array(doc, font, b"DescendantFonts")
            .ok_or_else(|| ConvertError::MissingField("DescendantFonts".to_string()))?;
        let descendant = descendants
            .first()
            .ok_or_else(|| ConvertError::MissingField("DescendantFonts".to_string()))?;
        let cid_dict = objects::maybe_deref(doc, descendant)?
            .as_dict()
            .map_err(|_| ConvertError::InvalidStructure("Invalid CID dictionary".to_string()))?;

        let encoding = Self::load_encoding(doc, font)?;
        let to_unicode = get_unicode_map(doc, font)?;
        let (widths, default_width) = Self::load_widths(doc, cid_dict)?;

        Ok(Self { encoding, to_unicode, widths, default_width })
    }

    fn load_encoding(doc: &Document, font: &Dictionary) -> ConvertResult<CidEncoding> {
        let encoding_obj = objects::maybe_get_obj(doc, font, b"Encoding")
            .ok_or_else(|| ConvertError::MissingField("Encoding".to_string()))?;

        match encoding_obj {
            Object::Name(name) => match &name[..] {
                b"Identity-H" | b"Identity-V" => Ok(CidEncoding::identity()),
                other => {
                    warn!("Unsupported predefined CMap {}, assuming identity", String::from_utf8_lossy(other));
                    Ok(CidEncoding::identity())
                }
            },
            Object::Stream(stream) => adobe_cmap_parser::get_byte_mapping(&get_contents(stream))
                .map(CidEncoding::from)
                .map_err(|_| ConvertError::InvalidStructure("Invalid CMap".to_string())),
            _ => Err(ConvertError::InvalidStructure("Invalid encoding type".to_string())),
        }
    }

    fn load_widths(doc: &Document, cid_dict: &Dictionary) -> ConvertResult<(HashMap<CharCode, f64>, f64)> {
        let default_width = maybe_get::<f64>(doc, cid_dict, b"DW").unwrap_or(1000.0);
        let mut widths = HashMap::new();

        if let Some(w_array) = get::<Option<Vec<&Object>>>(doc, cid_dict, b"W")? {
            let mut i = 0;
            while i + 1 < w_array.len() {
                let first = w_array[i]
                    .as_i64()
                    .map_err(|_| ConvertError::InvalidStructure("Invalid CID".to_string()))?;
                if let Ok(array) = objects::maybe_deref(doc, w_array[i + 1])?.as_array() {
                    // c [w1 w2 ...]
                    for (j, w) in array.iter().enumerate() {
                        widths.insert((first + j as i64) as CharCode, objects::as_num(w)?);
                    }
                    i += 2;
                } else if i + 2 < w_array.len() {
                    // c_first c_last w
                    let last = w_array[i + 1]
                        .as_i64()
                        .map_err(|_| ConvertError::InvalidStructure("Invalid CID".to_string()))?;
                    let width = objects::as_num(w_array[i + 2])?;
                    if first < 0 || last < first || first > MAX_CID {
                        warn!("Skipping CID width range {}..={}", first, last);
                    } else {
                        if last > MAX_CID {
                            warn!("Clamping CID width range {}..={} to {}", first, last, MAX_CID);
                        }
                        for cid in first..=last.min(MAX_CID) {
                            widths.insert(cid as CharCode, width);
                        }
                    }
                    i += 3;
                } else {
                    break;
                }
            }
        }

        Ok((widths, default_width))
    }
}

impl PdfFont for PdfCIDFont {
    fn get_width(&self, code: CharCode) -> f64 {
        let cid = self.encoding.cid(code);
        self.widths.get(&cid).copied().unwrap_or(self.default_width)
    }

    fn next_char(&self, iter: &mut Iter<u8>) -> Option<(CharCode, u8)> {
        let bytes = iter.as_slice();
        let first = *bytes.first()?;
        let mut code = 0u32;
        for len in 1..=bytes.len().min(4) {
            code = (code << 8) | bytes[len - 1] as u32;
            let in_space = self
                .encoding
                .codespace
                .iter()
                .any(|r| r.width as usize == len && code >= r.start && code <= r.end);
            if in_space {
                for _ in 0..len {
                    iter.next();
                }
                return Some((code, len as u8));
            }
        }
        // Not covered by any codespace range: consume one byte.
        iter.next();
        Some((first as CharCode, 1))
    }

    fn decode_char(&self, code: CharCode) -> String {
        self.to_unicode
            .as_ref()
            .and_then(|map| map.get(&code))
            .cloned()
            .unwrap_or_else(|| {
                debug!("Unknown character {} in CID font", code);
                String::new()
            })
    }
}

pub fn make_font(doc: &Document, font: &Dictionary) -> ConvertResult<Arc<dyn PdfFont>> {
    let subtype = get_name_string(doc, font, b"Subtype")?;

    match subtype.as_str() {
        "Type0" => Ok(Arc::new(PdfCIDFont::new(doc, font)?)),
        "Type3" => Ok(Arc::new(PdfType3Font::new(doc, font)?)),
        _ => Ok(Arc::new(PdfSimpleFont::new(doc, font)?)),
    }
}

fn get_unicode_map(doc: &Document, font: &Dictionary) -> ConvertResult<Option<HashMap<CharCode, String>>> {
    match objects::maybe_get_obj(doc, font, b"ToUnicode") {
        Some(Object::Stream(stream)) => {
            let contents = get_contents(stream);
            let cmap = adobe_cmap_parser::get_unicode_map(&contents)
                .map_err(|_| ConvertError::InvalidStructure("Invalid ToUnicode CMap".to_string()))?;

            let mut unicode_map = HashMap::new();
            for (&k, v) in cmap.iter() {
                let utf16_values: Vec<u16> = v
                    .chunks_exact(2)
                    .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
                    .collect();

                match String::from_utf16(&utf16_values) {
                    Ok(s) => {
                        unicode_map.insert(k, s);
                    }
                    Err(_) => debug!("Invalid UTF-16 sequence for character {}", k),
                }
            }

            Ok(Some(unicode_map))
        }
        Some(Object::Name(name)) => {
            debug!("Ignoring predefined ToUnicode {}", String::from_utf8_lossy(name));
            Ok(None)
        }
        None => Ok(None),
        _ => Err(ConvertError::InvalidStructure("Invalid ToUnicode type".to_string())),
    }
}
