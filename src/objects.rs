//! Typed access to lopdf objects.
//!
//! Dictionary lookups follow indirect references transparently, and the
//! `FromObj` conversions turn loosely-typed PDF objects into the Rust types
//! the rest of the crate works with.

use std::collections::HashSet;

use log::warn;
use lopdf::{Dictionary, Document, Object, Stream};

use crate::encodings;
use crate::error::{ConvertError, ConvertResult};

/// Dereference an object if it's a reference
pub fn maybe_deref<'a>(doc: &'a Document, obj: &'a Object) -> ConvertResult<&'a Object> {
    match obj {
        Object::Reference(r) => doc.get_object(*r).map_err(ConvertError::Parse),
        _ => Ok(obj),
    }
}

/// Get object from dictionary with dereferencing
pub fn maybe_get_obj<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    dict.get(key).ok().and_then(|o| maybe_deref(doc, o).ok())
}

pub fn as_num(obj: &Object) -> ConvertResult<f64> {
    match obj {
        Object::Integer(i) => Ok(*i as f64),
        Object::Real(f) => Ok((*f).into()),
        _ => Err(ConvertError::InvalidStructure("Expected number".to_string())),
    }
}

/// Read six numeric operands as an affine matrix `[a b c d e f]`.
pub fn as_matrix(operands: &[Object]) -> Option<[f64; 6]> {
    if operands.len() != 6 {
        return None;
    }
    let mut m = [0.0; 6];
    for (slot, operand) in m.iter_mut().zip(operands) {
        *slot = as_num(operand).ok()?;
    }
    Some(m)
}

pub(crate) trait FromOptObj<'a>: Sized {
    fn from_opt_obj(doc: &'a Document, obj: Option<&'a Object>, key: &[u8]) -> ConvertResult<Self>;
}

pub(crate) trait FromObj<'a>: Sized {
    fn from_obj(doc: &'a Document, obj: &'a Object) -> ConvertResult<Self>;
}

impl<'a, T: FromObj<'a>> FromOptObj<'a> for Option<T> {
    fn from_opt_obj(doc: &'a Document, obj: Option<&'a Object>, _key: &[u8]) -> ConvertResult<Self> {
        match obj {
            Some(o) => T::from_obj(doc, o).map(Some),
            None => Ok(None),
        }
    }
}

impl<'a, T: FromObj<'a>> FromOptObj<'a> for T {
    fn from_opt_obj(doc: &'a Document, obj: Option<&'a Object>, key: &[u8]) -> ConvertResult<Self> {
        obj.ok_or_else(|| ConvertError::MissingField(String::from_utf8_lossy(key).to_string()))
            .and_then(|o| T::from_obj(doc, o))
    }
}

impl<'a, T: FromObj<'a>> FromObj<'a> for Vec<T> {
    fn from_obj(doc: &'a Document, obj: &'a Object) -> ConvertResult<Self> {
        maybe_deref(doc, obj)?
            .as_array()
            .map_err(|_| ConvertError::InvalidStructure("Expected array".to_string()))
            .and_then(|arr| arr.iter().map(|x| T::from_obj(doc, x)).collect::<ConvertResult<Vec<_>>>())
    }
}

impl<'a, T: FromObj<'a>, const N: usize> FromObj<'a> for [T; N] {
    fn from_obj(doc: &'a Document, obj: &'a Object) -> ConvertResult<Self> {
        let vec = Vec::<T>::from_obj(doc, obj)?;
        vec.try_into().map_err(|v: Vec<T>| {
            ConvertError::InvalidStructure(format!("Expected array of length {}, got {}", N, v.len()))
        })
    }
}

impl<'a> FromObj<'a> for f64 {
    fn from_obj(doc: &Document, obj: &Object) -> ConvertResult<Self> {
        as_num(maybe_deref(doc, obj)?)
    }
}

impl<'a> FromObj<'a> for i64 {
    fn from_obj(doc: &Document, obj: &Object) -> ConvertResult<Self> {
        match maybe_deref(doc, obj)? {
            Object::Integer(i) => Ok(*i),
            Object::Real(f) => Ok(*f as i64),
            _ => Err(ConvertError::InvalidStructure("Expected integer".to_string())),
        }
    }
}

impl<'a> FromObj<'a> for bool {
    fn from_obj(doc: &Document, obj: &Object) -> ConvertResult<Self> {
        match maybe_deref(doc, obj)? {
            Object::Boolean(b) => Ok(*b),
            _ => Err(ConvertError::InvalidStructure("Expected boolean".to_string())),
        }
    }
}

impl<'a> FromObj<'a> for &'a Dictionary {
    fn from_obj(doc: &'a Document, obj: &'a Object) -> ConvertResult<&'a Dictionary> {
        match maybe_deref(doc, obj)? {
            Object::Dictionary(dict) => Ok(dict),
            Object::Stream(stream) => Ok(&stream.dict),
            _ => Err(ConvertError::InvalidStructure("Expected dictionary".to_string())),
        }
    }
}

impl<'a> FromObj<'a> for &'a Stream {
    fn from_obj(doc: &'a Document, obj: &'a Object) -> ConvertResult<&'a Stream> {
        maybe_deref(doc, obj)?
            .as_stream()
            .map_err(|_| ConvertError::InvalidStructure("Expected stream".to_string()))
    }
}

impl<'a> FromObj<'a> for &'a Object {
    fn from_obj(doc: &'a Document, obj: &'a Object) -> ConvertResult<&'a Object> {
        maybe_deref(doc, obj)
    }
}

pub(crate) fn get<'a, T: FromOptObj<'a>>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> ConvertResult<T> {
    T::from_opt_obj(doc, dict.get(key).ok(), key)
}

pub(crate) fn maybe_get<'a, T: FromObj<'a>>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<T> {
    maybe_get_obj(doc, dict, key).and_then(|o| T::from_obj(doc, o).ok())
}

pub(crate) fn get_name_string(doc: &Document, dict: &Dictionary, key: &[u8]) -> ConvertResult<String> {
    dict.get(key)
        .map_err(|_| ConvertError::MissingField(String::from_utf8_lossy(key).to_string()))
        .and_then(|o| maybe_deref(doc, o))
        .and_then(|o| {
            o.as_name()
                .map_err(|_| ConvertError::InvalidStructure("Expected name".to_string()))
        })
        .and_then(encodings::pdf_to_utf8)
}

pub(crate) fn maybe_get_name<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    maybe_get_obj(doc, dict, key).and_then(|n| n.as_name().ok())
}

pub(crate) fn maybe_get_array<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Vec<Object>> {
    maybe_get_obj(doc, dict, key).and_then(|n| n.as_array().ok())
}

/// Look a key up on a page dictionary, walking `/Parent` links for
/// inheritable attributes such as `/Resources` and `/MediaBox`.
///
/// A `/Parent` chain that loops back on itself yields `None`.
pub(crate) fn get_inherited<'a, T: FromObj<'a>>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<T> {
    let mut visited = HashSet::new();
    let mut current = dict;
    loop {
        if let Ok(value) = get::<T>(doc, current, key) {
            return Some(value);
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        if !visited.insert(parent) {
            warn!("Cycle in /Parent chain at {:?} looking up {}", parent, String::from_utf8_lossy(key));
            return None;
        }
        current = doc.get_dictionary(parent).ok()?;
    }
}

/// Stream payload with its filters removed; unfiltered or undecodable
/// streams yield their raw bytes.
pub(crate) fn get_contents(stream: &Stream) -> Vec<u8> {
    stream.decompressed_content().unwrap_or_else(|_| stream.content.clone())
}
