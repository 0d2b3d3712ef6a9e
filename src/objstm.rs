//! Object stream parsing (PDF 1.5+).
//!
//! An object stream (`/Type /ObjStm`) holds `/N` objects. Its decoded data
//! starts with N pairs of integers (object number, offset relative to
//! `/First`), followed by the objects themselves.

use crate::decoders::decode_stream;
use crate::error::{Error, Result};
use crate::lexer::{token, Token};
use crate::object::Object;
use crate::parser::parse_object;
use std::collections::HashMap;

/// Parse an object stream and extract all of its objects.
pub fn parse_object_stream(stream_obj: &Object) -> Result<HashMap<u32, Object>> {
    let (dict, raw) = match stream_obj {
        Object::Stream { dict, data } => (dict, data),
        other => {
            return Err(Error::InvalidPdf(format!(
                "object stream is a {}, not a Stream",
                other.type_name()
            )))
        },
    };
    if let Some(kind) = dict.get("Type").and_then(Object::as_name) {
        if kind != "ObjStm" {
            return Err(Error::InvalidPdf(format!("expected /Type /ObjStm, got /{}", kind)));
        }
    }

    let count = dict
        .get("N")
        .and_then(Object::as_integer)
        .filter(|n| *n >= 0)
        .ok_or_else(|| Error::InvalidPdf("object stream missing /N entry".into()))? as usize;
    let first = dict
        .get("First")
        .and_then(Object::as_integer)
        .filter(|n| *n >= 0)
        .ok_or_else(|| Error::InvalidPdf("object stream missing /First entry".into()))? as usize;

    let data = decode_stream(dict, raw)?;
    if first > data.len() {
        return Err(Error::InvalidPdf(format!(
            "object stream /First {} beyond data length {}",
            first,
            data.len()
        )));
    }

    let mut header = &data[..first];
    let mut pairs = Vec::with_capacity(count);
    for _ in 0..count {
        let (rest, num) = match token(header) {
            Ok((rest, Token::Integer(n))) => (rest, n),
            _ => return Err(Error::InvalidPdf("object stream header truncated".into())),
        };
        let (rest, offset) = match token(rest) {
            Ok((rest, Token::Integer(o))) => (rest, o),
            _ => return Err(Error::InvalidPdf("object stream header truncated".into())),
        };
        pairs.push((num.max(0) as u32, offset.max(0) as usize));
        header = rest;
    }

    let mut objects = HashMap::with_capacity(count);
    for (num, offset) in pairs {
        let start = first + offset;
        let slice = data
            .get(start..)
            .ok_or_else(|| Error::InvalidPdf(format!("object {} offset outside stream", num)))?;
        let (_, object) = parse_object(slice).map_err(|e| Error::ParseError {
            offset: start,
            reason: format!("object {} in object stream: {:?}", num, e),
        })?;
        objects.insert(num, object);
    }
    Ok(objects)
}
