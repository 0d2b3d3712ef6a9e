//! PDF object serialization (ISO 32000-1, 7.3).
//!
//! Dictionaries are written in insertion order so that objects copied from
//! a document keep their key order.

use crate::object::{Dictionary, Object};

/// Serializer for PDF objects.
#[derive(Debug, Clone, Default)]
pub struct ObjectSerializer {
    /// Whether to use compact formatting (minimal whitespace)
    compact: bool,
}

impl ObjectSerializer {
    /// Create a new serializer that puts dictionary entries on their own lines.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a compact serializer (minimal whitespace).
    pub fn compact() -> Self {
        Self { compact: true }
    }

    /// Serialize an object to bytes.
    pub fn serialize(&self, obj: &Object) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_object(&mut buf, obj);
        buf
    }

    /// Serialize an indirect object definition: `{id} {gen} obj\n{object}\nendobj\n`.
    pub fn serialize_indirect(&self, id: u32, gen: u16, obj: &Object) -> Vec<u8> {
        let mut buf = format!("{} {} obj\n", id, gen).into_bytes();
        self.write_object(&mut buf, obj);
        buf.extend_from_slice(b"\nendobj\n");
        buf
    }

    /// Write an object to a buffer.
    pub fn write_object(&self, buf: &mut Vec<u8>, obj: &Object) {
        match obj {
            Object::Null => buf.extend_from_slice(b"null"),
            Object::Boolean(b) => buf.extend_from_slice(if *b { b"true" } else { b"false" }),
            Object::Integer(i) => buf.extend_from_slice(i.to_string().as_bytes()),
            Object::Real(r) => write_real(buf, *r),
            Object::String(s) => write_string(buf, s),
            Object::Name(n) => write_name(buf, n),
            Object::Array(items) => {
                buf.push(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        buf.push(b' ');
                    }
                    self.write_object(buf, item);
                }
                buf.push(b']');
            },
            Object::Dictionary(dict) => self.write_dictionary(buf, dict),
            Object::Stream { dict, data } => {
                let mut dict = dict.clone();
                dict.insert("Length".into(), Object::Integer(data.len() as i64));
                self.write_dictionary(buf, &dict);
                buf.extend_from_slice(b"\nstream\n");
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\nendstream");
            },
            Object::Reference(r) => buf.extend_from_slice(format!("{} {} R", r.id, r.gen).as_bytes()),
        }
    }

    /// Write a dictionary.
    pub fn write_dictionary(&self, buf: &mut Vec<u8>, dict: &Dictionary) {
        buf.extend_from_slice(b"<<");
        self.write_entries(buf, dict);
        buf.extend_from_slice(if self.compact || dict.is_empty() { b" >>" } else { b"\n>>" });
    }

    /// Write the `/Key value` pairs of a dictionary without the delimiters,
    /// each preceded by a separator.
    pub fn write_entries(&self, buf: &mut Vec<u8>, dict: &Dictionary) {
        for (key, value) in dict {
            buf.extend_from_slice(if self.compact { b" " } else { b"\n  " });
            write_name(buf, key);
            buf.push(b' ');
            self.write_object(buf, value);
        }
    }
}

/// Write a real number with at most five decimals and no trailing zeros.
fn write_real(buf: &mut Vec<u8>, value: f64) {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        buf.extend_from_slice((value as i64).to_string().as_bytes());
    } else {
        let formatted = format!("{:.5}", value);
        let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
        buf.extend_from_slice(trimmed.as_bytes());
    }
}

/// Literal syntax for printable text, hex syntax for binary data.
fn write_string(buf: &mut Vec<u8>, data: &[u8]) {
    let printable = data
        .iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..=0x7E).contains(&b));
    if !printable {
        write_hex_string(buf, data);
        return;
    }
    buf.push(b'(');
    for &byte in data {
        match byte {
            b'(' | b')' | b'\\' => buf.extend_from_slice(&[b'\\', byte]),
            b'\n' => buf.extend_from_slice(b"\\n"),
            b'\r' => buf.extend_from_slice(b"\\r"),
            b'\t' => buf.extend_from_slice(b"\\t"),
            _ => buf.push(byte),
        }
    }
    buf.push(b')');
}

/// Write `<HEX>`.
fn write_hex_string(buf: &mut Vec<u8>, data: &[u8]) {
    buf.push(b'<');
    for byte in data {
        buf.extend_from_slice(format!("{:02X}", byte).as_bytes());
    }
    buf.push(b'>');
}

/// Names escape delimiters, whitespace, `#` and non-printable bytes as `#xx`.
fn write_name(buf: &mut Vec<u8>, name: &str) {
    buf.push(b'/');
    for byte in name.bytes() {
        let regular = (0x21..=0x7E).contains(&byte)
            && !matches!(byte, b'#' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%');
        if regular {
            buf.push(byte);
        } else {
            buf.extend_from_slice(format!("#{:02X}", byte).as_bytes());
        }
    }
}
