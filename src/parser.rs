//! PDF object parser.
//!
//! Combines tokens from the lexer into complete objects using recursive
//! descent. All parsing functions return `IResult` from nom; the public
//! [`parse_indirect_object`] converts failures into [`Error::ParseError`].

use crate::error::{Error, Result};
use crate::lexer::{token, Token};
use crate::object::{Dictionary, Object, ObjectRef};
use nom::IResult;

/// Decode escape sequences in PDF literal strings (ISO 32000-1, 7.3.4.2).
///
/// ```
/// # use pdf_remote_sign::parser::decode_literal_string_escapes;
/// assert_eq!(decode_literal_string_escapes(b"a\\(b\\)\\101"), b"a(b)A");
/// ```
pub fn decode_literal_string_escapes(raw: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        if raw[i] != b'\\' || i + 1 >= raw.len() {
            result.push(raw[i]);
            i += 1;
            continue;
        }
        let escaped = raw[i + 1];
        i += 2;
        match escaped {
            b'n' => result.push(b'\n'),
            b'r' => result.push(b'\r'),
            b't' => result.push(b'\t'),
            b'b' => result.push(8),
            b'f' => result.push(12),
            b'\r' => {
                // line continuation, CRLF counts as one EOL
                if raw.get(i) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'\n' => {},
            b'0'..=b'7' => {
                let mut code = u32::from(escaped - b'0');
                let mut digits = 1;
                while digits < 3 && i < raw.len() && (b'0'..=b'7').contains(&raw[i]) {
                    code = code * 8 + u32::from(raw[i] - b'0');
                    i += 1;
                    digits += 1;
                }
                result.push((code & 0xFF) as u8);
            },
            // \( \) \\ and unknown escapes keep the escaped byte
            other => result.push(other),
        }
    }

    result
}

/// Decode a hex string body; whitespace is ignored and an odd trailing digit
/// is padded with 0.
pub fn decode_hex(hex_bytes: &[u8]) -> Result<Vec<u8>> {
    let digits: Vec<u8> = hex_bytes
        .iter()
        .copied()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let nibble = |c: u8| -> Result<u8> {
        match c {
            b'0'..=b'9' => Ok(c - b'0'),
            b'a'..=b'f' => Ok(c - b'a' + 10),
            b'A'..=b'F' => Ok(c - b'A' + 10),
            _ => Err(Error::Decode(format!("invalid hex digit '{}'", c as char))),
        }
    };

    digits
        .chunks(2)
        .map(|pair| {
            let high = nibble(pair[0])?;
            let low = match pair.get(1) {
                Some(c) => nibble(*c)?,
                None => 0,
            };
            Ok((high << 4) | low)
        })
        .collect()
}

fn fail<T>(input: &[u8], kind: nom::error::ErrorKind) -> IResult<&[u8], T> {
    Err(nom::Err::Error(nom::error::Error::new(input, kind)))
}

/// Parse a single PDF object, including indirect references and streams.
///
/// ```
/// use pdf_remote_sign::parser::parse_object;
/// use pdf_remote_sign::object::{Object, ObjectRef};
///
/// let (_, obj) = parse_object(b"<< /Root 1 0 R >>").unwrap();
/// assert_eq!(obj.get("Root"), Some(&Object::Reference(ObjectRef::new(1, 0))));
/// ```
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    let (input, tok) = token(input)?;

    match tok {
        Token::Null => Ok((input, Object::Null)),
        Token::True => Ok((input, Object::Boolean(true))),
        Token::False => Ok((input, Object::Boolean(false))),
        Token::Integer(i) => {
            // "n g R" is a reference, anything else a plain integer
            if let Ok((after_gen, Token::Integer(gen))) = token(input) {
                if let Ok((after_r, Token::R)) = token(after_gen) {
                    if i >= 0 && (0..=i64::from(u16::MAX)).contains(&gen) {
                        return Ok((after_r, Object::Reference(ObjectRef::new(i as u32, gen as u16))));
                    }
                }
            }
            Ok((input, Object::Integer(i)))
        },
        Token::Real(r) => Ok((input, Object::Real(r))),
        Token::LiteralString(bytes) => Ok((input, Object::String(decode_literal_string_escapes(bytes)))),
        Token::HexString(hex) => match decode_hex(hex) {
            Ok(decoded) => Ok((input, Object::String(decoded))),
            Err(_) => Err(nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::HexDigit))),
        },
        Token::Name(name) => Ok((input, Object::Name(name))),
        Token::ArrayStart => parse_array(input),
        Token::DictStart => {
            let (remaining, dict) = parse_dictionary(input)?;
            if let Ok((stream_input, Token::StreamStart)) = token(remaining) {
                let (rest, data) = parse_stream_data(stream_input, &dict)?;
                return Ok((
                    rest,
                    Object::Stream {
                        dict,
                        data: bytes::Bytes::from(data),
                    },
                ));
            }
            Ok((remaining, Object::Dictionary(dict)))
        },
        _ => fail(input, nom::error::ErrorKind::Tag),
    }
}

/// Stream data follows `stream` + EOL. A direct /Length is trusted when it
/// lands on `endstream`; otherwise the data runs up to the keyword.
fn parse_stream_data<'a>(input: &'a [u8], dict: &Dictionary) -> IResult<&'a [u8], Vec<u8>> {
    let input = if input.starts_with(b"\r\n") {
        &input[2..]
    } else if input.starts_with(b"\n") || input.starts_with(b"\r") {
        &input[1..]
    } else {
        input
    };

    if let Some(length) = dict.get("Length").and_then(Object::as_integer) {
        let length = length.max(0) as usize;
        if length <= input.len() {
            if let Ok((rest, Token::StreamEnd)) = token(&input[length..]) {
                return Ok((rest, input[..length].to_vec()));
            }
        }
        log::debug!("stream /Length {} does not reach endstream, scanning", length);
    }

    let keyword = b"endstream";
    match input.windows(keyword.len()).position(|w| w == keyword) {
        Some(pos) => {
            let mut end = pos;
            if end > 0 && input[end - 1] == b'\n' {
                end -= 1;
            }
            if end > 0 && input[end - 1] == b'\r' {
                end -= 1;
            }
            Ok((&input[pos + keyword.len()..], input[..end].to_vec()))
        },
        None => fail(input, nom::error::ErrorKind::Eof),
    }
}

fn parse_array(mut input: &[u8]) -> IResult<&[u8], Object> {
    let mut items = Vec::new();
    loop {
        if let Ok((rest, Token::ArrayEnd)) = token(input) {
            return Ok((rest, Object::Array(items)));
        }
        let (rest, item) = parse_object(input)?;
        items.push(item);
        input = rest;
    }
}

fn parse_dictionary(mut input: &[u8]) -> IResult<&[u8], Dictionary> {
    let mut dict = Dictionary::new();
    loop {
        let (rest, tok) = token(input)?;
        match tok {
            Token::DictEnd => return Ok((rest, dict)),
            Token::Name(key) => {
                let (rest, value) = parse_object(rest)?;
                dict.insert(key, value);
                input = rest;
            },
            _ => return fail(input, nom::error::ErrorKind::Tag),
        }
    }
}

/// Parse `n g obj <object> endobj` starting at `offset` in `data`.
pub fn parse_indirect_object(data: &[u8], offset: usize) -> Result<(ObjectRef, Object)> {
    let parse_error = |reason: &str| Error::ParseError {
        offset,
        reason: reason.to_string(),
    };
    let input = data
        .get(offset..)
        .ok_or_else(|| parse_error("offset past end of file"))?;

    let (input, id) = match token(input) {
        Ok((rest, Token::Integer(id))) if id >= 0 => (rest, id as u32),
        _ => return Err(parse_error("expected object number")),
    };
    let (input, gen) = match token(input) {
        Ok((rest, Token::Integer(gen))) if (0..=i64::from(u16::MAX)).contains(&gen) => (rest, gen as u16),
        _ => return Err(parse_error("expected generation number")),
    };
    let input = match token(input) {
        Ok((rest, Token::ObjStart)) => rest,
        _ => return Err(parse_error("expected 'obj' keyword")),
    };
    let (_, object) = parse_object(input).map_err(|e| parse_error(&format!("{:?}", e)))?;

    Ok((ObjectRef::new(id, gen), object))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference_vs_integers() {
        let (_, obj) = parse_object(b"[1 0 R 2 3]").unwrap();
        let items = obj.as_array().unwrap();
        assert_eq!(items[0], Object::Reference(ObjectRef::new(1, 0)));
        assert_eq!(items[1], Object::Integer(2));
        assert_eq!(items[2], Object::Integer(3));
    }

    #[test]
    fn test_parse_nested_dictionary() {
        let (_, obj) =
            parse_object(b"<< /Type /Catalog /AcroForm << /Fields [] /SigFlags 3 >> >>").unwrap();
        assert!(obj.has_name("Type", "Catalog"));
        let form = obj.get("AcroForm").unwrap();
        assert_eq!(form.get("SigFlags").and_then(Object::as_integer), Some(3));
    }

    #[test]
    fn test_parse_strings() {
        let (_, obj) = parse_object(b"(D:20240101\\(x\\))").unwrap();
        assert_eq!(obj.as_string(), Some(&b"D:20240101(x)"[..]));
        let (_, obj) = parse_object(b"<4869 7>").unwrap();
        assert_eq!(obj.as_string(), Some(&b"Hip"[..]));
    }

    #[test]
    fn test_parse_stream_with_length() {
        let (_, obj) = parse_object(b"<< /Length 5 >>\nstream\nhello\nendstream").unwrap();
        match obj {
            Object::Stream { data, .. } => assert_eq!(&data[..], b"hello"),
            other => panic!("expected stream, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_parse_stream_with_indirect_length() {
        let (_, obj) = parse_object(b"<< /Length 9 0 R >>\r\nstream\r\nabc\r\nendstream").unwrap();
        match obj {
            Object::Stream { data, .. } => assert_eq!(&data[..], b"abc"),
            other => panic!("expected stream, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_parse_indirect_object() {
        let data = b"%PDF-1.7\n4 0 obj\n<< /Type /Page >>\nendobj\n";
        let (r, obj) = parse_indirect_object(data, 9).unwrap();
        assert_eq!(r, ObjectRef::new(4, 0));
        assert!(obj.has_name("Type", "Page"));
    }

    #[test]
    fn test_parse_indirect_object_bad_offset() {
        let err = parse_indirect_object(b"garbage", 0).unwrap_err();
        assert!(matches!(err, Error::ParseError { offset: 0, .. }));
    }

    #[test]
    fn test_decode_hex_rejects_garbage() {
        assert!(decode_hex(b"zz").is_err());
        assert_eq!(decode_hex(b"").unwrap(), Vec::<u8>::new());
    }
}
