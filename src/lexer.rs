//! PDF lexer (tokenizer).
//!
//! Recognizes the token types needed to read dictionaries, arrays, indirect
//! objects and cross-reference sections:
//! - Numbers: integers (42, -123) and reals (3.14, -2.5, .5)
//! - Strings: literal ((Hello)) and hexadecimal (<48656C6C6F>)
//! - Names: identifiers starting with / (/Type, /Pages)
//! - Delimiters and keywords: `[`, `]`, `<<`, `>>`, `obj`, `endobj`,
//!   `stream`, `endstream`, `R`, `true`, `false`, `null`
//!
//! Whitespace (space, \t, \r, \n, \0, \f) and comments (% to EOL) are skipped.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while, take_while1},
    character::complete::{char, digit0, digit1, one_of},
    combinator::{map, opt, recognize, value},
    sequence::{pair, preceded, tuple},
    IResult,
};

/// Token types recognized by the PDF lexer.
#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Integer number (e.g., 42, -123)
    Integer(i64),
    /// Real (floating-point) number (e.g., 3.14, -2.5, .5)
    Real(f64),
    /// Literal string bytes, escape sequences not yet decoded
    LiteralString(&'a [u8]),
    /// Hexadecimal string digits, whitespace preserved
    HexString(&'a [u8]),
    /// Name with `#xx` escapes decoded
    Name(String),
    /// Boolean true keyword
    True,
    /// Boolean false keyword
    False,
    /// Null keyword
    Null,
    /// Array start delimiter [
    ArrayStart,
    /// Array end delimiter ]
    ArrayEnd,
    /// Dictionary start delimiter <<
    DictStart,
    /// Dictionary end delimiter >>
    DictEnd,
    /// Indirect object start keyword "obj"
    ObjStart,
    /// Indirect object end keyword "endobj"
    ObjEnd,
    /// Stream start keyword "stream"
    StreamStart,
    /// Stream end keyword "endstream"
    StreamEnd,
    /// Reference keyword "R" (used in "10 0 R")
    R,
    /// Any other bare keyword (`xref`, `trailer`, `startxref`, ...)
    Keyword(&'a [u8]),
}

/// PDF whitespace (PDF Ref 1.7, Table 3.1).
pub fn is_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

/// PDF delimiter characters.
pub fn is_delimiter(c: u8) -> bool {
    matches!(c, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn is_regular(c: u8) -> bool {
    !is_whitespace(c) && !is_delimiter(c)
}

fn comment(input: &[u8]) -> IResult<&[u8], ()> {
    value((), preceded(char('%'), take_till(|c| c == b'\r' || c == b'\n')))(input)
}

/// Skip all whitespace and comments.
pub fn skip_ws(input: &[u8]) -> &[u8] {
    let mut remaining = input;
    loop {
        let (rest, _) = match take_while::<_, _, nom::error::Error<&[u8]>>(is_whitespace)(remaining)
        {
            Ok(r) => r,
            Err(_) => return remaining,
        };
        remaining = rest;
        match comment(remaining) {
            Ok((rest, _)) => remaining = rest,
            Err(_) => return remaining,
        }
    }
}

fn number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, text) = recognize(tuple((
        opt(one_of("+-")),
        alt((
            recognize(tuple((digit1, opt(pair(char('.'), digit0))))),
            recognize(pair(char('.'), digit1)),
        )),
    )))(input)?;

    // "12abc" is a keyword, not a number
    if rest.first().copied().is_some_and(is_regular) {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit)));
    }

    let text = std::str::from_utf8(text)
        .map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit)))?;
    if text.contains('.') {
        let parsed = text.parse::<f64>().map_err(|_| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Float))
        })?;
        Ok((rest, Token::Real(parsed)))
    } else {
        let parsed = text.parse::<i64>().map_err(|_| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
        })?;
        Ok((rest, Token::Integer(parsed)))
    }
}

/// Literal strings may nest balanced parentheses; `\` escapes the next byte.
fn literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (body, _) = char('(')(input)?;
    let mut depth = 1usize;
    let mut i = 0;
    while i < body.len() {
        match body[i] {
            b'\\' => i += 2,
            b'(' => {
                depth += 1;
                i += 1;
            },
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&body[i + 1..], Token::LiteralString(&body[..i])));
                }
                i += 1;
            },
            _ => i += 1,
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Eof)))
}

fn hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, _) = char('<')(input)?;
    let (rest, digits) = take_till(|c| c == b'>')(rest)?;
    let (rest, _) = char('>')(rest)?;
    Ok((rest, Token::HexString(digits)))
}

fn name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, raw) = preceded(char('/'), take_while(is_regular))(input)?;
    let mut decoded = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'#' && i + 2 < raw.len() {
            let hex = std::str::from_utf8(&raw[i + 1..i + 3]).unwrap_or("zz");
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                decoded.push(byte);
                i += 3;
                continue;
            }
        }
        decoded.push(raw[i]);
        i += 1;
    }
    Ok((rest, Token::Name(String::from_utf8_lossy(&decoded).into_owned())))
}

fn keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    map(take_while1(is_regular), |word: &[u8]| match word {
        b"true" => Token::True,
        b"false" => Token::False,
        b"null" => Token::Null,
        b"obj" => Token::ObjStart,
        b"endobj" => Token::ObjEnd,
        b"stream" => Token::StreamStart,
        b"endstream" => Token::StreamEnd,
        b"R" => Token::R,
        other => Token::Keyword(other),
    })(input)
}

/// Read the next token, skipping leading whitespace and comments.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let input = skip_ws(input);
    alt((
        value(Token::DictStart, tag("<<")),
        value(Token::DictEnd, tag(">>")),
        hex_string,
        literal_string,
        value(Token::ArrayStart, char('[')),
        value(Token::ArrayEnd, char(']')),
        name,
        number,
        keyword,
    ))(input)
}
