//! Cross-reference table parser.
//!
//! Maps object numbers to byte offsets (or object-stream slots) so objects
//! can be read on demand. Handles classic `xref` tables, cross-reference
//! streams (PDF 1.5+), hybrid files with `/XRefStm`, and `/Prev` chains left
//! by earlier incremental updates. Entries from newer sections win.

use crate::decoders::decode_stream;
use crate::error::{Error, Result};
use crate::lexer::{token, Token};
use crate::object::{Dictionary, Object};
use crate::parser::{parse_indirect_object, parse_object};
use std::collections::{BTreeMap, HashSet};

/// Cross-reference table entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntryType {
    /// Entry for a free object
    Free,
    /// Entry for an uncompressed object at a byte offset
    Uncompressed,
    /// Entry for an object inside an object stream (PDF 1.5+)
    Compressed,
}

/// Cross-reference table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XRefEntry {
    /// Type of entry
    pub entry_type: XRefEntryType,
    /// Byte offset (uncompressed) or object stream number (compressed)
    pub offset: u64,
    /// Generation number (uncompressed) or index within stream (compressed)
    pub generation: u16,
}

impl XRefEntry {
    /// Create a new uncompressed entry.
    pub fn uncompressed(offset: u64, generation: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Uncompressed,
            offset,
            generation,
        }
    }

    /// Create a new compressed entry (object in object stream).
    pub fn compressed(stream_obj_num: u64, index_in_stream: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Compressed,
            offset: stream_obj_num,
            generation: index_in_stream,
        }
    }

    /// Create a new free entry.
    pub fn free(next_free: u64, generation: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Free,
            offset: next_free,
            generation,
        }
    }

    /// Whether the entry points at a live object.
    pub fn in_use(&self) -> bool {
        self.entry_type != XRefEntryType::Free
    }
}

/// Cross-reference table that maps object numbers to their locations.
#[derive(Debug, Clone, Default)]
pub struct CrossRefTable {
    entries: BTreeMap<u32, XRefEntry>,
    trailer: Dictionary,
    /// Offset named by the final `startxref`
    start_offset: u64,
    /// Whether the newest section is a cross-reference stream
    stream_based: bool,
}

impl CrossRefTable {
    /// Get an entry by object number.
    pub fn get(&self, object_number: u32) -> Option<&XRefEntry> {
        self.entries.get(&object_number)
    }

    /// Add or replace an entry.
    pub fn add_entry(&mut self, object_number: u32, entry: XRefEntry) {
        self.entries.insert(object_number, entry);
    }

    /// Newest trailer dictionary (for xref streams, the stream dictionary).
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// Byte offset of the newest cross-reference section.
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Whether the newest section was written as a cross-reference stream.
    pub fn is_stream_based(&self) -> bool {
        self.stream_based
    }

    /// Object numbers with in-use entries, ascending.
    pub fn in_use_objects(&self) -> impl Iterator<Item = (u32, &XRefEntry)> + '_ {
        self.entries
            .iter()
            .filter(|(_, e)| e.in_use())
            .map(|(n, e)| (*n, e))
    }

    /// One past the highest object number known to the table or trailer.
    pub fn size(&self) -> u32 {
        let from_entries = self.entries.keys().next_back().map_or(0, |n| n + 1);
        let from_trailer = self
            .trailer
            .get("Size")
            .and_then(Object::as_integer)
            .unwrap_or(0)
            .max(0) as u32;
        from_entries.max(from_trailer)
    }

    /// Entries in `self` win over `older`; trailer keys missing from the
    /// newer trailer are inherited.
    fn merge_older(&mut self, older: CrossRefTable) {
        for (num, entry) in older.entries {
            self.entries.entry(num).or_insert(entry);
        }
        for (key, value) in older.trailer {
            self.trailer.entry(key).or_insert(value);
        }
    }

    /// Number of entries in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Find the offset after the last `startxref` keyword.
pub fn find_startxref(data: &[u8]) -> Result<u64> {
    let tail_start = data.len().saturating_sub(2048);
    let tail = &data[tail_start..];
    let keyword = b"startxref";
    let pos = tail
        .windows(keyword.len())
        .rposition(|w| w == keyword)
        .ok_or_else(|| Error::InvalidPdf("startxref not found".into()))?;
    match token(&tail[pos + keyword.len()..]) {
        Ok((_, Token::Integer(offset))) if offset >= 0 => Ok(offset as u64),
        _ => Err(Error::InvalidPdf("startxref offset is not a number".into())),
    }
}

/// Read the full cross-reference chain of a document.
pub fn parse_xref(data: &[u8]) -> Result<CrossRefTable> {
    let start = find_startxref(data)?;
    let mut visited = HashSet::new();
    let mut table = parse_section_chain(data, start, &mut visited)?;
    table.start_offset = start;
    if !table.trailer.contains_key("Root") {
        return Err(Error::InvalidPdf("trailer has no /Root".into()));
    }
    log::debug!(
        "xref: {} entries, newest section at {} ({})",
        table.len(),
        start,
        if table.stream_based { "stream" } else { "table" }
    );
    Ok(table)
}

fn parse_section_chain(data: &[u8], offset: u64, visited: &mut HashSet<u64>) -> Result<CrossRefTable> {
    if !visited.insert(offset) {
        return Err(Error::InvalidPdf(format!("xref /Prev loop at offset {}", offset)));
    }
    let at = usize::try_from(offset)
        .ok()
        .filter(|o| *o < data.len())
        .ok_or_else(|| Error::InvalidPdf(format!("xref offset {} outside file", offset)))?;

    let mut table = match token(&data[at..]) {
        Ok((_, Token::Keyword(b"xref"))) => {
            let mut table = parse_classic_section(data, at)?;
            if let Some(stm) = table.trailer.get("XRefStm").and_then(Object::as_integer) {
                // hybrid file: the stream only adds entries the table lacks
                let hidden = parse_stream_section(data, stm.max(0) as usize)?;
                for (num, entry) in hidden.entries {
                    table.entries.entry(num).or_insert(entry);
                }
            }
            table
        },
        Ok((_, Token::Integer(_))) => parse_stream_section(data, at)?,
        _ => return Err(Error::InvalidPdf(format!("no xref section at offset {}", offset))),
    };

    if let Some(prev) = table.trailer.get("Prev").and_then(Object::as_integer) {
        let older = parse_section_chain(data, prev.max(0) as u64, visited)?;
        let stream_based = table.stream_based;
        table.merge_older(older);
        table.stream_based = stream_based;
    }
    Ok(table)
}

fn classic_error(offset: usize, reason: &str) -> Error {
    Error::ParseError {
        offset,
        reason: format!("xref table: {}", reason),
    }
}

fn parse_classic_section(data: &[u8], offset: usize) -> Result<CrossRefTable> {
    let mut table = CrossRefTable::default();
    let (mut input, _) = token(&data[offset..]).map_err(|_| classic_error(offset, "missing keyword"))?;

    loop {
        let (rest, tok) = token(input).map_err(|_| classic_error(offset, "unexpected end"))?;
        match tok {
            Token::Keyword(b"trailer") => {
                let (_, trailer) =
                    parse_object(rest).map_err(|_| classic_error(offset, "bad trailer"))?;
                table.trailer = match trailer {
                    Object::Dictionary(d) => d,
                    _ => return Err(classic_error(offset, "trailer is not a dictionary")),
                };
                return Ok(table);
            },
            Token::Integer(first) => {
                let (rest, count) = match token(rest) {
                    Ok((rest, Token::Integer(count))) => (rest, count),
                    _ => return Err(classic_error(offset, "subsection without count")),
                };
                input = rest;
                for i in 0..count.max(0) {
                    let (rest, entry_offset) = match token(input) {
                        Ok((rest, Token::Integer(v))) => (rest, v),
                        _ => return Err(classic_error(offset, "bad entry offset")),
                    };
                    let (rest, gen) = match token(rest) {
                        Ok((rest, Token::Integer(v))) => (rest, v),
                        _ => return Err(classic_error(offset, "bad entry generation")),
                    };
                    let (rest, kind) = match token(rest) {
                        Ok((rest, Token::Keyword(kind))) => (rest, kind),
                        _ => return Err(classic_error(offset, "bad entry type")),
                    };
                    let entry = match kind {
                        b"n" => XRefEntry::uncompressed(entry_offset.max(0) as u64, gen as u16),
                        b"f" => XRefEntry::free(entry_offset.max(0) as u64, gen as u16),
                        _ => return Err(classic_error(offset, "entry type must be n or f")),
                    };
                    table.entries.insert((first + i) as u32, entry);
                    input = rest;
                }
            },
            _ => return Err(classic_error(offset, "expected subsection or trailer")),
        }
    }
}

fn parse_stream_section(data: &[u8], offset: usize) -> Result<CrossRefTable> {
    let (_, object) = parse_indirect_object(data, offset)?;
    let (dict, raw) = match object {
        Object::Stream { dict, data } if dict.get("Type").and_then(Object::as_name) == Some("XRef") => {
            (dict, data)
        },
        _ => return Err(Error::InvalidPdf(format!("object at {} is not an xref stream", offset))),
    };

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(Object::as_array)
        .map(|w| w.iter().filter_map(Object::as_integer).map(|v| v.max(0) as usize).collect())
        .unwrap_or_default();
    if widths.len() != 3 {
        return Err(Error::InvalidPdf("xref stream /W must have three entries".into()));
    }
    let size = dict.get("Size").and_then(Object::as_integer).unwrap_or(0);
    let index: Vec<i64> = dict
        .get("Index")
        .and_then(Object::as_array)
        .map(|a| a.iter().filter_map(Object::as_integer).collect())
        .unwrap_or_else(|| vec![0, size]);

    let body = decode_stream(&dict, &raw)?;
    let row_len: usize = widths.iter().sum();
    if row_len == 0 {
        return Err(Error::InvalidPdf("xref stream /W sums to zero".into()));
    }

    let mut table = CrossRefTable {
        stream_based: true,
        ..Default::default()
    };
    let mut rows = body.chunks_exact(row_len);
    for pair in index.chunks(2) {
        let (first, count) = match pair {
            [first, count] => (*first, *count),
            _ => break,
        };
        for i in 0..count.max(0) {
            let row = match rows.next() {
                Some(row) => row,
                None => break,
            };
            let (a, rest) = row.split_at(widths[0]);
            let (b, c) = rest.split_at(widths[1]);
            let kind = if widths[0] == 0 { 1 } else { read_int(a) };
            let entry = match kind {
                0 => XRefEntry::free(read_int(b), read_int(c) as u16),
                1 => XRefEntry::uncompressed(read_int(b), read_int(c) as u16),
                2 => XRefEntry::compressed(read_int(b), read_int(c) as u16),
                // unknown types are treated as null references
                _ => continue,
            };
            table.entries.insert((first + i) as u32, entry);
        }
    }

    let mut trailer = dict;
    for key in ["Length", "Filter", "DecodeParms", "W", "Index", "Type"] {
        trailer.shift_remove(key);
    }
    table.trailer = trailer;
    Ok(table)
}

fn read_int(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}
