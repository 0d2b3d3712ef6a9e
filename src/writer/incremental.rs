//! Append-only revision writer (ISO 32000-1, 7.5.6).
//!
//! The original bytes are copied unchanged; new and replaced objects are
//! appended, followed by a cross-reference section whose `/Prev` points at
//! the previous one. Documents whose newest section is an xref stream get an
//! xref stream, others a classic table.

use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::writer::ObjectSerializer;
use md5::{Digest, Md5};
use std::collections::BTreeMap;

/// Result of writing an incremental update.
#[derive(Debug, Clone)]
pub struct IncrementalOutput {
    /// Complete output: original bytes plus the new revision
    pub bytes: Vec<u8>,
    /// Absolute offset of each written object's value (after `n g obj\n`)
    value_offsets: BTreeMap<u32, usize>,
}

impl IncrementalOutput {
    /// Absolute offset at which the value of object `id` starts.
    pub fn value_offset(&self, id: u32) -> Option<usize> {
        self.value_offsets.get(&id).copied()
    }
}

/// Collects objects for one incremental revision.
#[derive(Debug)]
pub struct IncrementalUpdate<'a> {
    doc: &'a PdfDocument,
    next_id: u32,
    /// Serialized object values keyed by object number
    objects: BTreeMap<u32, (u16, Vec<u8>)>,
    serializer: ObjectSerializer,
}

impl<'a> IncrementalUpdate<'a> {
    /// Start a revision on top of `doc`.
    pub fn new(doc: &'a PdfDocument) -> Self {
        Self {
            doc,
            next_id: doc.xref().size().max(1),
            objects: BTreeMap::new(),
            serializer: ObjectSerializer::compact(),
        }
    }

    /// Reserve a fresh object number.
    pub fn allocate(&mut self) -> ObjectRef {
        let r = ObjectRef::new(self.next_id, 0);
        self.next_id += 1;
        r
    }

    /// Add or replace an object.
    pub fn set_object(&mut self, r: ObjectRef, obj: &Object) {
        self.objects.insert(r.id, (r.gen, self.serializer.serialize(obj)));
    }

    /// Add an object whose value is already serialized.
    pub fn set_raw(&mut self, r: ObjectRef, value: Vec<u8>) {
        self.objects.insert(r.id, (r.gen, value));
    }

    /// Write the original bytes followed by the new revision.
    pub fn write(mut self) -> Result<IncrementalOutput> {
        if self.objects.is_empty() {
            return Err(Error::Validation("incremental update has no objects".into()));
        }
        let doc = self.doc;
        let original = doc.data();
        let mut out = Vec::with_capacity(original.len() + 4096);
        out.extend_from_slice(original);
        if !out.ends_with(b"\n") {
            out.push(b'\n');
        }

        let mut entries: BTreeMap<u32, (usize, u16)> = BTreeMap::new();
        let mut value_offsets = BTreeMap::new();
        for (&id, (gen, value)) in &self.objects {
            entries.insert(id, (out.len(), *gen));
            out.extend_from_slice(format!("{} {} obj\n", id, gen).as_bytes());
            value_offsets.insert(id, out.len());
            out.extend_from_slice(value);
            out.extend_from_slice(b"\nendobj\n");
        }

        let trailer = self.revision_trailer(&out[original.len()..])?;
        if doc.xref().is_stream_based() {
            let xref_ref = self.allocate();
            let xref_offset = out.len();
            entries.insert(xref_ref.id, (xref_offset, 0));
            let stream = xref_stream(trailer, &entries, self.next_id);
            out.extend_from_slice(&self.serializer.serialize_indirect(xref_ref.id, 0, &stream));
            out.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());
        } else {
            let xref_offset = out.len();
            out.extend_from_slice(b"xref\n");
            for run in consecutive_runs(&entries) {
                out.extend_from_slice(format!("{} {}\n", run[0].0, run.len()).as_bytes());
                for (_, (offset, gen)) in run {
                    out.extend_from_slice(format!("{:010} {:05} n \n", offset, gen).as_bytes());
                }
            }
            let mut trailer = trailer;
            trailer.shift_insert(0, "Size".into(), Object::Integer(i64::from(self.next_id)));
            out.extend_from_slice(b"trailer\n");
            self.serializer.write_dictionary(&mut out, &trailer);
            out.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());
        }

        log::debug!(
            "incremental update: {} objects, {} -> {} bytes",
            self.objects.len(),
            original.len(),
            out.len()
        );
        Ok(IncrementalOutput {
            bytes: out,
            value_offsets,
        })
    }

    /// `/Root`, `/Info`, `/ID` and `/Prev` for the new revision. The first
    /// `/ID` element is kept, the second changes with every revision.
    fn revision_trailer(&self, appended: &[u8]) -> Result<Dictionary> {
        let old = self.doc.trailer();
        let mut trailer = Dictionary::new();
        trailer.insert("Root".into(), Object::Reference(self.doc.root_ref()?));
        if let Some(info) = old.get("Info") {
            trailer.insert("Info".into(), info.clone());
        }

        let mut hasher = Md5::new();
        hasher.update(self.doc.data());
        hasher.update(appended);
        let instance = hasher.finalize().to_vec();
        let permanent = old
            .get("ID")
            .and_then(Object::as_array)
            .and_then(|ids| ids.first())
            .and_then(Object::as_string)
            .map(<[u8]>::to_vec)
            .unwrap_or_else(|| instance.clone());
        trailer.insert(
            "ID".into(),
            Object::Array(vec![Object::String(permanent), Object::String(instance)]),
        );
        trailer.insert("Prev".into(), Object::Integer(self.doc.xref().start_offset() as i64));
        Ok(trailer)
    }
}

fn consecutive_runs(entries: &BTreeMap<u32, (usize, u16)>) -> Vec<Vec<(u32, (usize, u16))>> {
    let mut runs: Vec<Vec<(u32, (usize, u16))>> = Vec::new();
    for (&id, &entry) in entries {
        let extends_last = runs.last().and_then(|run| run.last()).map(|(last, _)| last + 1) == Some(id);
        if !extends_last {
            runs.push(Vec::new());
        }
        if let Some(run) = runs.last_mut() {
            run.push((id, entry));
        }
    }
    runs
}

fn xref_stream(trailer: Dictionary, entries: &BTreeMap<u32, (usize, u16)>, size: u32) -> Object {
    let max_offset = entries.values().map(|(offset, _)| *offset).max().unwrap_or(0);
    let offset_width = ((usize::BITS - max_offset.leading_zeros()).div_ceil(8)).max(1) as usize;

    let mut index = Vec::new();
    let mut rows = Vec::new();
    for run in consecutive_runs(entries) {
        index.push(Object::Integer(i64::from(run[0].0)));
        index.push(Object::Integer(run.len() as i64));
        for (_, (offset, gen)) in run {
            rows.push(1u8);
            rows.extend_from_slice(&offset.to_be_bytes()[std::mem::size_of::<usize>() - offset_width..]);
            rows.extend_from_slice(&gen.to_be_bytes());
        }
    }

    let mut dict = Dictionary::new();
    dict.insert("Type".into(), Object::name("XRef"));
    dict.insert("Size".into(), Object::Integer(i64::from(size)));
    dict.extend(trailer);
    dict.insert(
        "W".into(),
        Object::Array(vec![
            Object::Integer(1),
            Object::Integer(offset_width as i64),
            Object::Integer(2),
        ]),
    );
    dict.insert("Index".into(), Object::Array(index));
    Object::Stream {
        dict,
        data: bytes::Bytes::from(rows),
    }
}
