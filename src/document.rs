//! PDF document model.
//!
//! A read-only view over an in-memory PDF that exposes what signing needs:
//! version, trailer, catalog, page tree, form fields and the signatures that
//! are already present. Objects are loaded lazily through the
//! cross-reference table.

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::objstm::parse_object_stream;
use crate::parser::parse_indirect_object;
use crate::xref::{parse_xref, CrossRefTable, XRefEntryType};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Maximum recursion depth for reference chains and tree walks
const MAX_RECURSION_DEPTH: u32 = 64;

/// Kind of a signature already present in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingSignatureKind {
    /// Certifying signature (DocMDP)
    Certification,
    /// Ordinary approval signature
    Approval,
    /// RFC 3161 document timestamp
    DocumentTimestamp,
}

/// A signed signature field found in the document's AcroForm.
#[derive(Debug, Clone)]
pub struct ExistingSignature {
    /// Fully qualified field name
    pub field_name: String,
    /// How the signature was classified
    pub kind: ExistingSignatureKind,
    /// `/SubFilter` of the signature dictionary, if any
    pub sub_filter: Option<String>,
}

/// PDF document.
///
/// ```no_run
/// use pdf_remote_sign::document::PdfDocument;
///
/// let doc = PdfDocument::open("contract.pdf")?;
/// println!("PDF version: {}.{}", doc.version().0, doc.version().1);
/// println!("Signatures: {}", doc.existing_signatures()?.len());
/// # Ok::<(), pdf_remote_sign::error::Error>(())
/// ```
pub struct PdfDocument {
    data: Vec<u8>,
    /// Version from the header, raised by a catalog /Version entry
    version: (u8, u8),
    xref: CrossRefTable,
    /// Decoded object streams, keyed by stream object number
    objstm_cache: RefCell<HashMap<u32, HashMap<u32, Object>>>,
}

impl std::fmt::Debug for PdfDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDocument")
            .field("len", &self.data.len())
            .field("version", &self.version)
            .field("objects", &self.xref.len())
            .finish()
    }
}

impl PdfDocument {
    /// Open a PDF file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(std::fs::read(path)?)
    }

    /// Parse a PDF held in memory.
    ///
    /// Fails with [`Error::Unsupported`] for encrypted documents: a signing
    /// revision must not be appended without the document's security handler.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Result<Self> {
        let data = data.into();
        if data.is_empty() {
            return Err(Error::Validation("document bytes are empty".into()));
        }
        let header_version = parse_header_version(&data)?;
        let xref = parse_xref(&data)?;
        if xref.trailer().contains_key("Encrypt") {
            return Err(Error::Unsupported("encrypted documents cannot be signed".into()));
        }

        let mut doc = Self {
            data,
            version: header_version,
            xref,
            objstm_cache: RefCell::new(HashMap::new()),
        };

        // PDF 1.4+: the catalog may raise the header version
        let catalog = doc.catalog()?;
        if let Some(v) = catalog.get("Version").and_then(Object::as_name) {
            if let Some(parsed) = parse_version_str(v) {
                doc.version = doc.version.max(parsed);
            }
        }
        log::debug!(
            "opened PDF {}.{} ({} bytes, {} xref entries)",
            doc.version.0,
            doc.version.1,
            doc.data.len(),
            doc.xref.len()
        );
        Ok(doc)
    }

    /// Raw document bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the document and return its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// PDF version (major, minor).
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// Whether the document is PDF 2.0 or later.
    pub fn is_pdf2(&self) -> bool {
        self.version.0 >= 2
    }

    /// Cross-reference table of the newest revision.
    pub fn xref(&self) -> &CrossRefTable {
        &self.xref
    }

    /// Trailer dictionary of the newest revision.
    pub fn trailer(&self) -> &Dictionary {
        self.xref.trailer()
    }

    /// Reference to the document catalog.
    pub fn root_ref(&self) -> Result<ObjectRef> {
        self.trailer()
            .get("Root")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::InvalidPdf("trailer /Root is not a reference".into()))
    }

    /// Load an indirect object.
    pub fn load_object(&self, obj_ref: ObjectRef) -> Result<Object> {
        let entry = *self
            .xref
            .get(obj_ref.id)
            .ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen))?;

        match entry.entry_type {
            XRefEntryType::Free => Err(Error::ObjectNotFound(obj_ref.id, obj_ref.gen)),
            XRefEntryType::Uncompressed => {
                let (found, object) = parse_indirect_object(&self.data, entry.offset as usize)?;
                if found.id != obj_ref.id {
                    return Err(Error::InvalidPdf(format!(
                        "xref points {} at object {}",
                        obj_ref, found
                    )));
                }
                Ok(object)
            },
            XRefEntryType::Compressed => {
                let stream_num = entry.offset as u32;
                if let Some(obj) = self
                    .objstm_cache
                    .borrow()
                    .get(&stream_num)
                    .and_then(|objects| objects.get(&obj_ref.id))
                {
                    return Ok(obj.clone());
                }
                let stream = self.load_object(ObjectRef::new(stream_num, 0))?;
                let objects = parse_object_stream(&stream)?;
                let found = objects.get(&obj_ref.id).cloned();
                self.objstm_cache.borrow_mut().insert(stream_num, objects);
                found.ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen))
            },
        }
    }

    /// Follow references until a direct object is reached.
    pub fn resolve(&self, obj: &Object) -> Result<Object> {
        let mut current = obj.clone();
        for _ in 0..MAX_RECURSION_DEPTH {
            match current {
                Object::Reference(r) => current = self.load_object(r)?,
                other => return Ok(other),
            }
        }
        Err(Error::InvalidPdf("reference chain too deep".into()))
    }

    /// Resolve a dictionary entry; missing keys resolve to `None`.
    pub fn resolve_entry(&self, dict: &Dictionary, key: &str) -> Result<Option<Object>> {
        dict.get(key).map(|v| self.resolve(v)).transpose()
    }

    /// The document catalog dictionary.
    pub fn catalog(&self) -> Result<Dictionary> {
        match self.load_object(self.root_ref()?)? {
            Object::Dictionary(d) => Ok(d),
            other => Err(Error::InvalidPdf(format!("catalog is a {}", other.type_name()))),
        }
    }

    /// Page object references in document order.
    pub fn page_refs(&self) -> Result<Vec<ObjectRef>> {
        let catalog = self.catalog()?;
        let root = catalog
            .get("Pages")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::InvalidPdf("catalog has no /Pages reference".into()))?;
        let mut pages = Vec::new();
        let mut visited = HashSet::new();
        self.collect_pages(root, &mut pages, &mut visited, 0)?;
        Ok(pages)
    }

    fn collect_pages(
        &self,
        node_ref: ObjectRef,
        pages: &mut Vec<ObjectRef>,
        visited: &mut HashSet<ObjectRef>,
        depth: u32,
    ) -> Result<()> {
        if depth > MAX_RECURSION_DEPTH || !visited.insert(node_ref) {
            return Err(Error::InvalidPdf(format!("page tree cycle at {}", node_ref)));
        }
        let node = self.load_object(node_ref)?;
        if node.has_name("Type", "Page") {
            pages.push(node_ref);
            return Ok(());
        }
        let kids = match node.get("Kids") {
            Some(kids) => self.resolve(kids)?,
            None => return Ok(()),
        };
        for kid in kids.as_array().map(Vec::as_slice).unwrap_or_default() {
            if let Some(kid_ref) = kid.as_reference() {
                self.collect_pages(kid_ref, pages, visited, depth + 1)?;
            }
        }
        Ok(())
    }

    /// Fully qualified names of all form fields.
    pub fn field_names(&self) -> Result<HashSet<String>> {
        let mut names = HashSet::new();
        self.walk_fields(&mut |name, _| {
            names.insert(name.to_string());
            Ok(())
        })?;
        Ok(names)
    }

    /// Signed signature fields, classified.
    ///
    /// A signature is a certification when catalog `/Perms /DocMDP` points at
    /// it or its `/Reference` array carries a DocMDP transform.
    pub fn existing_signatures(&self) -> Result<Vec<ExistingSignature>> {
        let catalog = self.catalog()?;
        let docmdp_ref = self
            .resolve_entry(&catalog, "Perms")?
            .and_then(|perms| perms.get("DocMDP").and_then(Object::as_reference));

        let mut found = Vec::new();
        self.walk_fields(&mut |name, field| {
            let is_sig_field = field.get("FT").and_then(Object::as_name) == Some("Sig");
            let value = match field.get("V") {
                Some(v) if is_sig_field => v,
                _ => return Ok(()),
            };
            let value_ref = value.as_reference();
            let sig = self.resolve(value)?;
            let sig_dict = match sig.as_dict() {
                Some(d) => d,
                None => return Ok(()),
            };
            let sub_filter = sig_dict.get("SubFilter").and_then(Object::as_name).map(str::to_string);

            let kind = if sig.has_name("Type", "DocTimeStamp")
                || sub_filter.as_deref() == Some("ETSI.RFC3161")
            {
                ExistingSignatureKind::DocumentTimestamp
            } else if (value_ref.is_some() && value_ref == docmdp_ref) || self.has_docmdp_reference(sig_dict)? {
                ExistingSignatureKind::Certification
            } else {
                ExistingSignatureKind::Approval
            };
            found.push(ExistingSignature {
                field_name: name.to_string(),
                kind,
                sub_filter,
            });
            Ok(())
        })?;
        Ok(found)
    }

    /// Signature dictionaries of signed fields with their field names, in
    /// AcroForm order.
    pub fn signature_dictionaries(&self) -> Result<Vec<(String, Dictionary)>> {
        let mut found = Vec::new();
        self.walk_fields(&mut |name, field| {
            if field.get("FT").and_then(Object::as_name) != Some("Sig") {
                return Ok(());
            }
            if let Some(value) = field.get("V") {
                if let Object::Dictionary(sig) = self.resolve(value)? {
                    found.push((name.to_string(), sig));
                }
            }
            Ok(())
        })?;
        Ok(found)
    }

    fn has_docmdp_reference(&self, sig_dict: &Dictionary) -> Result<bool> {
        let references = match self.resolve_entry(sig_dict, "Reference")? {
            Some(Object::Array(items)) => items,
            _ => return Ok(false),
        };
        for item in &references {
            if self.resolve(item)?.has_name("TransformMethod", "DocMDP") {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Visit every terminal field of the AcroForm with its qualified name.
    fn walk_fields(&self, visit: &mut dyn FnMut(&str, &Dictionary) -> Result<()>) -> Result<()> {
        let catalog = self.catalog()?;
        let acroform = match self.resolve_entry(&catalog, "AcroForm")? {
            Some(Object::Dictionary(d)) => d,
            _ => return Ok(()),
        };
        let fields = match self.resolve_entry(&acroform, "Fields")? {
            Some(Object::Array(items)) => items,
            _ => return Ok(()),
        };
        let mut visited = HashSet::new();
        for field in &fields {
            self.walk_field(field, "", visit, &mut visited, 0)?;
        }
        Ok(())
    }

    fn walk_field(
        &self,
        field: &Object,
        parent_name: &str,
        visit: &mut dyn FnMut(&str, &Dictionary) -> Result<()>,
        visited: &mut HashSet<ObjectRef>,
        depth: u32,
    ) -> Result<()> {
        if let Some(r) = field.as_reference() {
            if !visited.insert(r) {
                return Ok(());
            }
        }
        if depth > MAX_RECURSION_DEPTH {
            return Err(Error::InvalidPdf("form field tree too deep".into()));
        }
        let field = match self.resolve(field)? {
            Object::Dictionary(d) => d,
            _ => return Ok(()),
        };
        let partial = field
            .get("T")
            .and_then(Object::as_string)
            .map(|t| String::from_utf8_lossy(t).into_owned());
        let name = match (parent_name.is_empty(), partial) {
            (_, None) => parent_name.to_string(),
            (true, Some(p)) => p,
            (false, Some(p)) => format!("{}.{}", parent_name, p),
        };

        // Kids without /T are widgets of this field, not child fields
        let child_fields: Vec<Object> = match self.resolve_entry(&field, "Kids")? {
            Some(Object::Array(kids)) => kids
                .into_iter()
                .filter(|kid| {
                    self.resolve(kid)
                        .map(|k| k.get("T").is_some())
                        .unwrap_or(false)
                })
                .collect(),
            _ => Vec::new(),
        };
        if child_fields.is_empty() {
            return visit(&name, &field);
        }
        for kid in &child_fields {
            self.walk_field(kid, &name, visit, visited, depth + 1)?;
        }
        Ok(())
    }
}

fn parse_version_str(text: &str) -> Option<(u8, u8)> {
    let (major, minor) = text.trim().split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

fn parse_header_version(data: &[u8]) -> Result<(u8, u8)> {
    let window = &data[..data.len().min(1024)];
    let marker = b"%PDF-";
    let pos = window
        .windows(marker.len())
        .position(|w| w == marker)
        .ok_or_else(|| Error::InvalidPdf("missing %PDF- header".into()))?;
    let rest = &window[pos + marker.len()..];
    let end = rest
        .iter()
        .position(|c| !(c.is_ascii_digit() || *c == b'.'))
        .unwrap_or(rest.len());
    std::str::from_utf8(&rest[..end])
        .ok()
        .and_then(parse_version_str)
        .ok_or_else(|| Error::InvalidPdf("malformed %PDF- header".into()))
}
