//! Placeholder revision writer.
//!
//! Preparing a document appends one incremental revision holding a new
//! signature field, its widget annotation and the signature dictionary. The
//! dictionary's `/Contents` is a zero-filled hex string of fixed size and its
//! `/ByteRange` is patched in once the output length is known, so the
//! returned [`PreparedDocument`] already has its final length: inserting the
//! envelope later never moves a byte.
//!
//! ```text
//! ... original bytes ...
//! 7 0 obj
//! << /Type /Sig /Filter /Adobe.PPKLite /SubFilter /ETSI.CAdES.detached
//!    /ByteRange [0 1234 5678 900]      /Contents <0000...0000> /M (D:...) >>
//! endobj
//! ```

use super::byterange::{ByteRangeCalculator, BYTE_RANGE_WIDTH};
use super::revocation::RevocationEvidence;
use super::types::{base64_bytes, DigestAlgorithm, SignatureSubFilter};
use crate::config::{CertificationPermission, SignatureFormParameters};
use crate::document::{ExistingSignatureKind, PdfDocument};
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::writer::{IncrementalUpdate, ObjectSerializer};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Reservation for the chain and signed attributes of a typical envelope.
pub const BASE_RESERVATION: usize = 8192 + 4192;

/// Extra reservation for long-term levels (timestamp token, evidence
/// encoding).
pub const LONG_TERM_MARGIN: usize = 4192;

/// Default reservation of a document timestamp revision. Tokens carry the
/// TSA chain (`certReq` is set), which alone can take several kilobytes.
pub const DOCUMENT_TIMESTAMP_RESERVATION: usize = 16384;

/// Widget flags: Print | Locked.
const WIDGET_FLAGS: i64 = 4 | 128;

/// AcroForm `/SigFlags`: SignaturesExist | AppendOnly.
const SIG_FLAGS: i64 = 1 | 2;

/// Heuristic upper bound for the envelope size.
pub fn estimate_reservation(evidence: &RevocationEvidence, long_term: bool) -> usize {
    let mut size = BASE_RESERVATION + evidence.reservation_size();
    if long_term {
        size += LONG_TERM_MARGIN;
    }
    size
}

/// Fail with `CertificationConflict` if a certifying signature cannot be
/// added to `doc`.
///
/// On PDF 2.0 a certification must be the first signature of the document;
/// earlier versions allow approvals before it but never a second
/// certification. Document timestamps never conflict.
pub fn check_certification(doc: &PdfDocument, permission: CertificationPermission) -> Result<()> {
    if !permission.is_certifying() {
        return Ok(());
    }
    for existing in doc.existing_signatures()? {
        let conflict = match existing.kind {
            ExistingSignatureKind::Certification => true,
            ExistingSignatureKind::Approval => doc.is_pdf2(),
            ExistingSignatureKind::DocumentTimestamp => false,
        };
        if conflict {
            return Err(Error::CertificationConflict(format!(
                "field '{}' already holds a {:?} signature",
                existing.field_name, existing.kind
            )));
        }
    }
    Ok(())
}

/// What to write into the placeholder revision.
#[derive(Debug, Clone)]
pub struct PlaceholderRequest {
    /// `/SubFilter`; [`SignatureSubFilter::Rfc3161`] writes a `/DocTimeStamp`
    pub sub_filter: SignatureSubFilter,
    /// Field name, widget placement and dictionary entries
    pub form_parameters: SignatureFormParameters,
    /// Written as `/M`
    pub signing_date: DateTime<Utc>,
    /// Envelope capacity in bytes
    pub reservation: usize,
}

impl PlaceholderRequest {
    /// Invisible document timestamp field.
    pub fn document_timestamp(reservation: usize) -> Self {
        Self {
            sub_filter: SignatureSubFilter::Rfc3161,
            form_parameters: SignatureFormParameters::default(),
            signing_date: Utc::now(),
            reservation,
        }
    }
}

/// A document with an empty signature placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedDocument {
    #[serde(with = "base64_bytes")]
    bytes: Vec<u8>,
    byte_range: [i64; 4],
    contents_offset: usize,
    reservation: usize,
    field_name: String,
}

impl PreparedDocument {
    /// Output bytes with the placeholder still empty.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `/ByteRange` written into the signature dictionary.
    pub fn byte_range(&self) -> [i64; 4] {
        self.byte_range
    }

    /// Offset of the placeholder's `<`.
    pub fn contents_offset(&self) -> usize {
        self.contents_offset
    }

    /// Envelope capacity in bytes.
    pub fn reservation(&self) -> usize {
        self.reservation
    }

    /// Name of the signature field.
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Bytes covered by the signature: everything but the placeholder.
    pub fn signed_bytes(&self) -> Result<Vec<u8>> {
        ByteRangeCalculator::extract_signed_bytes(&self.bytes, &self.byte_range)
    }

    /// Digest of the covered bytes.
    pub fn canonical_digest(&self, algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        ByteRangeCalculator::hash_signed_bytes(&self.bytes, &self.byte_range, algorithm)
    }

    /// Copy of the output with `envelope` written into the placeholder.
    ///
    /// The result has the same length as [`bytes`](Self::bytes).
    pub fn patch(&self, envelope: &[u8]) -> Result<Vec<u8>> {
        let mut out = self.bytes.clone();
        ByteRangeCalculator::new(self.reservation).insert_signature(&mut out, self.contents_offset, envelope)?;
        Ok(out)
    }
}

/// Append a revision with an empty signature of `request.reservation`
/// bytes to `doc`.
pub fn prepare_document(doc: &PdfDocument, request: &PlaceholderRequest) -> Result<PreparedDocument> {
    let form = &request.form_parameters;
    let field_name = choose_field_name(doc, form.field_name.as_deref())?;

    let pages = doc.page_refs()?;
    let page_number = form.placement.map(|p| p.page).unwrap_or(1);
    let page_ref = page_number
        .checked_sub(1)
        .and_then(|index| pages.get(index as usize))
        .copied()
        .ok_or_else(|| {
            Error::Validation(format!(
                "signature page {} does not exist, document has {} pages",
                page_number,
                pages.len()
            ))
        })?;

    let root_ref = doc.root_ref()?;
    let mut catalog = doc.catalog()?;
    let mut update = IncrementalUpdate::new(doc);
    let sig_ref = update.allocate();
    let field_ref = update.allocate();

    // Field merged with its widget annotation
    let mut field = Dictionary::new();
    field.insert("Type".into(), Object::name("Annot"));
    field.insert("Subtype".into(), Object::name("Widget"));
    field.insert("FT".into(), Object::name("Sig"));
    field.insert("T".into(), Object::text(&field_name));
    field.insert("V".into(), Object::Reference(sig_ref));
    field.insert("F".into(), Object::Integer(WIDGET_FLAGS));
    field.insert("P".into(), Object::Reference(page_ref));
    match form.placement {
        Some(p) => {
            field.insert(
                "Rect".into(),
                Object::Array(vec![
                    Object::Real(p.origin_x),
                    Object::Real(p.origin_y),
                    Object::Real(p.origin_x + p.width),
                    Object::Real(p.origin_y + p.height),
                ]),
            );
            let appearance_ref = update.allocate();
            update.set_object(appearance_ref, &empty_appearance(p.width, p.height));
            let mut ap = Dictionary::new();
            ap.insert("N".into(), Object::Reference(appearance_ref));
            field.insert("AP".into(), Object::Dictionary(ap));
        },
        None => {
            field.insert("Rect".into(), Object::Array(vec![Object::Integer(0); 4]));
        },
    }
    update.set_object(field_ref, &Object::Dictionary(field));

    let mut page = as_dictionary(doc.load_object(page_ref)?, "page")?;
    append_reference(doc, &mut update, &mut page, "Annots", field_ref)?;
    update.set_object(page_ref, &Object::Dictionary(page));

    register_field(doc, &mut update, &mut catalog, field_ref)?;

    let certification = form.certification();
    if certification.is_certifying() && request.sub_filter != SignatureSubFilter::Rfc3161 {
        let mut perms = match doc.resolve_entry(&catalog, "Perms")? {
            Some(Object::Dictionary(d)) => d,
            _ => Dictionary::new(),
        };
        perms.insert("DocMDP".into(), Object::Reference(sig_ref));
        catalog.insert("Perms".into(), Object::Dictionary(perms));
    }
    if request.sub_filter == SignatureSubFilter::CadesDetached && !doc.is_pdf2() {
        let mut extensions = match doc.resolve_entry(&catalog, "Extensions")? {
            Some(Object::Dictionary(d)) => d,
            _ => Dictionary::new(),
        };
        let mut esic = Dictionary::new();
        esic.insert("BaseVersion".into(), Object::name("1.7"));
        esic.insert("ExtensionLevel".into(), Object::Integer(2));
        extensions.insert("ESIC".into(), Object::Dictionary(esic));
        catalog.insert("Extensions".into(), Object::Dictionary(extensions));
    }
    update.set_object(root_ref, &Object::Dictionary(catalog));

    let calculator = ByteRangeCalculator::new(request.reservation);
    let (sig_value, byte_range_at, contents_at) = signature_dictionary(request, &calculator)?;
    update.set_raw(sig_ref, sig_value);
    let output = update.write()?;

    let base = output
        .value_offset(sig_ref.id)
        .ok_or_else(|| Error::InvalidPdf("signature dictionary missing from revision".into()))?;
    let mut bytes = output.bytes;
    let contents_offset = base + contents_at;
    let byte_range = calculator.calculate_byte_range(bytes.len(), contents_offset);
    let slot = base + byte_range_at;
    bytes[slot..slot + BYTE_RANGE_WIDTH].copy_from_slice(&ByteRangeCalculator::format_padded(&byte_range)?);

    log::info!(
        "prepared field '{}' ({}) with {} byte reservation, ByteRange {}",
        field_name,
        request.sub_filter.as_pdf_name(),
        request.reservation,
        ByteRangeCalculator::format_byte_range(&byte_range)
    );
    Ok(PreparedDocument {
        bytes,
        byte_range,
        contents_offset,
        reservation: request.reservation,
        field_name,
    })
}

/// Serialized signature dictionary with the offsets of the `/ByteRange` slot
/// and the `/Contents` placeholder inside it.
fn signature_dictionary(
    request: &PlaceholderRequest,
    calculator: &ByteRangeCalculator,
) -> Result<(Vec<u8>, usize, usize)> {
    let sig_type = match request.sub_filter {
        SignatureSubFilter::Rfc3161 => "DocTimeStamp",
        _ => "Sig",
    };
    let mut value = format!(
        "<< /Type /{} /Filter /Adobe.PPKLite /SubFilter /{} /ByteRange ",
        sig_type,
        request.sub_filter.as_pdf_name()
    )
    .into_bytes();
    let byte_range_at = value.len();
    value.extend_from_slice(&ByteRangeCalculator::format_padded(&[0; 4])?);
    value.extend_from_slice(b" /Contents ");
    let contents_at = value.len();
    value.extend_from_slice(&calculator.generate_placeholder());
    if request.sub_filter != SignatureSubFilter::Rfc3161 {
        ObjectSerializer::compact().write_entries(&mut value, &signature_entries(request)?);
    }
    value.extend_from_slice(b" >>");
    Ok((value, byte_range_at, contents_at))
}

fn signature_entries(request: &PlaceholderRequest) -> Result<Dictionary> {
    let form = &request.form_parameters;
    let mut entries = Dictionary::new();
    entries.insert(
        "M".into(),
        Object::text(pdf_date(request.signing_date, form.signing_time_zone)?),
    );
    for (key, value) in [
        ("Name", &form.signer_name),
        ("Reason", &form.reason),
        ("Location", &form.location),
        ("ContactInfo", &form.contact_info),
    ] {
        if let Some(text) = value {
            entries.insert(key.into(), Object::text(text));
        }
    }
    if let Some(creator) = &form.signature_creator {
        let mut app = Dictionary::new();
        app.insert("Name".into(), Object::name(creator.as_str()));
        let mut build = Dictionary::new();
        build.insert("App".into(), Object::Dictionary(app));
        entries.insert("Prop_Build".into(), Object::Dictionary(build));
    }
    if let Some(level) = form.certification().docmdp_level() {
        let mut params = Dictionary::new();
        params.insert("Type".into(), Object::name("TransformParams"));
        params.insert("P".into(), Object::Integer(level));
        params.insert("V".into(), Object::name("1.2"));
        let mut reference = Dictionary::new();
        reference.insert("Type".into(), Object::name("SigRef"));
        reference.insert("TransformMethod".into(), Object::name("DocMDP"));
        reference.insert("TransformParams".into(), Object::Dictionary(params));
        entries.insert("Reference".into(), Object::Array(vec![Object::Dictionary(reference)]));
    }
    Ok(entries)
}

/// PDF date string `D:YYYYMMDDHHmmSS+HH'mm'` in the given zone.
pub fn pdf_date(date: DateTime<Utc>, zone_minutes: Option<i32>) -> Result<String> {
    let minutes = zone_minutes.unwrap_or(0);
    let zone = FixedOffset::east_opt(minutes * 60)
        .ok_or_else(|| Error::Validation(format!("invalid signing time zone offset {} minutes", minutes)))?;
    let local = date.with_timezone(&zone);
    let sign = if minutes < 0 { '-' } else { '+' };
    let offset = minutes.unsigned_abs();
    Ok(format!(
        "D:{}{}{:02}'{:02}'",
        local.format("%Y%m%d%H%M%S"),
        sign,
        offset / 60,
        offset % 60
    ))
}

fn choose_field_name(doc: &PdfDocument, requested: Option<&str>) -> Result<String> {
    let existing = doc.field_names()?;
    match requested {
        Some(name) if name.trim().is_empty() => Err(Error::Validation("field name is empty".into())),
        Some(name) if existing.contains(name) => {
            Err(Error::Validation(format!("field '{}' already exists", name)))
        },
        Some(name) => Ok(name.to_string()),
        None => Ok((1..)
            .map(|n| format!("Signature{}", n))
            .find(|candidate| !existing.contains(candidate))
            .unwrap_or_default()),
    }
}

fn empty_appearance(width: f64, height: f64) -> Object {
    let mut dict = Dictionary::new();
    dict.insert("Type".into(), Object::name("XObject"));
    dict.insert("Subtype".into(), Object::name("Form"));
    dict.insert(
        "BBox".into(),
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(width),
            Object::Real(height),
        ]),
    );
    Object::Stream {
        dict,
        data: bytes::Bytes::new(),
    }
}

fn as_dictionary(obj: Object, what: &str) -> Result<Dictionary> {
    match obj {
        Object::Dictionary(d) => Ok(d),
        other => Err(Error::InvalidPdf(format!("{} is a {}", what, other.type_name()))),
    }
}

/// Add the field to the AcroForm, creating it when missing.
fn register_field(
    doc: &PdfDocument,
    update: &mut IncrementalUpdate<'_>,
    catalog: &mut Dictionary,
    field_ref: ObjectRef,
) -> Result<()> {
    match catalog.get("AcroForm").cloned() {
        Some(Object::Reference(form_ref)) => {
            let mut form = as_dictionary(doc.load_object(form_ref)?, "AcroForm")?;
            add_signature_field(doc, update, &mut form, field_ref)?;
            update.set_object(form_ref, &Object::Dictionary(form));
        },
        Some(Object::Dictionary(mut form)) => {
            add_signature_field(doc, update, &mut form, field_ref)?;
            catalog.insert("AcroForm".into(), Object::Dictionary(form));
        },
        _ => {
            let mut form = Dictionary::new();
            add_signature_field(doc, update, &mut form, field_ref)?;
            catalog.insert("AcroForm".into(), Object::Dictionary(form));
        },
    }
    Ok(())
}

fn add_signature_field(
    doc: &PdfDocument,
    update: &mut IncrementalUpdate<'_>,
    form: &mut Dictionary,
    field_ref: ObjectRef,
) -> Result<()> {
    append_reference(doc, update, form, "Fields", field_ref)?;
    let flags = form.get("SigFlags").and_then(Object::as_integer).unwrap_or(0);
    form.insert("SigFlags".into(), Object::Integer(flags | SIG_FLAGS));
    Ok(())
}

/// Append `r` to the array under `key`, following an indirect array.
fn append_reference(
    doc: &PdfDocument,
    update: &mut IncrementalUpdate<'_>,
    dict: &mut Dictionary,
    key: &str,
    r: ObjectRef,
) -> Result<()> {
    match dict.get(key).cloned() {
        Some(Object::Reference(array_ref)) => match doc.load_object(array_ref)? {
            Object::Array(mut items) => {
                items.push(Object::Reference(r));
                update.set_object(array_ref, &Object::Array(items));
            },
            other => {
                return Err(Error::InvalidPdf(format!("/{} is a {}", key, other.type_name())));
            },
        },
        Some(Object::Array(mut items)) => {
            items.push(Object::Reference(r));
            dict.insert(key.into(), Object::Array(items));
        },
        _ => {
            dict.insert(key.into(), Object::Array(vec![Object::Reference(r)]));
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldPlacement;
    use chrono::TimeZone;

    fn one_page_pdf(version: &str) -> Vec<u8> {
        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>",
        ];
        let mut pdf = format!("%PDF-{}\n", version).into_bytes();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref = pdf.len();
        pdf.extend_from_slice(b"xref\n0 4\n0000000000 65535 f \n");
        for off in offsets {
            pdf.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
        }
        pdf.extend_from_slice(format!("trailer\n<< /Size 4 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n", xref).as_bytes());
        pdf
    }

    fn request(sub_filter: SignatureSubFilter, form: SignatureFormParameters) -> PlaceholderRequest {
        PlaceholderRequest {
            sub_filter,
            form_parameters: form,
            signing_date: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
            reservation: 256,
        }
    }

    #[test]
    fn test_byte_range_excludes_only_placeholder() {
        let doc = PdfDocument::from_bytes(one_page_pdf("1.7")).unwrap();
        let prepared = prepare_document(&doc, &request(SignatureSubFilter::Pkcs7Detached, Default::default())).unwrap();

        let [start, first_len, second_start, second_len] = prepared.byte_range();
        let bytes = prepared.bytes();
        assert_eq!(start, 0);
        assert_eq!(first_len as usize, prepared.contents_offset());
        assert_eq!((second_start - first_len) as usize, 256 * 2 + 2);
        assert_eq!((second_start + second_len) as usize, bytes.len());
        assert_eq!(bytes[first_len as usize], b'<');
        assert_eq!(bytes[second_start as usize - 1], b'>');
        assert_eq!(prepared.signed_bytes().unwrap().len(), bytes.len() - 514);
        assert_eq!(prepared.field_name(), "Signature1");

        let text = String::from_utf8_lossy(bytes);
        assert!(text.contains(&ByteRangeCalculator::format_byte_range(&prepared.byte_range())));
        assert!(text.contains("/M (D:20240301123000+00'00')"));
    }

    #[test]
    fn test_prepared_revision_is_readable() {
        let doc = PdfDocument::from_bytes(one_page_pdf("1.7")).unwrap();
        let form = SignatureFormParameters::default().with_reason("Approved");
        let prepared = prepare_document(&doc, &request(SignatureSubFilter::Pkcs7Detached, form)).unwrap();

        let reread = PdfDocument::from_bytes(prepared.bytes().to_vec()).unwrap();
        assert!(reread.field_names().unwrap().contains("Signature1"));
        let signatures = reread.existing_signatures().unwrap();
        assert_eq!(signatures.len(), 1);
        assert_eq!(signatures[0].kind, ExistingSignatureKind::Approval);
        assert_eq!(signatures[0].sub_filter.as_deref(), Some("adbe.pkcs7.detached"));

        let catalog = reread.catalog().unwrap();
        let acroform = reread.resolve_entry(&catalog, "AcroForm").unwrap().unwrap();
        assert_eq!(acroform.get("SigFlags"), Some(&Object::Integer(3)));
        let page = reread.load_object(ObjectRef::new(3, 0)).unwrap();
        assert_eq!(page.get("Annots").and_then(Object::as_array).map(Vec::len), Some(1));

        // A second preparation picks the next free name
        let second = prepare_document(&reread, &request(SignatureSubFilter::Pkcs7Detached, Default::default())).unwrap();
        assert_eq!(second.field_name(), "Signature2");
    }

    #[test]
    fn test_patch_keeps_length() {
        let doc = PdfDocument::from_bytes(one_page_pdf("1.7")).unwrap();
        let prepared = prepare_document(&doc, &request(SignatureSubFilter::Pkcs7Detached, Default::default())).unwrap();
        let digest_before = prepared.canonical_digest(DigestAlgorithm::Sha256).unwrap();

        let patched = prepared.patch(&[0x30, 0x03, 0x02, 0x01, 0x01]).unwrap();
        assert_eq!(patched.len(), prepared.bytes().len());
        let offset = prepared.contents_offset();
        assert!(patched[offset..].starts_with(b"<3003020101000"));
        assert_eq!(
            ByteRangeCalculator::hash_signed_bytes(&patched, &prepared.byte_range(), DigestAlgorithm::Sha256).unwrap(),
            digest_before
        );

        let err = prepared.patch(&[0u8; 257]).unwrap_err();
        assert!(matches!(err, Error::InsufficientReservation { required: 257, reserved: 256 }));
    }

    #[test]
    fn test_certification_entries() {
        let doc = PdfDocument::from_bytes(one_page_pdf("1.7")).unwrap();
        let form = SignatureFormParameters::default().with_certification(CertificationPermission::FormFilling);
        let prepared = prepare_document(&doc, &request(SignatureSubFilter::CadesDetached, form)).unwrap();
        let text = String::from_utf8_lossy(prepared.bytes()).into_owned();
        assert!(text.contains("/TransformMethod /DocMDP"));
        assert!(text.contains("/P 2"));
        assert!(text.contains("/ESIC"));

        let reread = PdfDocument::from_bytes(prepared.bytes().to_vec()).unwrap();
        assert_eq!(
            reread.existing_signatures().unwrap()[0].kind,
            ExistingSignatureKind::Certification
        );
        assert!(matches!(
            check_certification(&reread, CertificationPermission::NoChanges),
            Err(Error::CertificationConflict(_))
        ));
        assert!(check_certification(&reread, CertificationPermission::NotCertified).is_ok());
    }

    #[test]
    fn test_approval_conflicts_only_on_pdf2() {
        for (version, conflict) in [("1.7", false), ("2.0", true)] {
            let doc = PdfDocument::from_bytes(one_page_pdf(version)).unwrap();
            let prepared = prepare_document(&doc, &request(SignatureSubFilter::CadesDetached, Default::default())).unwrap();
            let reread = PdfDocument::from_bytes(prepared.bytes().to_vec()).unwrap();
            let result = check_certification(&reread, CertificationPermission::NoChanges);
            assert_eq!(result.is_err(), conflict, "PDF {}", version);
            // PDF 2.0 documents never get the ESIC extension
            let text = String::from_utf8_lossy(prepared.bytes()).into_owned();
            assert_eq!(text.contains("/ESIC"), version == "1.7");
        }
    }

    #[test]
    fn test_field_name_and_page_validation() {
        let doc = PdfDocument::from_bytes(one_page_pdf("1.7")).unwrap();
        let prepared = prepare_document(&doc, &request(SignatureSubFilter::Pkcs7Detached, Default::default())).unwrap();
        let reread = PdfDocument::from_bytes(prepared.bytes().to_vec()).unwrap();

        let duplicate = SignatureFormParameters {
            field_name: Some("Signature1".into()),
            ..Default::default()
        };
        assert!(matches!(
            prepare_document(&reread, &request(SignatureSubFilter::Pkcs7Detached, duplicate)),
            Err(Error::Validation(_))
        ));

        let off_page = SignatureFormParameters {
            placement: Some(FieldPlacement {
                page: 2,
                origin_x: 0.0,
                origin_y: 0.0,
                width: 100.0,
                height: 50.0,
            }),
            ..Default::default()
        };
        assert!(matches!(
            prepare_document(&doc, &request(SignatureSubFilter::Pkcs7Detached, off_page)),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_visible_widget_gets_appearance() {
        let doc = PdfDocument::from_bytes(one_page_pdf("1.7")).unwrap();
        let form = SignatureFormParameters {
            placement: Some(FieldPlacement {
                page: 1,
                origin_x: 50.0,
                origin_y: 60.0,
                width: 200.0,
                height: 40.5,
            }),
            ..Default::default()
        };
        let prepared = prepare_document(&doc, &request(SignatureSubFilter::Pkcs7Detached, form)).unwrap();
        let text = String::from_utf8_lossy(prepared.bytes()).into_owned();
        assert!(text.contains("/Rect [50 60 250 100.5]"));
        assert!(text.contains("/Subtype /Form"));
    }

    #[test]
    fn test_document_timestamp_dictionary() {
        let doc = PdfDocument::from_bytes(one_page_pdf("1.7")).unwrap();
        let prepared = prepare_document(&doc, &PlaceholderRequest::document_timestamp(64)).unwrap();
        let reread = PdfDocument::from_bytes(prepared.bytes().to_vec()).unwrap();
        let signatures = reread.existing_signatures().unwrap();
        assert_eq!(signatures[0].kind, ExistingSignatureKind::DocumentTimestamp);
        assert!(!String::from_utf8_lossy(prepared.bytes()).contains("/M (D:"));
    }

    #[test]
    fn test_pdf_date_zones() {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 23, 15, 0).unwrap();
        assert_eq!(pdf_date(date, None).unwrap(), "D:20240301231500+00'00'");
        assert_eq!(pdf_date(date, Some(90)).unwrap(), "D:20240302004500+01'30'");
        assert_eq!(pdf_date(date, Some(-300)).unwrap(), "D:20240301181500-05'00'");
        assert!(pdf_date(date, Some(24 * 60)).is_err());
    }

    #[test]
    fn test_estimate_reservation() {
        let evidence = RevocationEvidence {
            crls: vec![vec![0; 1000]],
            ocsp_responses: Vec::new(),
        };
        assert_eq!(estimate_reservation(&RevocationEvidence::default(), false), 12_384);
        assert_eq!(estimate_reservation(&evidence, false), 12_384 + 1010);
        assert_eq!(estimate_reservation(&evidence, true), 12_384 + 1010 + 4192);
    }
}
