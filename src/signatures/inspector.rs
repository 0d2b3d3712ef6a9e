//! Structural inspection of signed documents.
//!
//! Checks what the signing protocol produced: the `/ByteRange` covers the
//! revision except exactly the `/Contents` string, the envelope decodes, and
//! its message digest (or time-stamp imprint) matches the covered bytes.
//! Certificate trust and the signature value itself are not verified.

use super::byterange::ByteRangeCalculator;
use super::envelope::oids::{
    ADBE_REVOCATION_INFO_ARCHIVAL, ID_AA_TIME_STAMP_TOKEN, ID_MESSAGE_DIGEST, ID_SIGNED_DATA,
};
use super::envelope::{EnvelopeSignedData, RevocationInfoArchival};
use super::timestamp::token_info;
use super::types::{DigestAlgorithm, SignatureSubFilter};
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object};
use cms::content_info::ContentInfo;
use der::asn1::OctetString;
use der::{Decode, Encode, SliceReader};

/// Dictionary-level facts about one signature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignatureInfo {
    /// Name of the signature field
    pub field_name: String,
    /// `/SubFilter`
    pub sub_filter: Option<SignatureSubFilter>,
    /// `/Name`
    pub signer_name: Option<String>,
    /// `/M`
    pub signing_time: Option<String>,
    /// `/Reason`
    pub reason: Option<String>,
    /// `/Location`
    pub location: Option<String>,
    /// `/ContactInfo`
    pub contact_info: Option<String>,
    /// `/ByteRange`
    pub byte_range: Vec<i64>,
    /// Whether the byte range reaches the end of the file
    pub covers_whole_document: bool,
}

/// Facts read from the decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeInfo {
    /// Digest algorithm of the signer (or of the time-stamp imprint)
    pub digest_algorithm: DigestAlgorithm,
    /// `messageDigest` attribute, or the imprint of a document timestamp
    pub message_digest: Vec<u8>,
    /// Raw signature value of the signer
    pub signature_value: Vec<u8>,
    /// Certificates carried in the envelope
    pub certificates: usize,
    /// CRLs and OCSP responses carried in the envelope
    pub revocation_items: usize,
    /// Signature timestamp or document timestamp present
    pub has_timestamp: bool,
}

/// Outcome of inspecting one signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectionStatus {
    /// Byte range well formed and digest matches
    Intact,
    /// Digest of the covered bytes differs from the envelope's
    Modified,
    /// Byte range or envelope could not be interpreted
    Malformed,
}

/// Result of inspecting one signature.
#[derive(Debug, Clone)]
pub struct InspectionResult {
    /// Dictionary facts
    pub info: SignatureInfo,
    /// Envelope facts, when the envelope decoded
    pub envelope: Option<EnvelopeInfo>,
    /// Overall status
    pub status: InspectionStatus,
    /// Human-readable findings
    pub messages: Vec<String>,
}

/// Inspector for signatures in a document.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureInspector;

impl SignatureInspector {
    /// Create a new inspector.
    pub fn new() -> Self {
        Self
    }

    /// Read the dictionary entries of a signature.
    pub fn extract_signature_info(&self, field_name: &str, dict: &Dictionary) -> SignatureInfo {
        let text = |key: &str| dict.get(key).and_then(Object::as_string).map(decode_text);
        SignatureInfo {
            field_name: field_name.to_string(),
            sub_filter: dict
                .get("SubFilter")
                .and_then(Object::as_name)
                .and_then(SignatureSubFilter::from_pdf_name),
            signer_name: text("Name"),
            signing_time: text("M"),
            reason: text("Reason"),
            location: text("Location"),
            contact_info: text("ContactInfo"),
            byte_range: dict
                .get("ByteRange")
                .and_then(Object::as_array)
                .map(|items| items.iter().filter_map(Object::as_integer).collect())
                .unwrap_or_default(),
            covers_whole_document: false,
        }
    }

    /// Inspect every signature, oldest first.
    pub fn inspect(&self, pdf_data: &[u8]) -> Result<Vec<InspectionResult>> {
        let doc = PdfDocument::from_bytes(pdf_data.to_vec())?;
        Ok(doc
            .signature_dictionaries()?
            .iter()
            .map(|(name, dict)| self.inspect_signature(pdf_data, name, dict))
            .collect())
    }

    /// Inspect the newest signature.
    pub fn inspect_last(&self, pdf_data: &[u8]) -> Result<InspectionResult> {
        self.inspect(pdf_data)?
            .pop()
            .ok_or_else(|| Error::InvalidPdf("document has no signatures".into()))
    }

    fn inspect_signature(&self, pdf_data: &[u8], field_name: &str, dict: &Dictionary) -> InspectionResult {
        let mut info = self.extract_signature_info(field_name, dict);
        let mut result = InspectionResult {
            info: info.clone(),
            envelope: None,
            status: InspectionStatus::Malformed,
            messages: Vec::new(),
        };

        let byte_range: [i64; 4] = match info.byte_range.as_slice().try_into() {
            Ok(range) => range,
            Err(_) => {
                result.messages.push("ByteRange must have four elements".into());
                return result;
            },
        };
        info.covers_whole_document = byte_range[2] + byte_range[3] == pdf_data.len() as i64;
        result.info = info.clone();
        if let Err(e) = check_gap(pdf_data, &byte_range, dict) {
            result.messages.push(e.to_string());
            return result;
        }

        let contents = dict.get("Contents").and_then(Object::as_string).unwrap_or_default();
        let envelope = match envelope_info(contents, info.sub_filter) {
            Ok(envelope) => envelope,
            Err(e) => {
                result.messages.push(format!("cannot decode envelope: {}", e));
                return result;
            },
        };
        match ByteRangeCalculator::hash_signed_bytes(pdf_data, &byte_range, envelope.digest_algorithm) {
            Ok(digest) if digest == envelope.message_digest => result.status = InspectionStatus::Intact,
            Ok(_) => {
                result.status = InspectionStatus::Modified;
                result.messages.push("digest of the covered bytes does not match the envelope".into());
            },
            Err(e) => result.messages.push(e.to_string()),
        }
        if !info.covers_whole_document {
            result.messages.push("signature covers an earlier revision".into());
        }
        result.envelope = Some(envelope);
        result
    }
}

/// The byte range must start at 0 and leave out exactly the `/Contents`
/// hex string.
fn check_gap(pdf_data: &[u8], byte_range: &[i64; 4], dict: &Dictionary) -> Result<()> {
    let end = byte_range[2].saturating_add(byte_range[3]);
    let end = usize::try_from(end).map_err(|_| Error::InvalidPdf("negative ByteRange".into()))?;
    if end > pdf_data.len() {
        return Err(Error::InvalidPdf("ByteRange exceeds the file".into()));
    }
    ByteRangeCalculator::validate_byte_range(byte_range, end)?;

    let gap_start = byte_range[1] as usize;
    let gap_end = byte_range[2] as usize;
    if gap_end <= gap_start || pdf_data[gap_start] != b'<' || pdf_data[gap_end - 1] != b'>' {
        return Err(Error::InvalidPdf("ByteRange gap is not a hex string".into()));
    }
    let contents_len = dict.get("Contents").and_then(Object::as_string).map_or(0, <[u8]>::len);
    if (gap_end - gap_start - 2) != contents_len * 2 {
        return Err(Error::InvalidPdf("ByteRange gap does not match /Contents".into()));
    }
    Ok(())
}

/// Decode a `/Contents` value, ignoring the zero padding after the DER.
pub fn parse_envelope(contents: &[u8]) -> Result<ContentInfo> {
    let mut reader = SliceReader::new(contents)?;
    let content_info = ContentInfo::decode(&mut reader)?;
    if content_info.content_type != ID_SIGNED_DATA {
        return Err(Error::Certificate(format!(
            "envelope content type {} is not signedData",
            content_info.content_type
        )));
    }
    Ok(content_info)
}

fn envelope_info(contents: &[u8], sub_filter: Option<SignatureSubFilter>) -> Result<EnvelopeInfo> {
    let content_info = parse_envelope(contents)?;
    let signed_data = EnvelopeSignedData::from_der(&content_info.content.to_der()?)?;
    let certificates = signed_data.certificates.as_ref().map_or(0, |set| set.0.len());

    if sub_filter == Some(SignatureSubFilter::Rfc3161) {
        let tst = token_info(&content_info.to_der()?)?;
        return Ok(EnvelopeInfo {
            digest_algorithm: DigestAlgorithm::from_oid(&tst.message_imprint.hash_algorithm.oid)?,
            message_digest: tst.message_imprint.hashed_message.as_bytes().to_vec(),
            signature_value: Vec::new(),
            certificates,
            revocation_items: 0,
            has_timestamp: true,
        });
    }

    let signer = signed_data
        .signer_infos
        .0
        .iter()
        .next()
        .ok_or_else(|| Error::Certificate("envelope has no signer".into()))?;
    let signed_attrs = signer
        .signed_attrs
        .as_ref()
        .ok_or_else(|| Error::Certificate("signer has no signed attributes".into()))?;

    let mut message_digest = None;
    let mut revocation_items = signed_data.crls.as_ref().map_or(0, |crls| crls.len());
    for attr in signed_attrs.iter() {
        let value = match attr.values.iter().next() {
            Some(value) => value.to_der()?,
            None => continue,
        };
        if attr.oid == ID_MESSAGE_DIGEST {
            message_digest = Some(OctetString::from_der(&value)?.as_bytes().to_vec());
        } else if attr.oid == ADBE_REVOCATION_INFO_ARCHIVAL {
            revocation_items += RevocationInfoArchival::from_der(&value)?.len();
        }
    }
    let has_timestamp = signer
        .unsigned_attrs
        .as_ref()
        .is_some_and(|attrs| attrs.iter().any(|attr| attr.oid == ID_AA_TIME_STAMP_TOKEN));

    Ok(EnvelopeInfo {
        digest_algorithm: DigestAlgorithm::from_oid(&signer.digest_alg.oid)?,
        message_digest: message_digest
            .ok_or_else(|| Error::Certificate("signer has no messageDigest attribute".into()))?,
        signature_value: signer.signature.as_bytes().to_vec(),
        certificates,
        revocation_items,
        has_timestamp,
    })
}

/// PDF text string: UTF-16BE with BOM, otherwise treated as UTF-8.
fn decode_text(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        },
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}
