//! CMS envelope construction for detached PDF signatures.
//!
//! An envelope goes through two states. The *skeleton* holds the signed
//! attributes: their DER encoding is the "data to sign" handed to an
//! external signer. *Finalizing* inserts the raw signature value, optionally
//! a signature timestamp token, and encodes the `ContentInfo`.
//!
//! Signed attributes:
//!
//! | attribute                   | adbe.pkcs7.detached | ETSI.CAdES.detached |
//! |-----------------------------|---------------------|---------------------|
//! | content-type                | yes                 | yes                 |
//! | message-digest              | yes                 | yes                 |
//! | signing-time                | yes                 | no (`/M` is used)   |
//! | signing-certificate-v2      | no                  | yes                 |
//! | adbe-revocationInfoArchival | if evidence         | no                  |
//!
//! CAdES envelopes carry revocation evidence in `SignedData.crls` instead,
//! OCSP responses as `id-ri-ocsp-response` other revocation info. The `cms`
//! crate types `otherRevInfoFormat` as an `AlgorithmIdentifier`, so the
//! envelope is encoded through [`EnvelopeSignedData`], which keeps it a bare
//! OID as RFC 5652 section 10.2.1 defines it.

use super::digest::digest;
use super::revocation::RevocationEvidence;
use super::types::{base64_bytes, CertificateChain, DigestAlgorithm, KeyFamily, SignatureAlgorithm, SignatureSubFilter};
use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, Utc};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, DigestAlgorithmIdentifiers, EncapsulatedContentInfo, SignedAttributes, SignerIdentifier,
    SignerInfo, SignerInfos,
};
use core::cmp::Ordering;
use der::asn1::{GeneralizedTime, ObjectIdentifier, OctetString, SetOfVec, UtcTime};
use der::{Any, Choice, Decode, DerOrd, Encode, Sequence, ValueOrd};
use serde::{Deserialize, Serialize};
use spki::AlgorithmIdentifierOwned;
use std::time::Duration;
use x509_cert::attr::Attribute;
use x509_cert::crl::CertificateList;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::serial_number::SerialNumber;
use x509_cert::Certificate;

/// Object identifiers used in the envelope.
pub mod oids {
    use der::asn1::ObjectIdentifier;

    /// id-data
    pub const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
    /// id-signedData
    pub const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
    /// id-contentType
    pub const ID_CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
    /// id-messageDigest
    pub const ID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
    /// id-signingTime
    pub const ID_SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");
    /// id-aa-signingCertificateV2
    pub const ID_AA_SIGNING_CERTIFICATE_V2: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.47");
    /// id-aa-timeStampToken
    pub const ID_AA_TIME_STAMP_TOKEN: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.14");
    /// adbe-revocationInfoArchival
    pub const ADBE_REVOCATION_INFO_ARCHIVAL: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113583.1.1.8");
    /// id-ri-ocsp-response
    pub const ID_RI_OCSP_RESPONSE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.16.2");
}

use oids::*;

/// `RevocationInfoArchival` (Adobe, PDF 1.6+).
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub(crate) struct RevocationInfoArchival {
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub(crate) crl: Option<Vec<Any>>,
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    pub(crate) ocsp: Option<Vec<Any>>,
}

impl RevocationInfoArchival {
    /// Number of archived CRLs and OCSP responses.
    pub(crate) fn len(&self) -> usize {
        self.crl.as_ref().map_or(0, Vec::len) + self.ocsp.as_ref().map_or(0, Vec::len)
    }
}

/// `SignedData` (RFC 5652 section 5.1) whose `crls` hold
/// [`RevocationEntry`] values.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
#[allow(missing_docs)]
pub struct EnvelopeSignedData {
    pub version: CmsVersion,
    pub digest_algorithms: DigestAlgorithmIdentifiers,
    pub encap_content_info: EncapsulatedContentInfo,
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    pub certificates: Option<CertificateSet>,
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    pub crls: Option<SetOfVec<RevocationEntry>>,
    pub signer_infos: SignerInfos,
}

/// `RevocationInfoChoice`.
#[derive(Clone, Debug, Eq, PartialEq, Choice)]
#[allow(clippy::large_enum_variant)]
pub enum RevocationEntry {
    /// A CRL
    Crl(CertificateList),
    /// `[1] IMPLICIT OtherRevocationInfoFormat`
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", constructed = "true")]
    Other(OtherRevocationInfo),
}

impl ValueOrd for RevocationEntry {
    fn value_cmp(&self, other: &Self) -> der::Result<Ordering> {
        self.to_der()?.der_cmp(&other.to_der()?)
    }
}

/// `OtherRevocationInfoFormat ::= SEQUENCE { otherRevInfoFormat OBJECT IDENTIFIER, otherRevInfo ANY }`
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct OtherRevocationInfo {
    /// Format of `info`, `id-ri-ocsp-response` for OCSP
    pub format: ObjectIdentifier,
    /// The revocation data
    pub info: Any,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct IssuerSerial {
    issuer: Vec<GeneralName>,
    serial_number: SerialNumber,
}

/// `ESSCertIDv2`; the hash algorithm is omitted when it is the SHA-256
/// default.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct EssCertIdV2 {
    #[asn1(optional = "true")]
    hash_algorithm: Option<AlgorithmIdentifierOwned>,
    cert_hash: OctetString,
    issuer_serial: IssuerSerial,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct SigningCertificateV2 {
    certs: Vec<EssCertIdV2>,
}

/// Unsigned envelope: signed attributes and everything needed to finish it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeSkeleton {
    sub_filter: SignatureSubFilter,
    digest_algorithm: DigestAlgorithm,
    chain: CertificateChain,
    evidence: RevocationEvidence,
    #[serde(with = "base64_bytes")]
    document_digest: Vec<u8>,
    #[serde(with = "base64_bytes")]
    signed_attributes: Vec<u8>,
    finalized: bool,
}

impl EnvelopeSkeleton {
    /// Build the signed attributes over `document_digest`.
    ///
    /// Deterministic: the same inputs and signing date give byte-identical
    /// signed attributes.
    pub fn build(
        document_digest: &[u8],
        chain: &CertificateChain,
        evidence: &RevocationEvidence,
        sub_filter: SignatureSubFilter,
        digest_algorithm: DigestAlgorithm,
        signing_date: DateTime<Utc>,
    ) -> Result<Self> {
        if document_digest.len() != digest_algorithm.output_len() {
            return Err(Error::Validation(format!(
                "document digest has {} bytes, {} produces {}",
                document_digest.len(),
                digest_algorithm.name(),
                digest_algorithm.output_len()
            )));
        }
        if sub_filter == SignatureSubFilter::Rfc3161 {
            return Err(Error::Validation("document timestamps have no signed attributes".into()));
        }
        let leaf = Certificate::from_der(chain.leaf()).map_err(|e| Error::Certificate(e.to_string()))?;

        let mut attributes = vec![
            attribute(ID_CONTENT_TYPE, Any::encode_from(&ID_DATA)?)?,
            attribute(ID_MESSAGE_DIGEST, Any::encode_from(&OctetString::new(document_digest)?)?)?,
        ];
        match sub_filter {
            SignatureSubFilter::CadesDetached => {
                attributes.push(attribute(
                    ID_AA_SIGNING_CERTIFICATE_V2,
                    Any::encode_from(&signing_certificate_v2(&leaf, chain.leaf(), digest_algorithm)?)?,
                )?);
            },
            _ => {
                attributes.push(attribute(ID_SIGNING_TIME, signing_time(signing_date)?)?);
                if !evidence.is_empty() {
                    attributes.push(attribute(
                        ADBE_REVOCATION_INFO_ARCHIVAL,
                        Any::encode_from(&revocation_info_archival(evidence)?)?,
                    )?);
                }
            },
        }
        let signed_attributes = SignedAttributes::try_from(attributes)?.to_der()?;
        log::debug!(
            "envelope skeleton: {} signed attribute bytes, {} evidence items",
            signed_attributes.len(),
            evidence.len()
        );

        Ok(Self {
            sub_filter,
            digest_algorithm,
            chain: chain.clone(),
            evidence: evidence.clone(),
            document_digest: document_digest.to_vec(),
            signed_attributes,
            finalized: false,
        })
    }

    /// DER `SET OF Attribute`: the bytes the external signer signs.
    pub fn signed_attributes(&self) -> &[u8] {
        &self.signed_attributes
    }

    /// Digest of the signed attributes, for signers that take a hash.
    pub fn signed_attributes_digest(&self) -> Vec<u8> {
        digest(&self.signed_attributes, self.digest_algorithm)
    }

    /// Digest the signature timestamp is requested over.
    pub fn timestamp_imprint(&self, signature_value: &[u8]) -> Vec<u8> {
        digest(signature_value, self.digest_algorithm)
    }

    /// Digest algorithm of the envelope.
    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest_algorithm
    }

    /// Sub-filter the envelope is built for.
    pub fn sub_filter(&self) -> SignatureSubFilter {
        self.sub_filter
    }

    /// Revocation evidence embedded in the envelope.
    pub fn evidence(&self) -> &RevocationEvidence {
        &self.evidence
    }

    /// Whether [`finalize`](Self::finalize) already ran.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Insert the signature value (and optional timestamp token) and encode
    /// the `ContentInfo`.
    ///
    /// One-shot: the second call fails with `AlreadyFinalized`. A call that
    /// fails for any other reason leaves the skeleton unfinalized.
    pub fn finalize(
        &mut self,
        signature_value: &[u8],
        algorithm: SignatureAlgorithm,
        timestamp_token: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        if self.finalized {
            return Err(Error::AlreadyFinalized);
        }
        if signature_value.is_empty() {
            return Err(Error::Validation("signature value is empty".into()));
        }
        if algorithm.digest() != self.digest_algorithm {
            return Err(Error::Validation(format!(
                "signature algorithm {} does not match digest algorithm {}",
                algorithm,
                self.digest_algorithm.name()
            )));
        }

        let certificates = self.chain.decode()?;
        let leaf = &certificates[0];
        let digest_alg = AlgorithmIdentifierOwned {
            oid: self.digest_algorithm.oid(),
            parameters: None,
        };
        let unsigned_attrs = match timestamp_token {
            Some(token) => Some(SetOfVec::try_from(vec![attribute(
                ID_AA_TIME_STAMP_TOKEN,
                Any::from_der(token)?,
            )?])?),
            None => None,
        };
        let signer_info = SignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                issuer: leaf.tbs_certificate.issuer.clone(),
                serial_number: leaf.tbs_certificate.serial_number.clone(),
            }),
            digest_alg: digest_alg.clone(),
            signed_attrs: Some(SignedAttributes::from_der(&self.signed_attributes)?),
            signature_algorithm: AlgorithmIdentifierOwned {
                oid: algorithm.oid(),
                parameters: match algorithm.family() {
                    KeyFamily::Rsa => Some(Any::null()),
                    KeyFamily::Ecdsa | KeyFamily::Dsa => None,
                },
            },
            signature: OctetString::new(signature_value)?,
            unsigned_attrs,
        };

        let crls = match self.sub_filter {
            SignatureSubFilter::CadesDetached if !self.evidence.is_empty() => {
                Some(SetOfVec::try_from(revocation_entries(&self.evidence)?)?)
            },
            _ => None,
        };
        let version = if self.evidence.ocsp_responses.is_empty() || crls.is_none() {
            CmsVersion::V1
        } else {
            CmsVersion::V5
        };
        let signed_data = EnvelopeSignedData {
            version,
            digest_algorithms: SetOfVec::try_from(vec![digest_alg])?,
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: ID_DATA,
                econtent: None,
            },
            certificates: Some(CertificateSet::try_from(
                certificates
                    .into_iter()
                    .map(CertificateChoices::Certificate)
                    .collect::<Vec<_>>(),
            )?),
            crls,
            signer_infos: SignerInfos::try_from(vec![signer_info])?,
        };
        let envelope = ContentInfo {
            content_type: ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data)?,
        }
        .to_der()?;

        self.finalized = true;
        log::debug!(
            "envelope finalized: {} bytes, timestamp {}",
            envelope.len(),
            timestamp_token.is_some()
        );
        Ok(envelope)
    }
}

fn attribute(oid: ObjectIdentifier, value: Any) -> Result<Attribute> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![value])?,
    })
}

/// UTCTime for 1950-2049, GeneralizedTime otherwise.
fn signing_time(date: DateTime<Utc>) -> Result<Any> {
    let secs = u64::try_from(date.timestamp())
        .map_err(|_| Error::Validation(format!("signing date {} is before 1970", date)))?;
    let since_epoch = Duration::from_secs(secs);
    if (1950..2050).contains(&date.year()) {
        Ok(Any::encode_from(&UtcTime::from_unix_duration(since_epoch)?)?)
    } else {
        Ok(Any::encode_from(&GeneralizedTime::from_unix_duration(since_epoch)?)?)
    }
}

fn signing_certificate_v2(
    leaf: &Certificate,
    leaf_der: &[u8],
    algorithm: DigestAlgorithm,
) -> Result<SigningCertificateV2> {
    let hash_algorithm = match algorithm {
        DigestAlgorithm::Sha256 => None,
        other => Some(AlgorithmIdentifierOwned {
            oid: other.oid(),
            parameters: None,
        }),
    };
    Ok(SigningCertificateV2 {
        certs: vec![EssCertIdV2 {
            hash_algorithm,
            cert_hash: OctetString::new(digest(leaf_der, algorithm))?,
            issuer_serial: IssuerSerial {
                issuer: vec![GeneralName::DirectoryName(leaf.tbs_certificate.issuer.clone())],
                serial_number: leaf.tbs_certificate.serial_number.clone(),
            },
        }],
    })
}

fn revocation_info_archival(evidence: &RevocationEvidence) -> Result<RevocationInfoArchival> {
    let to_any = |items: &[Vec<u8>]| -> Result<Option<Vec<Any>>> {
        if items.is_empty() {
            return Ok(None);
        }
        let decoded = items.iter().map(|item| Any::from_der(item)).collect::<der::Result<Vec<_>>>()?;
        Ok(Some(decoded))
    };
    Ok(RevocationInfoArchival {
        crl: to_any(&evidence.crls)?,
        ocsp: to_any(&evidence.ocsp_responses)?,
    })
}

fn revocation_entries(evidence: &RevocationEvidence) -> Result<Vec<RevocationEntry>> {
    let mut entries = Vec::with_capacity(evidence.len());
    for crl in &evidence.crls {
        entries.push(RevocationEntry::Crl(CertificateList::from_der(crl)?));
    }
    for response in &evidence.ocsp_responses {
        entries.push(RevocationEntry::Other(OtherRevocationInfo {
            format: ID_RI_OCSP_RESPONSE,
            info: Any::from_der(response)?,
        }));
    }
    Ok(entries)
}
