//! Detached and remote PDF signing.
//!
//! The private key never has to be in this process. Signing runs as a
//! session in two phases:
//!
//! 1. **Prepare**: an incremental revision with a signature field and a
//!    zero-filled `/Contents` placeholder is appended to the document, the
//!    bytes outside the placeholder are hashed, and the CMS signed
//!    attributes are built over that hash. Their DER (or its digest) is the
//!    data handed to the signer.
//! 2. **Merge**: the signature value is placed into the envelope, the
//!    signature timestamp is fetched if the level asks for one, and the
//!    envelope is written into the placeholder without moving a byte.
//!
//! PAdES levels B, T, LT and LTA are supported with the
//! `adbe.pkcs7.detached` and `ETSI.CAdES.detached` subfilters; LTA adds a
//! document timestamp revision on top of the signature.
//!
//! ## PDF Specification Reference
//!
//! - ISO 32000-1:2008 Section 12.8 - Digital Signatures
//! - ISO 32000-2:2020 Section 12.8 - Digital Signatures
//! - ETSI EN 319 142-1 - PAdES baseline signatures
//! - RFC 5652 (CMS), RFC 5035 (ESS), RFC 3161 (TSP), RFC 6960 (OCSP)

mod api;
mod byterange;
mod digest;
mod envelope;
mod inspector;
pub mod ocsp;
mod preparer;
mod revocation;
mod session;
pub mod timestamp;
mod types;

pub use api::{KeyProvider, SignInputResponse, SignatureConfigStore, SigningEngine};
pub use byterange::ByteRangeCalculator;
pub use digest::{digest, digest_named, digest_sign_input, Hasher};
pub use envelope::{oids, EnvelopeSignedData, EnvelopeSkeleton, OtherRevocationInfo, RevocationEntry};
pub use inspector::{
    parse_envelope, EnvelopeInfo, InspectionResult, InspectionStatus, SignatureInfo, SignatureInspector,
};
pub use preparer::{
    check_certification, estimate_reservation, pdf_date, prepare_document, PlaceholderRequest,
    PreparedDocument, BASE_RESERVATION, DOCUMENT_TIMESTAMP_RESERVATION, LONG_TERM_MARGIN,
};
pub use revocation::{
    collect_revocation, revocation_urls, NoRevocation, RevocationEvidence, RevocationSource,
    RevocationUrls, StaticRevocationSource, EVIDENCE_ITEM_OVERHEAD,
};
#[cfg(feature = "http")]
pub use revocation::HttpRevocationSource;
pub use session::{InMemorySessionStore, SessionId, SessionState, SessionStore, SigningSession};
#[cfg(feature = "http")]
pub use timestamp::HttpTimestampAuthority;
pub use timestamp::TimestampAuthority;
pub use types::{
    CertificateChain, DetermineSignInput, DigestAlgorithm, KeyFamily, MergeSignature, OrigData,
    SignInput, SignMode, SignOutput, Signature, SignatureAlgorithm, SignatureSubFilter,
};
