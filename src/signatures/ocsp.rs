//! Minimal OCSP codec (RFC 6960).
//!
//! Only what a signer needs to ask a responder about one certificate and to
//! check that the answer is a successful basic response. Response signatures
//! are not verified; the response is archived for the relying party.

use crate::error::{Error, Result};
use der::asn1::{ObjectIdentifier, OctetString};
use der::{Decode, Encode, Enumerated, Sequence};
use sha1::{Digest, Sha1};
use spki::AlgorithmIdentifierOwned;
use x509_cert::serial_number::SerialNumber;
use x509_cert::Certificate;

const ID_SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");

/// id-pkix-ocsp-basic
pub const ID_PKIX_OCSP_BASIC: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.48.1.1");

/// Identifies the certificate asked about.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CertId {
    /// Hash used for the two issuer hashes (SHA-1)
    pub hash_algorithm: AlgorithmIdentifierOwned,
    /// Hash of the issuer's distinguished name
    pub issuer_name_hash: OctetString,
    /// Hash of the issuer's public key bits
    pub issuer_key_hash: OctetString,
    /// Serial number of the certificate
    pub serial_number: SerialNumber,
}

impl CertId {
    /// CertID of `cert`, issued by `issuer`.
    pub fn new(cert: &Certificate, issuer: &Certificate) -> Result<Self> {
        let name_hash = Sha1::digest(issuer.tbs_certificate.subject.to_der()?);
        let key_hash = Sha1::digest(
            issuer
                .tbs_certificate
                .subject_public_key_info
                .subject_public_key
                .raw_bytes(),
        );
        Ok(Self {
            hash_algorithm: AlgorithmIdentifierOwned {
                oid: ID_SHA1,
                parameters: None,
            },
            issuer_name_hash: OctetString::new(name_hash.to_vec())?,
            issuer_key_hash: OctetString::new(key_hash.to_vec())?,
            serial_number: cert.tbs_certificate.serial_number.clone(),
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct Request {
    req_cert: CertId,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct TbsRequest {
    request_list: Vec<Request>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct OcspRequest {
    tbs_request: TbsRequest,
}

/// OCSPResponseStatus
#[derive(Clone, Copy, Debug, Eq, PartialEq, Enumerated)]
#[repr(u32)]
pub enum OcspResponseStatus {
    /// Response has valid confirmations
    Successful = 0,
    /// Illegal confirmation request
    MalformedRequest = 1,
    /// Internal error in issuer
    InternalError = 2,
    /// Try again later
    TryLater = 3,
    /// Must sign the request
    SigRequired = 5,
    /// Request unauthorized
    Unauthorized = 6,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct ResponseBytes {
    response_type: ObjectIdentifier,
    response: OctetString,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct OcspResponse {
    response_status: OcspResponseStatus,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    response_bytes: Option<ResponseBytes>,
}

/// DER `OCSPRequest` for a single certificate, unsigned and without nonce.
pub fn build_request(cert: &Certificate, issuer: &Certificate) -> Result<Vec<u8>> {
    let request = OcspRequest {
        tbs_request: TbsRequest {
            request_list: vec![Request {
                req_cert: CertId::new(cert, issuer)?,
            }],
        },
    };
    Ok(request.to_der()?)
}

/// Check that `der_bytes` is a successful OCSP response carrying a basic
/// response, returning it unchanged.
pub fn check_response(der_bytes: &[u8]) -> Result<&[u8]> {
    let response = OcspResponse::from_der(der_bytes)?;
    if response.response_status != OcspResponseStatus::Successful {
        return Err(Error::Certificate(format!(
            "OCSP responder answered {:?}",
            response.response_status
        )));
    }
    match response.response_bytes {
        Some(bytes) if bytes.response_type == ID_PKIX_OCSP_BASIC => Ok(der_bytes),
        Some(bytes) => Err(Error::Certificate(format!(
            "unexpected OCSP response type {}",
            bytes.response_type
        ))),
        None => Err(Error::Certificate("OCSP response without response bytes".into())),
    }
}

/// Successful OCSP response wrapping `basic_response` (test helper and
/// building block for static sources).
pub fn wrap_basic_response(basic_response: &[u8]) -> Result<Vec<u8>> {
    let response = OcspResponse {
        response_status: OcspResponseStatus::Successful,
        response_bytes: Some(ResponseBytes {
            response_type: ID_PKIX_OCSP_BASIC,
            response: OctetString::new(basic_response)?,
        }),
    };
    Ok(response.to_der()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successful_response_accepted() {
        let response = wrap_basic_response(&[0x30, 0x00]).unwrap();
        assert_eq!(check_response(&response).unwrap(), response.as_slice());
    }

    #[test]
    fn test_error_status_rejected() {
        let response = OcspResponse {
            response_status: OcspResponseStatus::TryLater,
            response_bytes: None,
        }
        .to_der()
        .unwrap();
        assert!(matches!(check_response(&response), Err(Error::Certificate(_))));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(check_response(b"not der").is_err());
    }
}
