//! RFC 3161 time-stamp tokens.
//!
//! Signature timestamps are requested over the digest of the signature
//! value and embedded as an unsigned attribute; document timestamps are
//! requested over the canonical byte range of a DocTimeStamp revision and
//! embedded as the whole `/Contents`.

use super::digest::digest;
use super::types::DigestAlgorithm;
#[cfg(feature = "http")]
use crate::config::TimestampParameters;
use crate::error::{Error, RemoteService, Result};
use cms::content_info::ContentInfo;
use cms::signed_data::SignedData;
use der::asn1::{Int, OctetString};
use der::{Decode, Encode};
use rand::RngCore;
use spki::AlgorithmIdentifierOwned;
use x509_tsp::{MessageImprint, TimeStampReq, TimeStampResp, TspVersion, TstInfo};

/// A time-stamp authority.
pub trait TimestampAuthority: Send + Sync {
    /// DER `TimeStampToken` (a CMS `ContentInfo`) over `digest`, which was
    /// computed with `algorithm`.
    fn request_token(&self, digest: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>>;
}

/// Token for arbitrary data: hashes `data` and asks `tsa` for a token.
pub fn timestamp_data(tsa: &dyn TimestampAuthority, data: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
    tsa.request_token(&digest(data, algorithm), algorithm)
}

/// DER `TimeStampReq` asking for the TSA certificate, with a random
/// positive nonce.
pub fn build_request(digest: &[u8], algorithm: DigestAlgorithm) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut nonce = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce[0] &= 0x7F;
    nonce[0] |= 0x01;

    let request = TimeStampReq {
        version: TspVersion::V1,
        message_imprint: MessageImprint {
            hash_algorithm: AlgorithmIdentifierOwned {
                oid: algorithm.oid(),
                parameters: None,
            },
            hashed_message: OctetString::new(digest)?,
        },
        req_policy: None,
        nonce: Some(Int::new(&nonce)?),
        cert_req: true,
        extensions: None,
    };
    Ok((request.to_der()?, nonce.to_vec()))
}

/// Extract the token from a DER `TimeStampResp` and check that it
/// timestamps `expected_digest` and answers the request that carried
/// `expected_nonce`.
pub fn parse_response(response: &[u8], expected_digest: &[u8], expected_nonce: &[u8]) -> Result<Vec<u8>> {
    let response = TimeStampResp::from_der(response)
        .map_err(|e| Error::remote(RemoteService::Timestamp, format!("malformed response: {}", e)))?;
    let token = response.time_stamp_token.ok_or_else(|| {
        Error::remote(
            RemoteService::Timestamp,
            format!("no timestamp token, status {:?}", response.status.status),
        )
    })?;
    let token = token.to_der()?;
    let info = token_info(&token)?;
    if info.message_imprint.hashed_message.as_bytes() != expected_digest {
        return Err(Error::remote(
            RemoteService::Timestamp,
            "token does not cover the requested digest",
        ));
    }
    match &info.nonce {
        Some(nonce) if nonce.as_bytes() == expected_nonce => Ok(token),
        Some(_) => Err(Error::remote(RemoteService::Timestamp, "token nonce does not match the request")),
        None => Err(Error::remote(RemoteService::Timestamp, "token carries no nonce")),
    }
}

/// Decode the `TSTInfo` carried by a token.
pub fn token_info(token: &[u8]) -> Result<TstInfo> {
    let content_info = ContentInfo::from_der(token)?;
    let signed_data = SignedData::from_der(&content_info.content.to_der()?)?;
    let econtent = signed_data
        .encap_content_info
        .econtent
        .ok_or_else(|| Error::Certificate("timestamp token has no TSTInfo".into()))?;
    let octets = OctetString::from_der(&econtent.to_der()?)?;
    Ok(TstInfo::from_der(octets.as_bytes())?)
}

/// TSA reached over HTTP (`application/timestamp-query`).
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpTimestampAuthority {
    params: TimestampParameters,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http")]
impl HttpTimestampAuthority {
    /// Client for the configured TSA.
    pub fn new(params: TimestampParameters) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(params.timeout())
            .build()
            .map_err(|e| Error::remote(RemoteService::Timestamp, format!("http client error: {}", e)))?;
        Ok(Self { params, client })
    }
}

#[cfg(feature = "http")]
impl TimestampAuthority for HttpTimestampAuthority {
    fn request_token(&self, digest: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        let (request, nonce) = build_request(digest, algorithm)?;
        let mut post = self
            .client
            .post(&self.params.tsa_url)
            .header("Content-Type", "application/timestamp-query")
            .body(request);
        if let Some(user) = &self.params.username {
            post = post.basic_auth(user, self.params.password.as_deref());
        }
        let response = post.send().map_err(|e| {
            Error::remote(RemoteService::Timestamp, format!("{}: {}", self.params.tsa_url, e))
        })?;
        if !response.status().is_success() {
            return Err(Error::remote(
                RemoteService::Timestamp,
                format!("{} returned status {}", self.params.tsa_url, response.status()),
            ));
        }
        let body = response
            .bytes()
            .map_err(|e| Error::remote(RemoteService::Timestamp, e.to_string()))?;
        log::debug!("TSA {} answered with {} bytes", self.params.tsa_url, body.len());
        parse_response(&body, digest, &nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_encodes_imprint_and_nonce() {
        let digest = [7u8; 32];
        let (request, nonce) = build_request(&digest, DigestAlgorithm::Sha256).unwrap();
        let decoded = TimeStampReq::from_der(&request).unwrap();
        assert_eq!(decoded.message_imprint.hashed_message.as_bytes(), &digest);
        assert_eq!(decoded.message_imprint.hash_algorithm.oid, DigestAlgorithm::Sha256.oid());
        assert!(decoded.cert_req);
        assert_eq!(decoded.nonce.unwrap().as_bytes(), nonce.as_slice());
    }

    /// Granted `TimeStampResp` around an unsigned token.
    fn response(digest: &[u8], nonce: Option<&[u8]>) -> Vec<u8> {
        use cms::content_info::CmsVersion;
        use cms::signed_data::{EncapsulatedContentInfo, SignerInfos};
        use der::asn1::{GeneralizedTime, ObjectIdentifier, SetOfVec};
        use der::{Any, Tag};

        let hash_algorithm = AlgorithmIdentifierOwned {
            oid: DigestAlgorithm::Sha256.oid(),
            parameters: None,
        };
        let info = TstInfo {
            version: TspVersion::V1,
            policy: ObjectIdentifier::new_unwrap("1.3.6.1.4.1.99999.1"),
            message_imprint: MessageImprint {
                hash_algorithm: hash_algorithm.clone(),
                hashed_message: OctetString::new(digest).unwrap(),
            },
            serial_number: Int::new(&[1]).unwrap(),
            gen_time: GeneralizedTime::from_unix_duration(std::time::Duration::from_secs(1_720_000_000)).unwrap(),
            accuracy: None,
            ordering: false,
            nonce: nonce.map(|n| Int::new(n).unwrap()),
            tsa: None,
            extensions: None,
        };
        let signed_data = SignedData {
            version: CmsVersion::V3,
            digest_algorithms: SetOfVec::try_from(vec![hash_algorithm]).unwrap(),
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.4"),
                econtent: Some(Any::encode_from(&OctetString::new(info.to_der().unwrap()).unwrap()).unwrap()),
            },
            certificates: None,
            crls: None,
            signer_infos: SignerInfos::try_from(Vec::new()).unwrap(),
        };
        let token = ContentInfo {
            content_type: ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2"),
            content: Any::encode_from(&signed_data).unwrap(),
        };
        // SEQUENCE { PKIStatusInfo { granted }, token }
        let mut body = vec![0x30, 0x03, 0x02, 0x01, 0x00];
        body.extend_from_slice(&token.to_der().unwrap());
        Any::new(Tag::Sequence, body).unwrap().to_der().unwrap()
    }

    #[test]
    fn test_response_nonce_must_match_request() {
        let digest = [9u8; 32];
        let nonce = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x01];

        let token = parse_response(&response(&digest, Some(&nonce)), &digest, &nonce).unwrap();
        assert_eq!(token_info(&token).unwrap().nonce.unwrap().as_bytes(), &nonce);

        let replayed = [0x12, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x01];
        for bad in [response(&digest, Some(&replayed)), response(&digest, None)] {
            assert!(matches!(
                parse_response(&bad, &digest, &nonce),
                Err(Error::RemoteService {
                    service: RemoteService::Timestamp,
                    ..
                })
            ));
        }

        let other_digest = [8u8; 32];
        assert!(parse_response(&response(&other_digest, Some(&nonce)), &digest, &nonce).is_err());
    }

    #[test]
    fn test_garbage_response_is_remote_error() {
        let err = parse_response(b"\x30\x03\x02\x01\x02", &[0; 32], &[1]).unwrap_err();
        assert!(matches!(
            err,
            Error::RemoteService {
                service: RemoteService::Timestamp,
                ..
            }
        ));
    }
}
