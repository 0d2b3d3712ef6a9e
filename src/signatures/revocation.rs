//! Revocation evidence collection.
//!
//! For every (certificate, issuer) pair of a chain the configured
//! [`RevocationSource`] is asked for an OCSP response and a CRL. Collection is
//! best-effort: a failing pair is logged and skipped, and an empty result is
//! valid. Whether missing evidence is fatal is decided when the signature is
//! merged, from the session's evidence policy.

use super::ocsp;
use super::types::{base64_bytes, CertificateChain};
use crate::error::{Error, Result};
use der::Decode;
use serde::{Deserialize, Serialize};
use x509_cert::crl::CertificateList;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::{DistributionPointName, GeneralName, ParsedExtension};
use x509_parser::prelude::FromDer;
#[cfg(feature = "http")]
use {crate::error::RemoteService, x509_cert::Certificate};

/// Bytes added to the reservation per evidence item.
pub const EVIDENCE_ITEM_OVERHEAD: usize = 10;

/// CRLs and OCSP responses gathered for a chain, DER encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationEvidence {
    /// `CertificateList` structures
    #[serde(with = "base64_bytes::list")]
    pub crls: Vec<Vec<u8>>,
    /// `OCSPResponse` structures
    #[serde(with = "base64_bytes::list")]
    pub ocsp_responses: Vec<Vec<u8>>,
}

impl RevocationEvidence {
    /// No evidence at all.
    pub fn is_empty(&self) -> bool {
        self.crls.is_empty() && self.ocsp_responses.is_empty()
    }

    /// Number of evidence items.
    pub fn len(&self) -> usize {
        self.crls.len() + self.ocsp_responses.len()
    }

    /// Reservation needed for the evidence: each item's length plus
    /// [`EVIDENCE_ITEM_OVERHEAD`].
    pub fn reservation_size(&self) -> usize {
        self.crls
            .iter()
            .chain(&self.ocsp_responses)
            .map(|item| item.len() + EVIDENCE_ITEM_OVERHEAD)
            .sum()
    }
}

/// Source of revocation data for one certificate.
///
/// Both lookups are best-effort: `Ok(None)` means "nothing available",
/// errors are logged by the collector and do not abort collection.
pub trait RevocationSource: Send + Sync {
    /// DER `CertificateList` covering `cert`, as published by its issuer.
    fn get_crl(&self, cert: &[u8], issuer: &[u8]) -> Result<Option<Vec<u8>>>;

    /// DER `OCSPResponse` about `cert`.
    fn get_ocsp(&self, cert: &[u8], issuer: &[u8]) -> Result<Option<Vec<u8>>>;
}

/// Source that never has evidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRevocation;

impl RevocationSource for NoRevocation {
    fn get_crl(&self, _cert: &[u8], _issuer: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn get_ocsp(&self, _cert: &[u8], _issuer: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Source serving pre-fetched evidence for every certificate.
#[derive(Debug, Clone, Default)]
pub struct StaticRevocationSource {
    crl: Option<Vec<u8>>,
    ocsp: Option<Vec<u8>>,
}

impl StaticRevocationSource {
    /// Serve `crl` for every pair.
    pub fn with_crl(mut self, crl: Vec<u8>) -> Self {
        self.crl = Some(crl);
        self
    }

    /// Serve `ocsp` for every pair.
    pub fn with_ocsp(mut self, ocsp: Vec<u8>) -> Self {
        self.ocsp = Some(ocsp);
        self
    }
}

impl RevocationSource for StaticRevocationSource {
    fn get_crl(&self, _cert: &[u8], _issuer: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.crl.clone())
    }

    fn get_ocsp(&self, _cert: &[u8], _issuer: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.ocsp.clone())
    }
}

/// Collect evidence for every adjacent pair of `chain`; the root is skipped.
///
/// Never fails: unavailable or malformed items are logged and left out.
pub fn collect_revocation(chain: &CertificateChain, source: &dyn RevocationSource) -> RevocationEvidence {
    let mut evidence = RevocationEvidence::default();
    for (index, (cert, issuer)) in chain.issuer_pairs().enumerate() {
        match source.get_ocsp(cert, issuer) {
            Ok(Some(response)) => match ocsp::check_response(&response) {
                Ok(_) => push_unique(&mut evidence.ocsp_responses, response),
                Err(e) => log::warn!("dropping OCSP response for chain entry {}: {}", index, e),
            },
            Ok(None) => log::debug!("no OCSP response for chain entry {}", index),
            Err(e) => log::warn!("OCSP lookup for chain entry {} failed: {}", index, e),
        }
        match source.get_crl(cert, issuer) {
            Ok(Some(crl)) => match CertificateList::from_der(&crl) {
                Ok(_) => push_unique(&mut evidence.crls, crl),
                Err(e) => log::warn!("dropping malformed CRL for chain entry {}: {}", index, e),
            },
            Ok(None) => log::debug!("no CRL for chain entry {}", index),
            Err(e) => log::warn!("CRL lookup for chain entry {} failed: {}", index, e),
        }
    }
    log::debug!(
        "collected {} CRLs and {} OCSP responses for a chain of {}",
        evidence.crls.len(),
        evidence.ocsp_responses.len(),
        chain.len()
    );
    evidence
}

// Intermediates often share one CRL.
fn push_unique(items: &mut Vec<Vec<u8>>, item: Vec<u8>) {
    if !items.contains(&item) {
        items.push(item);
    }
}

/// OCSP responder and CRL distribution point URLs of a certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevocationUrls {
    /// Authority Information Access OCSP URLs
    pub ocsp: Vec<String>,
    /// CRL distribution point URLs
    pub crl: Vec<String>,
}

/// Read OCSP and CRL URLs from a DER certificate.
pub fn revocation_urls(cert_der: &[u8]) -> Result<RevocationUrls> {
    const ACCESS_METHOD_OCSP: &str = "1.3.6.1.5.5.7.48.1";

    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| Error::Certificate(format!("cannot parse certificate: {}", e)))?;
    let mut urls = RevocationUrls::default();
    for extension in cert.extensions() {
        match extension.parsed_extension() {
            ParsedExtension::AuthorityInfoAccess(aia) => {
                for desc in &aia.accessdescs {
                    if desc.access_method.to_id_string() != ACCESS_METHOD_OCSP {
                        continue;
                    }
                    if let GeneralName::URI(uri) = &desc.access_location {
                        urls.ocsp.push(uri.to_string());
                    }
                }
            },
            ParsedExtension::CRLDistributionPoints(points) => {
                for point in points.iter() {
                    if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                        for name in names {
                            if let GeneralName::URI(uri) = name {
                                urls.crl.push(uri.to_string());
                            }
                        }
                    }
                }
            },
            _ => {},
        }
    }
    Ok(urls)
}

/// Fetches OCSP responses and CRLs over HTTP from the URLs in the
/// certificate.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpRevocationSource {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http")]
impl HttpRevocationSource {
    /// Source with a per-request timeout.
    pub fn new(timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::remote(RemoteService::Revocation, format!("http client error: {}", e)))?;
        Ok(Self { client })
    }

    fn fetch(&self, request: reqwest::blocking::RequestBuilder, url: &str) -> Result<Vec<u8>> {
        let response = request
            .send()
            .map_err(|e| Error::remote(RemoteService::Revocation, format!("{}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(Error::remote(
                RemoteService::Revocation,
                format!("{} returned status {}", url, response.status()),
            ));
        }
        let body = response
            .bytes()
            .map_err(|e| Error::remote(RemoteService::Revocation, format!("{}: {}", url, e)))?;
        Ok(body.to_vec())
    }
}

#[cfg(feature = "http")]
impl RevocationSource for HttpRevocationSource {
    fn get_crl(&self, cert: &[u8], _issuer: &[u8]) -> Result<Option<Vec<u8>>> {
        for url in revocation_urls(cert)?.crl {
            if !url.starts_with("http") {
                continue;
            }
            match self.fetch(self.client.get(&url), &url) {
                Ok(crl) => return Ok(Some(crl)),
                Err(e) => log::warn!("{}", e),
            }
        }
        Ok(None)
    }

    fn get_ocsp(&self, cert: &[u8], issuer: &[u8]) -> Result<Option<Vec<u8>>> {
        let urls = revocation_urls(cert)?.ocsp;
        if urls.is_empty() {
            return Ok(None);
        }
        let cert = Certificate::from_der(cert).map_err(|e| Error::Certificate(e.to_string()))?;
        let issuer = Certificate::from_der(issuer).map_err(|e| Error::Certificate(e.to_string()))?;
        let request = ocsp::build_request(&cert, &issuer)?;
        for url in urls {
            let post = self
                .client
                .post(&url)
                .header("Content-Type", "application/ocsp-request")
                .body(request.clone());
            match self.fetch(post, &url) {
                Ok(response) => return Ok(Some(response)),
                Err(e) => log::warn!("{}", e),
            }
        }
        Ok(None)
    }
}
