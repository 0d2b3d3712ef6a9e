//! Shared fixtures: minimal PDFs, a throwaway RSA PKI and in-process
//! collaborators.

#![allow(dead_code)]

use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{EncapsulatedContentInfo, SignedData, SignerInfos};
use der::asn1::{BitString, GeneralizedTime, ObjectIdentifier, OctetString, SetOfVec, UtcTime};
use der::{Any, Decode, Encode, Sequence};
use pdf_remote_sign::config::{ConfigKeyBinding, SignatureConfig};
use pdf_remote_sign::error::{Error, RemoteService, Result};
use pdf_remote_sign::signatures::oids::ID_SIGNED_DATA;
use pdf_remote_sign::signatures::{
    CertificateChain, DigestAlgorithm, KeyProvider, SignInput, Signature, SignatureAlgorithm,
    SignatureConfigStore, TimestampAuthority,
};
use rsa::pkcs8::EncodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use signature::{SignatureEncoding, Signer};
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use x509_cert::crl::{CertificateList, TbsCertList};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::{Time, Validity};
use x509_cert::{Certificate, TbsCertificate, Version};

const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const ID_CT_TST_INFO: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.4");
const TSA_POLICY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.99999.1");

/// Route `log` output through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One-page document with a classic xref table.
pub fn one_page_pdf(version: &str) -> Vec<u8> {
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>",
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R >>",
        "<< /Length 44 >>\nstream\nBT /F1 12 Tf 72 720 Td (Hello, signer) Tj ET\nendstream",
    ];
    let mut pdf = format!("%PDF-{}\n", version).into_bytes();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }
    let xref = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for off in offsets {
        pdf.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref
        )
        .as_bytes(),
    );
    pdf
}

/// Leaf and intermediate keys with their certificates.
pub struct TestPki {
    pub ca_key: RsaPrivateKey,
    pub leaf_key: RsaPrivateKey,
    pub chain: CertificateChain,
}

impl TestPki {
    pub fn leaf_public_key(&self) -> RsaPublicKey {
        self.leaf_key.to_public_key()
    }
}

/// Key generation is slow in debug builds; one PKI serves every test.
pub fn pki() -> &'static TestPki {
    static PKI: OnceLock<TestPki> = OnceLock::new();
    init_logging();
    PKI.get_or_init(|| {
        let mut rng = rand::thread_rng();
        let ca_key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let leaf_key = RsaPrivateKey::new(&mut rng, 1024).unwrap();

        let ca_name = Name::from_str("CN=Test Intermediate CA,O=Example").unwrap();
        let leaf_name = Name::from_str("CN=Test Signer,O=Example").unwrap();
        let ca = certificate(&ca_key.to_public_key(), &ca_name, &ca_name, &ca_key, 1);
        let leaf = certificate(&leaf_key.to_public_key(), &leaf_name, &ca_name, &ca_key, 2);

        TestPki {
            ca_key,
            leaf_key,
            chain: CertificateChain::new(vec![leaf.to_der().unwrap(), ca.to_der().unwrap()]).unwrap(),
        }
    })
}

fn certificate(subject_key: &RsaPublicKey, subject: &Name, issuer: &Name, issuer_key: &RsaPrivateKey, serial: u8) -> Certificate {
    let algorithm = AlgorithmIdentifierOwned {
        oid: SHA256_WITH_RSA,
        parameters: Some(Any::null()),
    };
    let spki_der = subject_key.to_public_key_der().unwrap();
    let not_before = UtcTime::from_unix_duration(Duration::from_secs(1_700_000_000)).unwrap();
    let not_after = UtcTime::from_unix_duration(Duration::from_secs(2_000_000_000)).unwrap();

    let tbs_certificate = TbsCertificate {
        version: Version::V3,
        serial_number: SerialNumber::new(&[serial]).unwrap(),
        signature: algorithm.clone(),
        issuer: issuer.clone(),
        validity: Validity {
            not_before: Time::UtcTime(not_before),
            not_after: Time::UtcTime(not_after),
        },
        subject: subject.clone(),
        subject_public_key_info: SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes()).unwrap(),
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: None,
    };
    let signer = rsa::pkcs1v15::SigningKey::<Sha256>::new(issuer_key.clone());
    let signature = signer.sign(&tbs_certificate.to_der().unwrap());
    Certificate {
        tbs_certificate,
        signature_algorithm: algorithm,
        signature: BitString::from_bytes(&signature.to_vec()).unwrap(),
    }
}

/// Empty CRL issued by the test intermediate.
pub fn crl() -> Vec<u8> {
    let algorithm = AlgorithmIdentifierOwned {
        oid: SHA256_WITH_RSA,
        parameters: Some(Any::null()),
    };
    let tbs_cert_list = TbsCertList {
        version: Version::V2,
        signature: algorithm.clone(),
        issuer: Name::from_str("CN=Test Intermediate CA,O=Example").unwrap(),
        this_update: Time::UtcTime(UtcTime::from_unix_duration(Duration::from_secs(1_710_000_000)).unwrap()),
        next_update: Some(Time::UtcTime(UtcTime::from_unix_duration(Duration::from_secs(1_720_000_000)).unwrap())),
        revoked_certificates: None,
        crl_extensions: None,
    };
    let signer = rsa::pkcs1v15::SigningKey::<Sha256>::new(pki().ca_key.clone());
    let signature = signer.sign(&tbs_cert_list.to_der().unwrap());
    CertificateList {
        tbs_cert_list,
        signature_algorithm: algorithm,
        signature: BitString::from_bytes(&signature.to_vec()).unwrap(),
    }
    .to_der()
    .unwrap()
}

/// PKCS#1 v1.5 signature over a SHA-256 digest.
pub fn sign_digest(key: &RsaPrivateKey, digest: &[u8]) -> Vec<u8> {
    key.sign(Pkcs1v15Sign::new::<Sha256>(), digest).unwrap()
}

/// Verify a PKCS#1 v1.5 signature over a SHA-256 digest.
pub fn verify_digest(key: &RsaPublicKey, digest: &[u8], signature: &[u8]) -> bool {
    key.verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature).is_ok()
}

pub fn binding() -> ConfigKeyBinding {
    ConfigKeyBinding::new("default", "hsm", "signing-key")
}

/// DER OCSP response accepted by the revocation collector.
pub fn ocsp_response() -> Vec<u8> {
    pdf_remote_sign::signatures::ocsp::wrap_basic_response(&[0x30, 0x03, 0x02, 0x01, 0x07]).unwrap()
}

/// Key provider backed by the test PKI.
pub struct LocalKeyProvider {
    pub calls: AtomicUsize,
}

impl LocalKeyProvider {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

impl KeyProvider for LocalKeyProvider {
    fn get_certificate_chain(&self, _binding: &ConfigKeyBinding) -> Result<CertificateChain> {
        Ok(pki().chain.clone())
    }

    fn sign(&self, input: &SignInput) -> Result<Signature> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Signature {
            value: sign_digest(&pki().leaf_key, &input.input),
            algorithm: SignatureAlgorithm::RSA_SHA256,
            binding: input.binding.clone(),
        })
    }
}

/// Key provider whose signing endpoint is unreachable.
pub struct UnreachableSigner;

impl KeyProvider for UnreachableSigner {
    fn get_certificate_chain(&self, _binding: &ConfigKeyBinding) -> Result<CertificateChain> {
        Ok(pki().chain.clone())
    }

    fn sign(&self, _input: &SignInput) -> Result<Signature> {
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        )))
    }
}

/// Config store holding a single config.
pub struct FixedConfigStore(pub SignatureConfig);

impl SignatureConfigStore for FixedConfigStore {
    fn get_config(&self, _config_id: &str) -> Result<SignatureConfig> {
        Ok(self.0.clone())
    }
}

#[derive(Sequence)]
struct TstInfoFixture {
    version: u8,
    policy: ObjectIdentifier,
    message_imprint: x509_tsp::MessageImprint,
    serial_number: u32,
    gen_time: GeneralizedTime,
}

/// Time-stamp authority answering in-process with unsigned tokens.
#[derive(Default)]
pub struct LocalTsa {
    pub imprints: Mutex<Vec<Vec<u8>>>,
}

impl TimestampAuthority for LocalTsa {
    fn request_token(&self, digest: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        let serial = {
            let mut imprints = self.imprints.lock().unwrap();
            imprints.push(digest.to_vec());
            imprints.len() as u32
        };
        let hash_algorithm = AlgorithmIdentifierOwned {
            oid: algorithm.oid(),
            parameters: None,
        };
        let tst_info = TstInfoFixture {
            version: 1,
            policy: TSA_POLICY,
            message_imprint: x509_tsp::MessageImprint {
                hash_algorithm: hash_algorithm.clone(),
                hashed_message: OctetString::new(digest)?,
            },
            serial_number: serial,
            gen_time: GeneralizedTime::from_unix_duration(Duration::from_secs(1_720_000_000))?,
        };
        let signed_data = SignedData {
            version: CmsVersion::V3,
            digest_algorithms: SetOfVec::try_from(vec![hash_algorithm])?,
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: ID_CT_TST_INFO,
                econtent: Some(Any::encode_from(&OctetString::new(tst_info.to_der()?)?)?),
            },
            certificates: None,
            crls: None,
            signer_infos: SignerInfos::try_from(Vec::new())?,
        };
        Ok(ContentInfo {
            content_type: ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data)?,
        }
        .to_der()?)
    }
}

/// Time-stamp authority that is down.
pub struct UnreachableTsa;

impl TimestampAuthority for UnreachableTsa {
    fn request_token(&self, _digest: &[u8], _algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        Err(Error::remote(RemoteService::Timestamp, "503 Service Unavailable"))
    }
}
