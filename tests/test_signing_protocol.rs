//! End-to-end tests of the two-phase and one-shot signing protocol.

mod common;

use common::*;
use der::{Decode, Encode};
use pdf_remote_sign::config::{
    CertificationPermission, ConfigProvider, EvidencePolicy, Requirement, SignatureConfig,
    SignatureFormParameters, SignatureLevel, TimestampParameters,
};
use pdf_remote_sign::error::{Error, RemoteService};
use pdf_remote_sign::object::Object;
use pdf_remote_sign::signatures::{
    digest, oids, parse_envelope, DetermineSignInput, DigestAlgorithm, EnvelopeSignedData,
    InspectionStatus, KeyFamily, KeyProvider, MergeSignature, NoRevocation, OrigData, RevocationEntry,
    RevocationSource, SessionId, SessionState, SignMode, Signature, SignatureAlgorithm,
    SignatureInspector, SignatureSubFilter, SigningEngine, SigningSession, StaticRevocationSource,
    TimestampAuthority, DOCUMENT_TIMESTAMP_RESERVATION,
};
use pdf_remote_sign::PdfDocument;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn engine(config: SignatureConfig) -> SigningEngine {
    SigningEngine::new(ConfigProvider::offline(config, pki().chain.clone()))
}

fn request(document: &[u8], sign_mode: SignMode) -> DetermineSignInput {
    DetermineSignInput {
        orig_data: OrigData::new(Some("contract.pdf".into()), document.to_vec()),
        sign_mode,
        binding: binding(),
        form_params_override: None,
    }
}

fn signature_over(digest: &[u8]) -> Signature {
    Signature {
        value: sign_digest(&pki().leaf_key, digest),
        algorithm: SignatureAlgorithm::RSA_SHA256,
        binding: binding(),
    }
}

/// Two-phase run with a locally produced signature.
fn two_phase(engine: &SigningEngine, document: &[u8]) -> Vec<u8> {
    let response = engine.determine_sign_input(&request(document, SignMode::Digest)).unwrap();
    engine
        .merge_signature(&MergeSignature {
            orig_data: OrigData::new(Some("contract.pdf".into()), document.to_vec()),
            signature: signature_over(&response.sign_input.input),
            session_id: response.session_id,
        })
        .unwrap()
        .value
}

/// Decoded envelope of the newest signature.
fn last_envelope(signed: &[u8]) -> EnvelopeSignedData {
    let doc = PdfDocument::from_bytes(signed.to_vec()).unwrap();
    let (_, dict) = doc.signature_dictionaries().unwrap().pop().unwrap();
    let contents = dict.get("Contents").and_then(Object::as_string).unwrap();
    let content_info = parse_envelope(contents).unwrap();
    EnvelopeSignedData::from_der(&content_info.content.to_der().unwrap()).unwrap()
}

struct CountingSource {
    calls: AtomicUsize,
}

impl RevocationSource for CountingSource {
    fn get_crl(&self, _cert: &[u8], _issuer: &[u8]) -> pdf_remote_sign::Result<Option<Vec<u8>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    fn get_ocsp(&self, _cert: &[u8], _issuer: &[u8]) -> pdf_remote_sign::Result<Option<Vec<u8>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(ocsp_response()))
    }
}

mod scenarios {
    use super::*;

    #[test]
    fn test_long_term_two_phase_signature() {
        let tsa = Arc::new(LocalTsa::default());
        let engine = engine(SignatureConfig::new(SignatureLevel::PAdES_BASELINE_LT))
            .with_revocation_source(Arc::new(StaticRevocationSource::default().with_ocsp(ocsp_response())))
            .with_timestamp_authority(tsa.clone());
        let document = one_page_pdf("1.7");

        let response = engine.determine_sign_input(&request(&document, SignMode::Digest)).unwrap();
        assert_eq!(response.sign_input.input.len(), 32);
        assert_eq!(response.sign_input.digest_algorithm, DigestAlgorithm::Sha256);

        let signature = signature_over(&response.sign_input.input);
        let output = engine
            .merge_signature(&MergeSignature {
                orig_data: OrigData::new(Some("contract.pdf".into()), document.clone()),
                signature: signature.clone(),
                session_id: response.session_id,
            })
            .unwrap();
        let signed = output.value;
        assert_eq!(output.name.as_deref(), Some("contract.pdf"));
        assert!(signed.starts_with(&document));

        let result = SignatureInspector::new().inspect_last(&signed).unwrap();
        assert_eq!(result.status, InspectionStatus::Intact, "{:?}", result.messages);
        assert!(result.info.covers_whole_document);
        assert_eq!(result.info.sub_filter, Some(SignatureSubFilter::CadesDetached));

        // The placeholder holds the whole reservation: `<` + 2n hex digits + `>`.
        let range = &result.info.byte_range;
        let reservation = ((range[2] - range[1] - 2) / 2) as usize;
        assert!(reservation >= 12_288, "reservation {}", reservation);

        let envelope = result.envelope.unwrap();
        assert_eq!(envelope.signature_value, signature.value);
        assert_eq!(envelope.certificates, 2);
        assert!(envelope.revocation_items >= 1);
        assert!(envelope.has_timestamp);

        // The signer saw the digest of exactly the signed attributes.
        let signed_data = last_envelope(&signed);
        let signer = signed_data.signer_infos.0.iter().next().unwrap();
        let signed_attrs = signer.signed_attrs.as_ref().unwrap().to_der().unwrap();
        let attrs_digest = digest(&signed_attrs, DigestAlgorithm::Sha256);
        assert_eq!(attrs_digest, response.sign_input.input);
        assert!(verify_digest(&pki().leaf_public_key(), &attrs_digest, &envelope.signature_value));

        // OCSP evidence sits in `crls` as OtherRevocationInfoFormat with a bare OID.
        let crls = signed_data.crls.as_ref().unwrap();
        assert_eq!(crls.len(), 1);
        match crls.iter().next().unwrap() {
            RevocationEntry::Other(other) => {
                assert_eq!(other.format, oids::ID_RI_OCSP_RESPONSE);
                assert_eq!(other.info.to_der().unwrap(), ocsp_response());
            },
            RevocationEntry::Crl(_) => panic!("expected OCSP evidence"),
        }
        let entry = crls.iter().next().unwrap().to_der().unwrap();
        assert_eq!((entry[0], entry[2]), (0xA1, 0x06));

        let imprints = tsa.imprints.lock().unwrap();
        assert_eq!(imprints.as_slice(), &[digest(&signature.value, DigestAlgorithm::Sha256)]);
    }

    #[test]
    fn test_output_length_matches_prepared_revision() {
        let config = SignatureConfig::new(SignatureLevel::PAdES_BASELINE_LT);
        let document = one_page_pdf("1.7");
        let source = StaticRevocationSource::default().with_ocsp(ocsp_response());
        let mut session = SigningSession::open(config, binding(), SignatureFormParameters::default(), None);
        session.prepare(&document, &pki().chain, &source, true).unwrap();

        let prepared = session.prepared().unwrap().clone();
        let revision = prepared.bytes().len() - document.len();
        assert!(prepared.bytes().starts_with(&document));
        assert!(revision > 2 * prepared.reservation() + 2);

        let tsa = LocalTsa::default();
        let (signed, _) = session
            .sign_with(&LocalKeyProvider::new(), Some(&tsa as &dyn TimestampAuthority))
            .unwrap();
        assert_eq!(signed.len(), prepared.bytes().len());
        assert_eq!(signed.len(), document.len() + revision);

        // Only the placeholder changed.
        let [_, first_len, second_start, _] = prepared.byte_range();
        let (gap_start, gap_end) = (first_len as usize, second_start as usize);
        assert_eq!(gap_end - gap_start, 2 * prepared.reservation() + 2);
        assert_eq!(signed[..gap_start], prepared.bytes()[..gap_start]);
        assert_eq!(signed[gap_end..], prepared.bytes()[gap_end..]);
        assert_ne!(signed[gap_start..gap_end], prepared.bytes()[gap_start..gap_end]);
    }

    #[test]
    fn test_reservation_too_small() {
        let engine = engine(SignatureConfig::new(SignatureLevel::PAdES_BASELINE_B).with_estimated_size(16));
        let document = one_page_pdf("1.7");

        let response = engine.determine_sign_input(&request(&document, SignMode::Digest)).unwrap();
        let merge = MergeSignature {
            orig_data: OrigData::new(None, document),
            signature: signature_over(&response.sign_input.input),
            session_id: response.session_id,
        };
        match engine.merge_signature(&merge) {
            Err(Error::InsufficientReservation { required, reserved }) => {
                assert_eq!(reserved, 16);
                assert!(required > 16);
            },
            other => panic!("expected InsufficientReservation, got {:?}", other),
        }
        // The failed merge used up the session.
        assert!(matches!(engine.merge_signature(&merge), Err(Error::AlreadyClosed)));
    }

    #[test]
    fn test_one_shot_with_unreachable_signer() {
        let config = SignatureConfig::new(SignatureLevel::PAdES_BASELINE_B);
        let engine = SigningEngine::new(ConfigProvider::online(
            Arc::new(FixedConfigStore(config.clone())),
            Arc::new(UnreachableSigner),
        ));
        let document = one_page_pdf("1.7");

        match engine.sign(&request(&document, SignMode::Digest)) {
            Err(Error::RemoteService { service, message }) => {
                assert_eq!(service, RemoteService::Signer);
                assert!(message.contains("connection refused"));
            },
            other => panic!("expected RemoteService, got {:?}", other),
        }

        let mut session = SigningSession::open(config, binding(), SignatureFormParameters::default(), None);
        session.prepare(&document, &pki().chain, &NoRevocation, false).unwrap();
        assert!(session.sign_with(&UnreachableSigner, None).is_err());
        assert_eq!(session.state(), SessionState::Prepared);

        let (signed, _) = session.sign_with(&LocalKeyProvider::new(), None).unwrap();
        assert_eq!(session.state(), SessionState::Finalized);
        assert!(signed.len() > document.len());
    }

    #[test]
    fn test_certification_over_certified_document() {
        let certifying = SignatureFormParameters::default().with_certification(CertificationPermission::NoChanges);
        let first = engine(SignatureConfig::new(SignatureLevel::PAdES_BASELINE_B).with_form_parameters(certifying.clone()));
        let certified = two_phase(&first, &one_page_pdf("1.7"));

        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let second = engine(SignatureConfig::new(SignatureLevel::PAdES_BASELINE_LT))
            .with_revocation_source(source.clone())
            .with_timestamp_authority(Arc::new(LocalTsa::default()));
        let mut req = request(&certified, SignMode::Digest);
        req.form_params_override = Some(certifying);

        assert!(matches!(
            second.determine_sign_input(&req),
            Err(Error::CertificationConflict(_))
        ));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}

mod protocol_state {
    use super::*;

    #[test]
    fn test_merge_twice() {
        let engine = engine(SignatureConfig::new(SignatureLevel::PKCS7_B));
        let document = one_page_pdf("1.7");
        let response = engine.determine_sign_input(&request(&document, SignMode::Digest)).unwrap();
        let merge = MergeSignature {
            orig_data: OrigData::new(None, document),
            signature: signature_over(&response.sign_input.input),
            session_id: response.session_id,
        };

        assert!(engine.merge_signature(&merge).is_ok());
        assert!(matches!(engine.merge_signature(&merge), Err(Error::AlreadyClosed)));
    }

    #[test]
    fn test_unknown_session() {
        let engine = engine(SignatureConfig::new(SignatureLevel::PKCS7_B));
        let merge = MergeSignature {
            orig_data: OrigData::new(None, one_page_pdf("1.7")),
            signature: signature_over(&[0; 32]),
            session_id: SessionId::new(),
        };
        assert!(matches!(engine.merge_signature(&merge), Err(Error::SessionNotFound(_))));
    }

    #[test]
    fn test_merge_rejects_other_document_and_binding() {
        let engine = engine(SignatureConfig::new(SignatureLevel::PKCS7_B));
        let document = one_page_pdf("1.7");

        let response = engine.determine_sign_input(&request(&document, SignMode::Digest)).unwrap();
        let mut merge = MergeSignature {
            orig_data: OrigData::new(None, one_page_pdf("1.4")),
            signature: signature_over(&response.sign_input.input),
            session_id: response.session_id,
        };
        assert!(matches!(engine.merge_signature(&merge), Err(Error::Validation(_))));
        // The rejected request left the session open.
        merge.orig_data = OrigData::new(None, document.clone());
        assert!(engine.merge_signature(&merge).is_ok());

        let response = engine.determine_sign_input(&request(&document, SignMode::Digest)).unwrap();
        let mut signature = signature_over(&response.sign_input.input);
        signature.binding.kid = "another-key".into();
        let merge = MergeSignature {
            orig_data: OrigData::new(None, document),
            signature,
            session_id: response.session_id,
        };
        assert!(matches!(engine.merge_signature(&merge), Err(Error::Validation(_))));
    }

    #[test]
    fn test_invalid_signature_keeps_session_open() {
        let engine = engine(SignatureConfig::new(SignatureLevel::PAdES_BASELINE_B));
        let document = one_page_pdf("1.7");
        let response = engine.determine_sign_input(&request(&document, SignMode::Digest)).unwrap();

        let mut merge = MergeSignature {
            orig_data: OrigData::new(None, document),
            signature: Signature {
                value: Vec::new(),
                algorithm: SignatureAlgorithm::RSA_SHA256,
                binding: binding(),
            },
            session_id: response.session_id,
        };
        assert!(matches!(engine.merge_signature(&merge), Err(Error::Validation(_))));

        merge.signature = signature_over(&response.sign_input.input);
        merge.signature.algorithm = SignatureAlgorithm::new(KeyFamily::Rsa, DigestAlgorithm::Sha512);
        assert!(matches!(engine.merge_signature(&merge), Err(Error::Validation(_))));

        merge.signature = signature_over(&response.sign_input.input);
        let signed = engine.merge_signature(&merge).unwrap().value;
        let result = SignatureInspector::new().inspect_last(&signed).unwrap();
        assert_eq!(result.status, InspectionStatus::Intact, "{:?}", result.messages);
        assert!(matches!(engine.merge_signature(&merge), Err(Error::AlreadyClosed)));
    }

    #[test]
    fn test_empty_inputs() {
        let engine = engine(SignatureConfig::new(SignatureLevel::PKCS7_B));
        assert!(matches!(
            engine.determine_sign_input(&request(b"", SignMode::Digest)),
            Err(Error::Validation(_))
        ));

        let document = one_page_pdf("1.7");
        let response = engine.determine_sign_input(&request(&document, SignMode::Digest)).unwrap();
        let merge = MergeSignature {
            orig_data: OrigData::new(None, document),
            signature: Signature {
                value: Vec::new(),
                algorithm: SignatureAlgorithm::RSA_SHA256,
                binding: binding(),
            },
            session_id: response.session_id,
        };
        assert!(matches!(engine.merge_signature(&merge), Err(Error::Validation(_))));
    }

    #[test]
    fn test_unsupported_level() {
        let engine = engine(SignatureConfig::new(SignatureLevel::XAdES_BASELINE_B));
        assert!(matches!(
            engine.determine_sign_input(&request(&one_page_pdf("1.7"), SignMode::Digest)),
            Err(Error::UnsupportedSignatureLevel(_))
        ));
    }

    #[test]
    fn test_externalized_session() {
        let config = SignatureConfig::new(SignatureLevel::PAdES_BASELINE_B);
        let document = one_page_pdf("1.7");
        let mut session = SigningSession::open(config, binding(), SignatureFormParameters::default(), None);
        session.prepare(&document, &pki().chain, &NoRevocation, false).unwrap();
        let input = session.sign_input(SignMode::Digest).unwrap();

        let json = session.to_json().unwrap();
        let mut restored = SigningSession::from_json(&json).unwrap();
        assert_eq!(restored.id(), session.id());
        assert_eq!(restored.state(), SessionState::Prepared);

        restored.check_document(&document).unwrap();
        let signed = restored.merge(&signature_over(&input.input), None).unwrap();
        let result = SignatureInspector::new().inspect_last(&signed).unwrap();
        assert_eq!(result.status, InspectionStatus::Intact);
        assert!(matches!(restored.sign_input(SignMode::Digest), Err(Error::AlreadyClosed)));
    }
}

mod evidence {
    use super::*;

    #[test]
    fn test_long_term_without_revocation_evidence() {
        let engine = engine(SignatureConfig::new(SignatureLevel::PAdES_BASELINE_LT))
            .with_timestamp_authority(Arc::new(LocalTsa::default()));
        let document = one_page_pdf("1.7");
        let response = engine.determine_sign_input(&request(&document, SignMode::Digest)).unwrap();
        let merge = MergeSignature {
            orig_data: OrigData::new(None, document),
            signature: signature_over(&response.sign_input.input),
            session_id: response.session_id,
        };
        assert!(matches!(
            engine.merge_signature(&merge),
            Err(Error::MissingRevocationEvidence(level)) if level == "PAdES_BASELINE_LT"
        ));
    }

    #[test]
    fn test_timestamp_level_without_tsa() {
        let engine = engine(SignatureConfig::new(SignatureLevel::PAdES_BASELINE_T));
        assert!(matches!(
            engine.determine_sign_input(&request(&one_page_pdf("1.7"), SignMode::Digest)),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_required_timestamp_failure() {
        let engine = engine(SignatureConfig::new(SignatureLevel::PAdES_BASELINE_T))
            .with_timestamp_authority(Arc::new(UnreachableTsa));
        let document = one_page_pdf("1.7");
        let response = engine.determine_sign_input(&request(&document, SignMode::Digest)).unwrap();
        let merge = MergeSignature {
            orig_data: OrigData::new(None, document),
            signature: signature_over(&response.sign_input.input),
            session_id: response.session_id,
        };
        assert!(matches!(
            engine.merge_signature(&merge),
            Err(Error::RemoteService {
                service: RemoteService::Timestamp,
                ..
            })
        ));
    }

    #[test]
    fn test_best_effort_timestamp_failure() {
        let policy = EvidencePolicy {
            timestamp: Requirement::BestEffort,
            revocation: Requirement::BestEffort,
            archival_timestamp: false,
        };
        let engine = engine(SignatureConfig::new(SignatureLevel::PAdES_BASELINE_T).with_evidence_policy(policy))
            .with_timestamp_authority(Arc::new(UnreachableTsa));
        let signed = two_phase(&engine, &one_page_pdf("1.7"));

        let result = SignatureInspector::new().inspect_last(&signed).unwrap();
        assert_eq!(result.status, InspectionStatus::Intact);
        assert!(!result.envelope.unwrap().has_timestamp);
    }

    #[test]
    fn test_pkcs7_long_term_archives_revocation_in_attribute() {
        let engine = engine(SignatureConfig::new(SignatureLevel::PKCS7_LT))
            .with_revocation_source(Arc::new(StaticRevocationSource::default().with_ocsp(ocsp_response())))
            .with_timestamp_authority(Arc::new(LocalTsa::default()));
        let signed = two_phase(&engine, &one_page_pdf("1.7"));

        let result = SignatureInspector::new().inspect_last(&signed).unwrap();
        assert_eq!(result.info.sub_filter, Some(SignatureSubFilter::Pkcs7Detached));
        let envelope = result.envelope.unwrap();
        assert_eq!(envelope.revocation_items, 1);
        assert!(envelope.has_timestamp);
        assert!(last_envelope(&signed).crls.is_none());
    }

    #[test]
    fn test_archival_document_timestamp() {
        let tsa = Arc::new(LocalTsa::default());
        let engine = engine(SignatureConfig::new(SignatureLevel::PAdES_BASELINE_LTA))
            .with_revocation_source(Arc::new(StaticRevocationSource::default().with_ocsp(ocsp_response())))
            .with_timestamp_authority(tsa.clone());
        let signed = two_phase(&engine, &one_page_pdf("1.7"));

        let results = SignatureInspector::new().inspect(&signed).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, InspectionStatus::Intact, "{:?}", results[0].messages);
        assert!(!results[0].info.covers_whole_document);
        assert_eq!(results[1].info.sub_filter, Some(SignatureSubFilter::Rfc3161));
        assert_eq!(results[1].status, InspectionStatus::Intact, "{:?}", results[1].messages);
        assert!(results[1].info.covers_whole_document);
        // Signature timestamp and document timestamp.
        assert_eq!(tsa.imprints.lock().unwrap().len(), 2);

        let range = &results[1].info.byte_range;
        assert_eq!((range[2] - range[1]) as usize, 2 * DOCUMENT_TIMESTAMP_RESERVATION + 2);
    }

    #[test]
    fn test_document_timestamp_reservation_from_config() {
        let config = SignatureConfig::new(SignatureLevel::PAdES_BASELINE_LTA)
            .with_timestamp(TimestampParameters::new("http://tsa.example.test").with_token_reservation(4096));
        let roomy = engine(config)
            .with_revocation_source(Arc::new(StaticRevocationSource::default().with_ocsp(ocsp_response())))
            .with_timestamp_authority(Arc::new(LocalTsa::default()));
        let signed = two_phase(&roomy, &one_page_pdf("1.7"));

        let result = SignatureInspector::new().inspect_last(&signed).unwrap();
        assert_eq!(result.info.sub_filter, Some(SignatureSubFilter::Rfc3161));
        assert_eq!(result.status, InspectionStatus::Intact, "{:?}", result.messages);
        let range = &result.info.byte_range;
        assert_eq!(range[2] - range[1], 2 * 4096 + 2);

        // A token larger than the reservation fails the merge.
        let config = SignatureConfig::new(SignatureLevel::PAdES_BASELINE_LTA)
            .with_timestamp(TimestampParameters::new("http://tsa.example.test").with_token_reservation(64));
        let cramped = engine(config)
            .with_revocation_source(Arc::new(StaticRevocationSource::default().with_ocsp(ocsp_response())))
            .with_timestamp_authority(Arc::new(LocalTsa::default()));
        let document = one_page_pdf("1.7");
        let response = cramped.determine_sign_input(&request(&document, SignMode::Digest)).unwrap();
        let merge = MergeSignature {
            orig_data: OrigData::new(None, document),
            signature: signature_over(&response.sign_input.input),
            session_id: response.session_id,
        };
        assert!(matches!(
            cramped.merge_signature(&merge),
            Err(Error::InsufficientReservation { reserved: 64, .. })
        ));
    }
}

mod one_shot {
    use super::*;

    #[test]
    fn test_one_shot_signing() {
        let provider = Arc::new(LocalKeyProvider::new());
        let engine = SigningEngine::new(ConfigProvider::online(
            Arc::new(FixedConfigStore(SignatureConfig::new(SignatureLevel::PAdES_BASELINE_B))),
            provider.clone(),
        ));
        let document = one_page_pdf("1.7");
        let output = engine.sign(&request(&document, SignMode::Digest)).unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(output.signature.binding, binding());
        let result = SignatureInspector::new().inspect_last(&output.value).unwrap();
        assert_eq!(result.status, InspectionStatus::Intact);
        assert_eq!(result.envelope.unwrap().signature_value, output.signature.value);
    }

    #[test]
    fn test_one_shot_requires_key_provider() {
        let engine = engine(SignatureConfig::new(SignatureLevel::PAdES_BASELINE_B));
        assert!(matches!(
            engine.sign(&request(&one_page_pdf("1.7"), SignMode::Digest)),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_document_mode_input() {
        let engine = engine(SignatureConfig::new(SignatureLevel::PAdES_BASELINE_B));
        let response = engine
            .determine_sign_input(&request(&one_page_pdf("1.7"), SignMode::Document))
            .unwrap();
        // DER SET OF Attribute
        assert_eq!(response.sign_input.input[0], 0x31);

        let digested = engine.digest(response.sign_input.clone());
        assert_eq!(digested.sign_mode, SignMode::Digest);
        assert_eq!(digested.input, digest(&response.sign_input.input, DigestAlgorithm::Sha256));
        assert_eq!(engine.digest(digested.clone()), digested);
    }

    #[test]
    fn test_key_provider_chain_lookup() {
        let provider = LocalKeyProvider::new();
        assert_eq!(provider.get_certificate_chain(&binding()).unwrap().len(), 2);
    }
}

mod properties {
    use super::*;
    use chrono::{DateTime, Utc};
    use pdf_remote_sign::signatures::{
        prepare_document, CertificateChain, EnvelopeSkeleton, PlaceholderRequest, RevocationEvidence,
    };
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Same inputs and date give byte-identical signed attributes.
        #[test]
        fn skeleton_is_deterministic(
            document_digest in prop::collection::vec(any::<u8>(), 32),
            seconds in 946_684_800i64..4_102_444_800,
            cades in any::<bool>(),
            leaf_only in any::<bool>(),
            with_ocsp in any::<bool>(),
            with_crl in any::<bool>(),
        ) {
            let sub_filter = if cades { SignatureSubFilter::CadesDetached } else { SignatureSubFilter::Pkcs7Detached };
            let date = DateTime::<Utc>::from_timestamp(seconds, 0).unwrap();
            let chain = if leaf_only {
                CertificateChain::new(vec![pki().chain.leaf().to_vec()]).unwrap()
            } else {
                pki().chain.clone()
            };
            let evidence = RevocationEvidence {
                crls: if with_crl { vec![crl()] } else { Vec::new() },
                ocsp_responses: if with_ocsp { vec![ocsp_response()] } else { Vec::new() },
            };
            let build = || {
                EnvelopeSkeleton::build(&document_digest, &chain, &evidence, sub_filter, DigestAlgorithm::Sha256, date)
                    .unwrap()
            };
            let (mut a, mut b) = (build(), build());
            prop_assert_eq!(a.signed_attributes(), b.signed_attributes());
            prop_assert_eq!(a.signed_attributes_digest(), digest(a.signed_attributes(), DigestAlgorithm::Sha256));

            // Finishing both with the same value gives the same envelope.
            let value = sign_digest(&pki().leaf_key, &a.signed_attributes_digest());
            let first = a.finalize(&value, SignatureAlgorithm::RSA_SHA256, None).unwrap();
            let second = b.finalize(&value, SignatureAlgorithm::RSA_SHA256, None).unwrap();
            prop_assert_eq!(&first, &second);
            let content_info = parse_envelope(&first).unwrap();
            let signed_data = EnvelopeSignedData::from_der(&content_info.content.to_der().unwrap()).unwrap();
            let in_crls = signed_data.crls.as_ref().map_or(0, |crls| crls.len());
            if cades {
                prop_assert_eq!(in_crls, evidence.len());
            } else {
                prop_assert_eq!(in_crls, 0);
            }
        }

        /// Patching never moves bytes; oversize envelopes are rejected.
        #[test]
        fn patch_respects_capacity(len in 1usize..200, fill in any::<u8>()) {
            let doc = PdfDocument::from_bytes(one_page_pdf("1.7")).unwrap();
            let prepared = prepare_document(&doc, &PlaceholderRequest::document_timestamp(100)).unwrap();
            let envelope = vec![fill; len];
            match prepared.patch(&envelope) {
                Ok(patched) => {
                    prop_assert!(len <= 100);
                    prop_assert_eq!(patched.len(), prepared.bytes().len());
                    prop_assert_eq!(
                        prepared.canonical_digest(DigestAlgorithm::Sha256).unwrap(),
                        pdf_remote_sign::signatures::ByteRangeCalculator::hash_signed_bytes(
                            &patched,
                            &prepared.byte_range(),
                            DigestAlgorithm::Sha256
                        )
                        .unwrap()
                    );
                },
                Err(Error::InsufficientReservation { required, reserved }) => {
                    prop_assert!(len > 100);
                    prop_assert_eq!((required, reserved), (len, 100));
                },
                Err(e) => prop_assert!(false, "unexpected error {}", e),
            }
        }
    }
}
