// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for TLSA pinning and certificate identity checks.

#[cfg(test)]
mod tests {
    use crate::api::tls::{
        build_peer_client, extract_common_name, normalize_fqdn, tlsa_matches,
        verify_peer_identity, TlsMaterial,
    };
    use crate::errors::AuthError;
    use crate::resolver::TlsaInfo;
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
    use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
    use sha2::{Digest, Sha256};
    use std::sync::Arc;

    /// Mint a self-signed certificate with the given CN.
    fn test_cert(cn: &str) -> (Vec<u8>, TlsMaterial) {
        let mut params =
            CertificateParams::new(vec!["agent.test.example".to_string()]).expect("params");
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cn);
        params.distinguished_name = dn;

        let key_pair = KeyPair::generate().expect("key pair");
        let cert = params.self_signed(&key_pair).expect("self signed");
        let der = cert.der().as_ref().to_vec();
        let material = TlsMaterial::from_der(
            vec![cert.der().clone()],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
        );
        (der, material)
    }

    fn sha256_tlsa(der: &[u8]) -> TlsaInfo {
        TlsaInfo {
            usage: 3,
            selector: 0,
            matching: 1,
            data: Sha256::digest(der).to_vec(),
            validated: true,
        }
    }

    #[test]
    fn test_normalize_fqdn() {
        assert_eq!(normalize_fqdn("A.Example"), "a.example.");
        assert_eq!(normalize_fqdn("a.example."), "a.example.");
    }

    #[test]
    fn test_extract_common_name() {
        let (der, _) = test_cert("a.example.");
        assert_eq!(extract_common_name(&der).unwrap(), "a.example.");
    }

    #[test]
    fn test_extract_common_name_rejects_garbage() {
        let err = extract_common_name(&[0x30, 0x03, 0x02, 0x01, 0x01]).unwrap_err();
        assert!(matches!(err, AuthError::MalformedCertificate { .. }));
    }

    #[test]
    fn test_tlsa_full_cert_sha256_match() {
        let (der, _) = test_cert("a.example.");
        assert!(tlsa_matches(&der, &sha256_tlsa(&der)).unwrap());
    }

    #[test]
    fn test_tlsa_mismatch_on_wrong_digest() {
        let (der, _) = test_cert("a.example.");
        let mut tlsa = sha256_tlsa(&der);
        tlsa.data[0] ^= 0xff;
        assert!(!tlsa_matches(&der, &tlsa).unwrap());
    }

    #[test]
    fn test_tlsa_exact_match_selector_full() {
        let (der, _) = test_cert("a.example.");
        let tlsa = TlsaInfo {
            usage: 3,
            selector: 0,
            matching: 0,
            data: der.clone(),
            validated: true,
        };
        assert!(tlsa_matches(&der, &tlsa).unwrap());
    }

    #[test]
    fn test_tlsa_spki_selector() {
        use x509_parser::prelude::*;

        let (der, _) = test_cert("a.example.");
        let (_, cert) = X509Certificate::from_der(&der).unwrap();
        let spki = cert.tbs_certificate.subject_pki.raw;
        let tlsa = TlsaInfo {
            usage: 3,
            selector: 1,
            matching: 1,
            data: Sha256::digest(spki).to_vec(),
            validated: true,
        };
        assert!(tlsa_matches(&der, &tlsa).unwrap());
    }

    #[test]
    fn test_tlsa_unsupported_matching_fails_closed() {
        let (der, _) = test_cert("a.example.");
        let mut tlsa = sha256_tlsa(&der);
        tlsa.matching = 9;
        assert!(!tlsa_matches(&der, &tlsa).unwrap());
    }

    #[test]
    fn test_verify_peer_identity_accepts_match() {
        let (der, _) = test_cert("a.example.");
        let identity = "a.example.".parse().unwrap();
        verify_peer_identity(&der, &identity, &sha256_tlsa(&der)).unwrap();
    }

    #[test]
    fn test_verify_peer_identity_cn_mismatch() {
        let (der, _) = test_cert("a.example.");
        let identity = "b.example.".parse().unwrap();
        let err = verify_peer_identity(&der, &identity, &sha256_tlsa(&der)).unwrap_err();
        assert!(matches!(err, AuthError::CnMismatch { .. }));
    }

    #[test]
    fn test_verify_peer_identity_cn_without_dot_still_matches() {
        let (der, _) = test_cert("a.example");
        let identity = "a.example.".parse().unwrap();
        verify_peer_identity(&der, &identity, &sha256_tlsa(&der)).unwrap();
    }

    #[test]
    fn test_verify_peer_identity_tlsa_mismatch() {
        let (der, _) = test_cert("a.example.");
        let (other_der, _) = test_cert("a.example.");
        let identity = "a.example.".parse().unwrap();
        let err = verify_peer_identity(&der, &identity, &sha256_tlsa(&other_der)).unwrap_err();
        assert!(matches!(err, AuthError::TlsaMismatch { .. }));
    }

    #[test]
    fn test_build_peer_client() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let (der, material) = test_cert("a.example.");
        let identity = "b.example.".parse().unwrap();
        let client = build_peer_client(&identity, &sha256_tlsa(&der), &Arc::new(material));
        assert!(client.is_ok());
    }
}
