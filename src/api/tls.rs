// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! TLSA-pinned TLS for the agent-to-agent API.
//!
//! Peer connections do not use the system trust chain at all: the
//! peer's DNS-published TLSA record is the root of trust. Outbound,
//! a custom certificate verifier accepts exactly the certificate
//! whose Common Name equals the expected identity and whose
//! association matches the TLSA record. Inbound, the TLS layer
//! requests (but does not require) a client certificate; request
//! handlers decide per endpoint whether an authenticated peer is
//! needed, so that `/hello` stays reachable during bootstrap.

use crate::agent::AgentId;
use crate::errors::AuthError;
use crate::resolver::TlsaInfo;
use anyhow::{Context, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{
    ClientConfig, DigitallySignedStruct, DistinguishedName, Error as TlsError, ServerConfig,
    SignatureScheme,
};
use sha2::{Digest, Sha256, Sha512};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use x509_parser::prelude::*;

/// The local agent's certificate chain and private key.
pub struct TlsMaterial {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl TlsMaterial {
    /// Load PEM-encoded certificate chain and private key from disk.
    ///
    /// # Errors
    ///
    /// I/O or PEM decoding failures, or a key file without a usable
    /// private key.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let cert_pem = std::fs::read(cert_path)
            .with_context(|| format!("reading certificate file {}", cert_path.display()))?;
        let cert_chain = rustls_pemfile::certs(&mut cert_pem.as_slice())
            .collect::<std::io::Result<Vec<_>>>()
            .context("parsing certificate PEM")?;
        if cert_chain.is_empty() {
            anyhow::bail!("no certificates in {}", cert_path.display());
        }

        let key_pem = std::fs::read(key_path)
            .with_context(|| format!("reading key file {}", key_path.display()))?;
        let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
            .context("parsing key PEM")?
            .with_context(|| format!("no private key in {}", key_path.display()))?;

        Ok(Self { cert_chain, key })
    }

    /// Build from DER material directly (test fixture path).
    #[must_use]
    pub fn from_der(cert_chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
        Self { cert_chain, key }
    }

    /// The leaf certificate in DER form.
    #[must_use]
    pub fn leaf_der(&self) -> Option<&[u8]> {
        self.cert_chain.first().map(AsRef::as_ref)
    }
}

/// Extract the subject Common Name from a DER certificate.
///
/// # Errors
///
/// [`AuthError::MalformedCertificate`] when the certificate does not
/// parse or carries no CN.
pub fn extract_common_name(cert_der: &[u8]) -> Result<String, AuthError> {
    let (_, cert) =
        X509Certificate::from_der(cert_der).map_err(|e| AuthError::MalformedCertificate {
            reason: e.to_string(),
        })?;
    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .ok_or_else(|| AuthError::MalformedCertificate {
            reason: "no Common Name in subject".to_string(),
        })?;
    Ok(cn.to_string())
}

/// Canonicalize a name for identity comparison: lowercase with a
/// trailing dot.
#[must_use]
pub fn normalize_fqdn(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with('.') {
        lower
    } else {
        format!("{lower}.")
    }
}

/// Check a DER certificate against a TLSA association.
///
/// Supports selector 0 (full certificate) and 1 (SubjectPublicKeyInfo)
/// with matching types 0 (exact), 1 (SHA-256), and 2 (SHA-512).
/// Unsupported parameter combinations fail the match.
///
/// # Errors
///
/// [`AuthError::MalformedCertificate`] when the certificate cannot be
/// parsed for SPKI extraction.
pub fn tlsa_matches(cert_der: &[u8], tlsa: &TlsaInfo) -> Result<bool, AuthError> {
    let subject: Vec<u8> = match tlsa.selector {
        0 => cert_der.to_vec(),
        1 => {
            let (_, cert) =
                X509Certificate::from_der(cert_der).map_err(|e| AuthError::MalformedCertificate {
                    reason: e.to_string(),
                })?;
            cert.tbs_certificate.subject_pki.raw.to_vec()
        }
        other => {
            warn!(selector = other, "Unsupported TLSA selector");
            return Ok(false);
        }
    };

    let matched = match tlsa.matching {
        0 => subject == tlsa.data,
        1 => Sha256::digest(&subject).as_slice() == tlsa.data.as_slice(),
        2 => Sha512::digest(&subject).as_slice() == tlsa.data.as_slice(),
        other => {
            warn!(matching = other, "Unsupported TLSA matching type");
            false
        }
    };
    Ok(matched)
}

/// Full peer identity check: CN equality plus TLSA association.
///
/// # Errors
///
/// The specific [`AuthError`] describing the first failed check.
pub fn verify_peer_identity(
    cert_der: &[u8],
    expected: &AgentId,
    tlsa: &TlsaInfo,
) -> Result<(), AuthError> {
    let cn = extract_common_name(cert_der)?;
    let expected_str = expected.to_string();
    if normalize_fqdn(&cn) != normalize_fqdn(&expected_str) {
        return Err(AuthError::CnMismatch {
            cn,
            expected: expected_str,
        });
    }
    if !tlsa_matches(cert_der, tlsa)? {
        return Err(AuthError::TlsaMismatch {
            identity: expected_str,
        });
    }
    Ok(())
}

fn supported_algorithms() -> WebPkiSupportedAlgorithms {
    rustls::crypto::ring::default_provider().signature_verification_algorithms
}

/// Server certificate verifier pinning a peer to its TLSA record.
///
/// Replaces chain building entirely: the offered end-entity
/// certificate must carry the expected identity as its CN and match
/// the peer's TLSA association.
#[derive(Debug)]
pub struct TlsaVerifier {
    expected: AgentId,
    tlsa: TlsaInfo,
    supported: WebPkiSupportedAlgorithms,
}

impl TlsaVerifier {
    /// Pin to one peer identity and TLSA association.
    #[must_use]
    pub fn new(expected: AgentId, tlsa: TlsaInfo) -> Self {
        Self {
            expected,
            tlsa,
            supported: supported_algorithms(),
        }
    }
}

impl ServerCertVerifier for TlsaVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        match verify_peer_identity(end_entity.as_ref(), &self.expected, &self.tlsa) {
            Ok(()) => {
                debug!(identity = %self.expected, "Peer certificate matched TLSA pin");
                Ok(ServerCertVerified::assertion())
            }
            Err(e) => Err(TlsError::General(e.to_string())),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls12_signature(message, cert, dss, &self.supported)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls13_signature(message, cert, dss, &self.supported)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported.supported_schemes()
    }
}

/// Client certificate verifier that records, but does not judge, the
/// offered certificate.
///
/// The handshake accepts any syntactically valid client certificate
/// (or none); the per-request authentication against the registry's
/// TLSA material happens in the API handlers, which is what lets
/// `/hello` through before the peer is locatable.
#[derive(Debug)]
pub struct RecordingClientVerifier {
    supported: WebPkiSupportedAlgorithms,
}

impl RecordingClientVerifier {
    /// Create the verifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            supported: supported_algorithms(),
        }
    }
}

impl Default for RecordingClientVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientCertVerifier for RecordingClientVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, TlsError> {
        Ok(ClientCertVerified::assertion())
    }

    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls12_signature(message, cert, dss, &self.supported)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls13_signature(message, cert, dss, &self.supported)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported.supported_schemes()
    }
}

/// Build the HTTPS client for one peer, pinned to its TLSA record and
/// presenting our certificate for mutual TLS.
///
/// # Errors
///
/// TLS configuration or client construction failures; these are fatal
/// for the peer per the discovery contract.
pub fn build_peer_client(
    identity: &AgentId,
    tlsa: &TlsaInfo,
    material: &Arc<TlsMaterial>,
) -> Result<reqwest::Client> {
    let verifier = Arc::new(TlsaVerifier::new(identity.clone(), tlsa.clone()));
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_client_auth_cert(material.cert_chain.clone(), material.key.clone_key())
        .context("attaching client certificate")?;

    reqwest::Client::builder()
        .use_preconfigured_tls(config)
        .build()
        .context("building HTTPS client")
}

/// TLS server configuration for the agent-to-agent listener: our
/// certificate, client certificates requested but optional.
///
/// # Errors
///
/// Certificate/key rejection by rustls.
pub fn build_sync_server_config(material: &Arc<TlsMaterial>) -> Result<ServerConfig> {
    let config = ServerConfig::builder()
        .with_client_cert_verifier(Arc::new(RecordingClientVerifier::new()))
        .with_single_cert(material.cert_chain.clone(), material.key.clone_key())
        .context("building sync API TLS config")?;
    Ok(config)
}

/// TLS server configuration for the management listener: server
/// certificate only, callers authenticate with the shared secret.
///
/// # Errors
///
/// Certificate/key rejection by rustls.
pub fn build_mgmt_server_config(material: &Arc<TlsMaterial>) -> Result<ServerConfig> {
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(material.cert_chain.clone(), material.key.clone_key())
        .context("building management API TLS config")?;
    Ok(config)
}
