//! TLS material for the outbound and inbound sides.
//!
//! # Responsibilities
//! - Build per-service rustls client configs: exclusive CA-file root set or
//!   platform roots, optional mTLS keypair, skip-verify (test-only)
//! - Build the downstream server config from configured certificate files

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use thiserror::Error;

use crate::config::model::{CertificatePaths, UpstreamTls};

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("{path}: no certificates found")]
    NoCertificates { path: String },
    #[error("{path}: no private key found")]
    NoPrivateKey { path: String },
    #[error("tls: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Client config for one service's upstream connections. ALPN is left to
/// the connector builder, which sets it per protocol class.
pub fn client_config(tls: &UpstreamTls) -> Result<ClientConfig, TlsError> {
    let builder = if tls.insecure_skip_verify {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification::default()))
    } else if !tls.ca_file.is_empty() {
        let mut roots = RootCertStore::empty();
        for cert in read_certs(&tls.ca_file)? {
            roots.add(cert)?;
        }
        if roots.is_empty() {
            return Err(TlsError::NoCertificates {
                path: tls.ca_file.clone(),
            });
        }
        ClientConfig::builder().with_root_certificates(roots)
    } else {
        ClientConfig::builder().with_root_certificates(platform_roots())
    };

    let config = if !tls.cert_file.is_empty() && !tls.key_file.is_empty() {
        let certs = read_certs(&tls.cert_file)?;
        let key = read_private_key(&tls.key_file)?;
        builder.with_client_auth_cert(certs, key)?
    } else {
        builder.with_no_client_auth()
    };
    Ok(config)
}

/// Default client config used by services without TLS material.
pub fn default_client_config() -> ClientConfig {
    ClientConfig::builder()
        .with_root_certificates(platform_roots())
        .with_no_client_auth()
}

/// Downstream termination config: ALPN advertises h2 then http/1.1.
pub fn server_config(certificates: &[CertificatePaths]) -> Result<ServerConfig, TlsError> {
    // rustls selects certificates through a resolver, not a list; without
    // SAN parsing in the stack, the first configured chain serves every
    // handshake.
    let first = &certificates[0];
    if certificates.len() > 1 {
        tracing::warn!(
            configured = certificates.len(),
            served = %first.cert_file,
            "multiple tls certificates configured, serving the first for all SNI names"
        );
    }
    let chain = read_certs(&first.cert_file)?;
    if chain.is_empty() {
        return Err(TlsError::NoCertificates {
            path: first.cert_file.clone(),
        });
    }
    let key = read_private_key(&first.key_file)?;
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

// An empty store still serves plain-http upstreams; https upstreams then
// fail verification per request.
fn platform_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let loaded = rustls_native_certs::load_native_certs();
    for err in &loaded.errors {
        tracing::warn!(error = %err, "failed loading platform root certificate");
    }
    for cert in loaded.certs {
        let _ = roots.add(cert);
    }
    if roots.is_empty() {
        tracing::warn!("no platform root certificates loaded");
    }
    roots
}

fn read_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Io {
        path: path.to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_string(),
            source,
        })
}

fn read_private_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Io {
        path: path.to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Io {
            path: path.to_string(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey {
            path: path.to_string(),
        })
}

/// Accepts any server certificate. Only reachable through
/// `insecure_skip_verify`, which the config docs mark test-only.
#[derive(Debug)]
struct NoVerification {
    provider: CryptoProvider,
}

impl Default for NoVerification {
    fn default() -> Self {
        Self {
            provider: rustls::crypto::ring::default_provider(),
        }
    }
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
