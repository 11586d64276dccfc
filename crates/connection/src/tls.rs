//! TLS assembly for the REST client and the channel transport.
//!
//! Both stacks are built from the same [`TlsConfig`]: custom trust
//! anchor, optional client certificate pair, and a verification toggle
//! for lab teamservers with self-signed certificates.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use tokio_tungstenite::Connector;
use tracing::warn;

use crate::config::TlsConfig;

/// Errors from TLS assembly.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid PEM in {0}")]
    InvalidPem(String),
}

/// Builds the `reqwest` client the REST collaborator runs on.
pub(crate) fn build_http_client(tls: &TlsConfig) -> Result<reqwest::Client, TlsError> {
    let mut builder = reqwest::Client::builder().use_rustls_tls();

    if tls.enabled {
        if !tls.verify {
            warn!("TLS peer verification is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(ca) = &tls.ca_file {
            let pem = std::fs::read(ca)?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }
        if let (Some(cert), Some(key)) = (&tls.client_cert, &tls.client_key) {
            let mut pem = std::fs::read(cert)?;
            pem.extend(std::fs::read(key)?);
            builder = builder.identity(reqwest::Identity::from_pem(&pem)?);
        }
    }

    Ok(builder.build()?)
}

/// Builds the channel connector.
///
/// Returns `None` when the default transport stack suffices — the custom
/// connector only exists for disabled verification, a custom trust
/// anchor, or client authentication.
pub(crate) fn build_ws_connector(tls: &TlsConfig) -> Result<Option<Connector>, TlsError> {
    let needs_custom = tls.enabled
        && (!tls.verify || tls.ca_file.is_some() || tls.client_cert.is_some());
    if !needs_custom {
        return Ok(None);
    }

    let mut roots = rustls::RootCertStore::empty();
    if let Some(ca) = &tls.ca_file {
        for cert in load_certs(ca)? {
            roots
                .add(cert)
                .map_err(|_| TlsError::InvalidPem(ca.display().to_string()))?;
        }
    } else {
        let native = rustls_native_certs::load_native_certs();
        for cert in native.certs {
            let _ = roots.add(cert);
        }
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots);

    let mut config = match (&tls.client_cert, &tls.client_key) {
        (Some(cert), Some(key)) => {
            let certs = load_certs(cert)?;
            let key = load_private_key(key)?;
            builder.with_client_auth_cert(certs, key)?
        }
        _ => builder.with_no_client_auth(),
    };

    if !tls.verify {
        warn!("TLS peer verification is disabled");
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerification { provider }));
    }

    Ok(Some(Connector::Rustls(Arc::new(config))))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = BufReader::new(std::fs::File::open(path)?);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader).collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(TlsError::InvalidPem(path.display().to_string()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = BufReader::new(std::fs::File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| TlsError::InvalidPem(path.display().to_string()))
}

/// Accepts any server certificate. Signatures are still checked so the
/// session keys stay bound to the presented certificate.
#[derive(Debug)]
struct NoVerification {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl rustls::client::danger::ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
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
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
