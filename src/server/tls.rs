//! TLS provisioning for the command channel.
//!
//! The service certificate is self-signed and generated on first run if
//! missing, then loaded into a TLS 1.3-only acceptor.

use rcgen::{CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tracing::info;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),
    #[error("certificate i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no certificate found in {0}")]
    EmptyCert(String),
    #[error("no private key found in {0}")]
    EmptyKey(String),
    #[error("tls configuration rejected: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Load the service certificate, generating a self-signed one on first
/// run, and build a TLS 1.3 acceptor from it.
pub fn load_or_generate_acceptor(
    cert_path: &Path,
    key_path: &Path,
) -> Result<TlsAcceptor, TlsError> {
    if !cert_path.exists() || !key_path.exists() {
        generate_self_signed(cert_path, key_path)?;
    }

    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let config = ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn generate_self_signed(cert_path: &Path, key_path: &Path) -> Result<(), TlsError> {
    let mut params =
        CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])?;
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, "vigild");
    params.is_ca = IsCa::NoCa;

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    if let Some(parent) = cert_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(cert_path, cert.pem())?;
    std::fs::write(key_path, key_pair.serialize_pem())?;

    info!(
        cert = %cert_path.display(),
        "self-signed service certificate generated"
    );
    Ok(())
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let pem = std::fs::read(path)?;
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut pem.as_slice()).collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(TlsError::EmptyCert(path.display().to_string()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let pem = std::fs::read(path)?;
    match rustls_pemfile::private_key(&mut pem.as_slice())? {
        Some(key) => Ok(key),
        None => Err(TlsError::EmptyKey(path.display().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_then_reloads_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("certificate.pem");
        let key = dir.path().join("certificate.key");

        assert!(load_or_generate_acceptor(&cert, &key).is_ok());
        assert!(cert.exists());
        assert!(key.exists());

        let first_pem = std::fs::read(&cert).unwrap();
        // Second call loads the existing material instead of regenerating.
        assert!(load_or_generate_acceptor(&cert, &key).is_ok());
        assert_eq!(std::fs::read(&cert).unwrap(), first_pem);
    }
}
