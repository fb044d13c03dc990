//! TLS client identity
//!
//! Builds the mutually-authenticated client configuration used to reach the
//! MQTT broker from the PEM material in a provisioning response. The root CA
//! from the response is the only trust anchor and server verification is
//! always on.

use std::sync::Arc;

use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::model::ProvisioningResponse;

/// Error type for TLS configuration
#[derive(Debug)]
pub enum TlsError {
    /// Certificate parsing error
    CertificateError(String),
    /// Private key error
    PrivateKeyError(String),
    /// TLS configuration error
    ConfigError(String),
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsError::CertificateError(msg) => write!(f, "Certificate error: {}", msg),
            TlsError::PrivateKeyError(msg) => write!(f, "Private key error: {}", msg),
            TlsError::ConfigError(msg) => write!(f, "TLS config error: {}", msg),
        }
    }
}

impl std::error::Error for TlsError {}

/// Parse every certificate in a PEM document
fn load_certs(pem: &str, what: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::CertificateError(format!("Failed to parse {}: {}", what, e)))?;

    if certs.is_empty() {
        return Err(TlsError::CertificateError(format!(
            "No certificates found in {}",
            what
        )));
    }

    Ok(certs)
}

/// Parse the first private key (PKCS#8, PKCS#1 or SEC1) in a PEM document
fn load_private_key(pem: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    PrivateKeyDer::from_pem_slice(pem.as_bytes())
        .map_err(|e| TlsError::PrivateKeyError(format!("Failed to parse private key: {}", e)))
}

/// Load CA certificates into a root store
fn load_ca_certs(pem: &str) -> Result<RootCertStore, TlsError> {
    let mut root_store = RootCertStore::empty();

    for cert in load_certs(pem, "root CA")? {
        root_store.add(cert).map_err(|e| {
            TlsError::CertificateError(format!("Failed to add CA certificate: {}", e))
        })?;
    }

    Ok(root_store)
}

/// Build a client config presenting the device certificate and trusting only
/// the provisioning root CA
pub fn client_config(provisioning: &ProvisioningResponse) -> Result<ClientConfig, TlsError> {
    let root_store = load_ca_certs(&provisioning.root_ca)?;
    let certs = load_certs(&provisioning.pem, "device certificate")?;
    let key = load_private_key(&provisioning.private_key)?;

    ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::ConfigError(format!("Failed to select protocol versions: {}", e)))?
        .with_root_certificates(root_store)
        .with_client_auth_cert(certs, key)
        .map_err(|e| TlsError::ConfigError(format!("Failed to build TLS config: {}", e)))
}

/// Create a connector for the device identity
pub fn connector(provisioning: &ProvisioningResponse) -> Result<TlsConnector, TlsError> {
    Ok(TlsConnector::from(Arc::new(client_config(provisioning)?)))
}

/// Server name used for SNI and certificate verification
pub fn server_name(host: &str) -> Result<ServerName<'static>, TlsError> {
    ServerName::try_from(host.to_string())
        .map_err(|e| TlsError::ConfigError(format!("Invalid broker name '{}': {}", host, e)))
}
