use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;
use tracing::info;

use crate::error::{Error, Result};

/// Load the PEM certificate chain and private key from disk and build the
/// server-side TLS config used by the acceptor.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>> {
    let cert_pem = std::fs::read(cert_path).map_err(|e| {
        Error::Tls(format!(
            "failed to read certificate '{}': {e}",
            cert_path.display()
        ))
    })?;
    let key_pem = std::fs::read(key_path).map_err(|e| {
        Error::Tls(format!(
            "failed to read private key '{}': {e}",
            key_path.display()
        ))
    })?;

    let config = build_server_config(&cert_pem, &key_pem)?;
    info!(cert = %cert_path.display(), "TLS identity loaded");
    Ok(Arc::new(config))
}

/// Parse PEM certificate chain and private key, then build a rustls ServerConfig.
pub fn build_server_config(cert_pem: &[u8], key_pem: &[u8]) -> Result<ServerConfig> {
    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::CertParse(format!("failed to parse certificate PEM: {e}")))?;

    if certs.is_empty() {
        return Err(Error::CertParse("no certificates found in PEM".into()));
    }

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| Error::CertParse(format!("failed to parse private key PEM: {e}")))?
        .ok_or_else(|| Error::CertParse("no private key found in PEM".into()))?;

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(format!("failed to build TLS server config: {e}")))
}
