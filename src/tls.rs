//! TLS termination for the primary listener, selected by `Config.tls`.
//!
//! Certificate acquisition and renewal are out of scope: `AutoCert` names a
//! strategy an operator can select, but provisioning the certificate it
//! names is left to deployment tooling outside this crate, same as the
//! payment node's wire shape (`payment_node.rs`) is left to deployment
//! wiring behind the `PaymentNode` trait.

use crate::config::TlsConfig;
use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to load TLS certificate/key: {0}")]
    Load(#[from] std::io::Error),
    #[error(
        "automatic certificate provisioning is not implemented in this build; \
         configure tls.mode = self_signed with a cert_path/key_path instead"
    )]
    AutoCertUnsupported,
}

/// Resolves `tls` into a loaded rustls server config, or `None` for a
/// plaintext listener.
pub async fn resolve(tls: &TlsConfig) -> Result<Option<RustlsConfig>, TlsError> {
    match tls {
        TlsConfig::Disabled => Ok(None),
        TlsConfig::SelfSigned { cert_path, key_path } => {
            Ok(Some(RustlsConfig::from_pem_file(cert_path, key_path).await?))
        }
        TlsConfig::AutoCert { .. } => Err(TlsError::AutoCertUnsupported),
    }
}
