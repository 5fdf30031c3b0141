//! TLS settings for `https` query addresses.

use std::sync::{Arc, OnceLock};

use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};

use crate::error::QueryError;

/// Client TLS configuration shared by query connections.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Verify servers against the Mozilla root store.
    pub fn with_webpki_roots() -> Result<Self, QueryError> {
        Self::with_extra_roots(Vec::new())
    }

    /// Verify servers against the Mozilla root store plus `extra`, for
    /// Prometheus endpoints behind a private CA.
    pub fn with_extra_roots(extra: Vec<CertificateDer<'static>>) -> Result<Self, QueryError> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        for cert in extra {
            roots
                .add(cert)
                .map_err(|e| QueryError::InvalidEndpoint(format!("bad CA certificate: {e}")))?;
        }

        let config = ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .map_err(|e| QueryError::InvalidEndpoint(format!("tls protocol version error: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self {
            client_config: Arc::new(config),
        })
    }

    /// Process-wide default, built on first use.
    pub fn shared() -> Result<Self, QueryError> {
        static SHARED: OnceLock<Result<TlsConfig, QueryError>> = OnceLock::new();
        SHARED.get_or_init(Self::with_webpki_roots).clone()
    }
}

impl From<Arc<ClientConfig>> for TlsConfig {
    fn from(client_config: Arc<ClientConfig>) -> Self {
        Self { client_config }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webpki_roots_config_builds() {
        let tls = TlsConfig::with_webpki_roots().unwrap();
        assert!(tls.client_config.alpn_protocols.is_empty());
    }

    #[test]
    fn shared_config_is_reused() {
        let a = TlsConfig::shared().unwrap();
        let b = TlsConfig::shared().unwrap();
        assert!(Arc::ptr_eq(&a.client_config, &b.client_config));
    }

    #[test]
    fn garbage_ca_is_rejected() {
        let err = TlsConfig::with_extra_roots(vec![CertificateDer::from(vec![1, 2, 3])])
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidEndpoint(_)));
    }
}
