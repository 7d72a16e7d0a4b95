//! TLS client context for mutual authentication
//!
//! The trust store holds exactly one anchor, the caller's root CA; platform
//! roots are never merged in. The client identity is the single
//! certificate plus RSA key given by the caller. Both live only in memory, so
//! no key-store password is involved.

use super::loader::{self, Certificate, PrivateKey};
use super::IdentityError;
use rustls::{ClientConfig, RootCertStore};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Protocol version the context is pinned to
pub const TLS_PROTOCOL: &str = "TLSv1.2";

/// Immutable TLS client configuration binding one trust anchor and one
/// client identity
#[derive(Clone)]
pub struct TlsConfiguration {
    config: Arc<ClientConfig>,
}

impl TlsConfiguration {
    /// Assemble the trust store and identity into a TLS 1.2 client context
    ///
    /// Chain consistency between `ca_cert` and `client_cert` is not checked
    /// here; a mismatch surfaces during the handshake.
    pub fn build(
        ca_cert: Certificate,
        client_cert: Certificate,
        client_key: PrivateKey,
    ) -> Result<Self, IdentityError> {
        let mut trust_store = RootCertStore::empty();
        trust_store
            .add(ca_cert.into_der())
            .map_err(|source| IdentityError::TlsContextInit {
                stage: "trust store",
                source,
            })?;

        let config = ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS12])
            .with_root_certificates(trust_store)
            .with_client_auth_cert(vec![client_cert.into_der()], client_key.into_der())
            .map_err(|source| IdentityError::TlsContextInit {
                stage: "identity store",
                source,
            })?;

        debug!(protocol = TLS_PROTOCOL, "Built mutual TLS client context");
        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Run the whole PEM → typed material → context pipeline
    pub fn from_pem(ca_cert_pem: &str, cert_pem: &str, key_pem: &str) -> Result<Self, IdentityError> {
        let ca_cert = loader::load_certificate(ca_cert_pem)?;
        let client_cert = loader::load_certificate(cert_pem)?;
        let client_key = loader::load_private_key_pem(key_pem)?;
        Self::build(ca_cert, client_cert, client_key)
    }

    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.config)
    }

    pub fn protocol(&self) -> &'static str {
        TLS_PROTOCOL
    }

    pub fn presents_client_certificate(&self) -> bool {
        self.config.client_auth_cert_resolver.has_certs()
    }
}

impl fmt::Debug for TlsConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfiguration")
            .field("protocol", &TLS_PROTOCOL)
            .field("client_auth", &self.presents_client_certificate())
            .finish()
    }
}
