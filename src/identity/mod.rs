//! Certificate and key material pipeline
//!
//! PEM text flows through three stages:
//!
//! - [`pem`] - marker stripping and MIME-style base64 decoding
//! - [`loader`] - typed X.509 certificates and PKCS#8 RSA keys
//! - [`context`] - the rustls client configuration for mutual TLS
//!
//! ```rust,no_run
//! use mqtt_mtls::identity::TlsConfiguration;
//!
//! # fn demo(ca: &str, cert: &str, key: &str) -> Result<(), mqtt_mtls::identity::IdentityError> {
//! let tls = TlsConfiguration::from_pem(ca, cert, key)?;
//! assert_eq!(tls.protocol(), "TLSv1.2");
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod loader;
pub mod pem;

pub use context::{TlsConfiguration, TLS_PROTOCOL};
pub use loader::{load_certificate, load_private_key, load_private_key_pem, Certificate, PrivateKey};
pub use pem::{PemBlock, PemError, PemKind};

use thiserror::Error;

/// Failures while turning PEM text into a TLS client context
///
/// All of these are configuration errors: retrying with the same input
/// cannot succeed.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("malformed PEM: {0}")]
    MalformedPem(#[from] PemError),
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),
    #[error("invalid PKCS#8 key encoding: {0}")]
    InvalidKeyEncoding(String),
    #[error("unsupported private key algorithm {0}, only RSA is accepted")]
    UnsupportedAlgorithm(String),
    #[error("failed to initialize TLS context ({stage})")]
    TlsContextInit {
        stage: &'static str,
        #[source]
        source: rustls::Error,
    },
}
