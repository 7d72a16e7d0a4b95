//! Typed certificate and RSA private key loading
//!
//! Certificates are read from full PEM text (markers included) and checked
//! as X.509 structures. Private keys arrive as decoded bytes and must be a
//! PKCS#8 document wrapping an RSA key.

use super::pem::{self, PemKind};
use super::IdentityError;
use rustls::crypto::ring::sign::any_supported_type;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::sign::SigningKey;
use rustls::SignatureAlgorithm;
use std::fmt;

/// A parsed X.509 certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: CertificateDer<'static>,
}

impl Certificate {
    /// Raw DER encoding
    pub fn der(&self) -> &[u8] {
        self.der.as_ref()
    }

    pub fn into_der(self) -> CertificateDer<'static> {
        self.der
    }
}

/// An RSA private key decoded from PKCS#8
///
/// Not `Clone` or `Serialize`: the key moves into the TLS configuration built
/// from it and its bytes never leave the process.
pub struct PrivateKey {
    der: PrivatePkcs8KeyDer<'static>,
}

impl PrivateKey {
    pub(crate) fn into_der(self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(self.der)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("algorithm", &"RSA")
            .field("der", &"<redacted>")
            .finish()
    }
}

/// Parse the first certificate found in `pem_text`
///
/// Any text after the first certificate block is ignored.
pub fn load_certificate(pem_text: &str) -> Result<Certificate, IdentityError> {
    let mut reader = pem_text.as_bytes();
    let der = match rustls_pemfile::certs(&mut reader).next() {
        Some(Ok(der)) => der,
        Some(Err(e)) => {
            return Err(IdentityError::InvalidCertificate(format!(
                "unreadable PEM: {e}"
            )))
        }
        None => {
            return Err(IdentityError::InvalidCertificate(
                "no CERTIFICATE block found".to_string(),
            ))
        }
    };

    webpki::EndEntityCert::try_from(&der)
        .map_err(|e| IdentityError::InvalidCertificate(format!("{e:?}")))?;

    Ok(Certificate { der })
}

/// Interpret decoded PEM bytes as a PKCS#8 RSA private key
pub fn load_private_key(pkcs8_bytes: &[u8]) -> Result<PrivateKey, IdentityError> {
    if pkcs8_bytes.is_empty() {
        return Err(IdentityError::InvalidKeyEncoding(
            "key material is empty".to_string(),
        ));
    }

    let signing_key = any_supported_type(&PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        pkcs8_bytes,
    )))
    .map_err(|e| IdentityError::InvalidKeyEncoding(e.to_string()))?;

    match signing_key.algorithm() {
        SignatureAlgorithm::RSA => Ok(PrivateKey {
            der: PrivatePkcs8KeyDer::from(pkcs8_bytes.to_vec()),
        }),
        other => Err(IdentityError::UnsupportedAlgorithm(format!("{other:?}"))),
    }
}

/// Decode a private key PEM (either `RSA PRIVATE KEY` or `PRIVATE KEY`
/// markers) and load it
pub fn load_private_key_pem(pem_text: &str) -> Result<PrivateKey, IdentityError> {
    let kind = PemKind::detect_private_key(pem_text).unwrap_or(PemKind::RsaPrivateKey);
    let bytes = pem::decode_der(pem_text, kind)?;
    load_private_key(&bytes)
}
