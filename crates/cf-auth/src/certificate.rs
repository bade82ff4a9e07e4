//! X.509 certificate handling for instance identity bundles.
//!
//! The platform mounts each instance's identity certificate at the path named
//! by `CF_INSTANCE_CERT`. The file holds the identity (leaf) certificate and,
//! on most foundations, the intermediate that issued it. This module turns
//! that text into immutable [`Certificate`] values without consulting any
//! ambient trust state.

use crate::{Error, Result};
use x509_parser::certificate::X509Certificate;

/// An X.509 certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// DER-encoded certificate data.
    der: Vec<u8>,
    /// PEM representation.
    pem: String,
}

impl Certificate {
    /// Creates a certificate from DER-encoded bytes, checking that they parse.
    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        x509_parser::parse_x509_certificate(&der)
            .map_err(|e| Error::MalformedCertificate(format!("failed to parse certificate: {e}")))?;
        let pem = pem::encode(&pem::Pem::new("CERTIFICATE", der.clone()));
        Ok(Self { der, pem })
    }

    /// Creates a certificate from a single PEM block.
    pub fn from_pem(pem_str: &str) -> Result<Self> {
        let parsed = pem::parse(pem_str)
            .map_err(|e| Error::MalformedCertificate(format!("failed to parse PEM: {e}")))?;
        if parsed.tag() != "CERTIFICATE" {
            return Err(Error::MalformedCertificate(format!(
                "expected CERTIFICATE block, found {}",
                parsed.tag()
            )));
        }
        Self::from_der(parsed.into_contents())
    }

    /// Returns the DER-encoded certificate.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the PEM-encoded certificate.
    pub fn to_pem(&self) -> &str {
        &self.pem
    }

    /// Parses the DER into an `x509-parser` view borrowing from `self`.
    pub(crate) fn parsed(&self) -> Result<X509Certificate<'_>> {
        let (_, cert) = x509_parser::parse_x509_certificate(&self.der)
            .map_err(|e| Error::MalformedCertificate(format!("failed to parse certificate: {e}")))?;
        Ok(cert)
    }

    /// Returns the certificate's subject as a string.
    pub fn subject(&self) -> Result<String> {
        Ok(self.parsed()?.subject().to_string())
    }

    /// Returns the certificate's issuer as a string.
    pub fn issuer(&self) -> Result<String> {
        Ok(self.parsed()?.issuer().to_string())
    }

    /// Checks if this certificate is a CA certificate.
    pub fn is_ca(&self) -> Result<bool> {
        Ok(self.parsed()?.is_ca())
    }
}

/// A set of trusted CA certificates.
#[derive(Debug, Clone, Default)]
pub struct TrustBundle {
    roots: Vec<Certificate>,
}

impl TrustBundle {
    /// Creates a new trust bundle from root certificates.
    pub fn new(roots: Vec<Certificate>) -> Self {
        Self { roots }
    }

    /// Creates a trust bundle from a list of PEM documents, each of which may
    /// hold several certificates.
    pub fn from_pems<S: AsRef<str>>(pems: &[S]) -> Result<Self> {
        let mut roots = Vec::new();
        for pem_str in pems {
            roots.extend(parse_cert_chain_pem(pem_str.as_ref())?);
        }
        Ok(Self { roots })
    }

    /// Returns the root certificates.
    pub fn roots(&self) -> &[Certificate] {
        &self.roots
    }

    /// Returns true if no certificates are trusted.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// The certificates carried by an instance identity bundle.
#[derive(Debug, Clone)]
pub struct ExtractedCertificates {
    /// The intermediate that issued the identity certificate, if bundled.
    pub intermediate: Option<Certificate>,
    /// The instance's identity (leaf) certificate.
    pub identity: Certificate,
}

/// Splits an instance certificate bundle into its intermediate and identity
/// certificates.
///
/// A single certificate is taken as the identity certificate. With two, the
/// first is the intermediate and the second the identity certificate, which
/// is the order the platform writes them in.
pub fn extract_certificates(bundle: &str) -> Result<ExtractedCertificates> {
    let mut certs = parse_cert_chain_pem(bundle)?;
    match certs.len() {
        0 => Err(Error::MalformedCertificate(
            "no certificates found in bundle".to_string(),
        )),
        1 => Ok(ExtractedCertificates {
            intermediate: None,
            identity: certs.remove(0),
        }),
        2 => {
            let identity = certs.remove(1);
            let intermediate = certs.remove(0);
            Ok(ExtractedCertificates {
                intermediate: Some(intermediate),
                identity,
            })
        }
        n => Err(Error::MalformedCertificate(format!(
            "expected at most 2 certificates in bundle, found {n}"
        ))),
    }
}

/// Parses every CERTIFICATE block in a PEM document, in order.
fn parse_cert_chain_pem(pem_str: &str) -> Result<Vec<Certificate>> {
    let blocks = pem::parse_many(pem_str)
        .map_err(|e| Error::MalformedCertificate(format!("failed to parse PEM: {e}")))?;

    blocks
        .into_iter()
        .filter(|block| block.tag() == "CERTIFICATE")
        .map(|block| Certificate::from_der(block.into_contents()))
        .collect()
}
