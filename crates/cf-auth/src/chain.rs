//! Trust-chain validation for identity certificates.
//!
//! Performs X.509 path validation with `rustls-webpki`:
//! 1. The identity certificate chains to a configured CA, through the bundled
//!    intermediate when there is one
//! 2. Every certificate on the path is within its validity period at the
//!    time the request was received
//! 3. Basic constraints and client-auth extended key usage hold
//!
//! Failure detail is logged here and never returned to the caller.

use crate::certificate::{Certificate, TrustBundle};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use pki_types::{CertificateDer, TrustAnchor, UnixTime};
use webpki::{anchor_from_trusted_cert, EndEntityCert, KeyUsage};

/// Validates identity certificates against a fixed set of trusted CAs.
pub struct ChainValidator {
    /// Trust anchors for webpki verification (owned for 'static lifetime).
    trust_anchors: Vec<TrustAnchor<'static>>,
}

impl ChainValidator {
    /// Builds trust anchors from a trust bundle.
    pub fn new(trust_bundle: &TrustBundle) -> Result<Self> {
        if trust_bundle.is_empty() {
            return Err(Error::NotConfigured);
        }

        let mut trust_anchors = Vec::with_capacity(trust_bundle.roots().len());
        for cert in trust_bundle.roots() {
            let der = CertificateDer::from(cert.der());
            let anchor = anchor_from_trusted_cert(&der).map_err(|e| {
                tracing::error!("configured CA certificate is not a usable trust anchor: {e:?}");
                Error::NotConfigured
            })?;
            trust_anchors.push(anchor.to_owned());
        }
        Ok(Self { trust_anchors })
    }

    /// Verifies that `signing_cert` chains to a trusted CA at time `at`.
    pub fn validate(
        &self,
        intermediate: Option<&Certificate>,
        signing_cert: &Certificate,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let end_entity = CertificateDer::from(signing_cert.der());
        let ee_cert = EndEntityCert::try_from(&end_entity).map_err(|e| {
            tracing::warn!("failed to parse end-entity certificate: {e:?}");
            Error::UntrustedCertificate("unparsable identity certificate".to_string())
        })?;

        let intermediates: Vec<CertificateDer<'_>> = intermediate
            .map(|c| CertificateDer::from(c.der()))
            .into_iter()
            .collect();

        let seconds = u64::try_from(at.timestamp()).unwrap_or(0);
        let time = UnixTime::since_unix_epoch(std::time::Duration::from_secs(seconds));

        ee_cert
            .verify_for_usage(
                webpki::ALL_VERIFICATION_ALGS,
                &self.trust_anchors,
                &intermediates,
                time,
                KeyUsage::client_auth(),
                None, // No revocation checking
                None, // No path verification callback
            )
            .map_err(|e| {
                tracing::warn!("certificate chain verification failed: {e:?}");
                match e {
                    webpki::Error::CertExpired { .. } | webpki::Error::CertNotValidYet { .. } => {
                        Error::CertificateExpired
                    }
                    other => Error::UntrustedCertificate(format!("{other:?}")),
                }
            })?;

        Ok(())
    }
}

impl std::fmt::Debug for ChainValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainValidator")
            .field("trust_anchors_count", &self.trust_anchors.len())
            .finish()
    }
}
