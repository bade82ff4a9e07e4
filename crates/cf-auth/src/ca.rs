//! Development CA issuing platform-style instance identity certificates.
//!
//! [`DevCa`] holds a self-signed root and an intermediate, and issues leaf
//! certificates laid out the way the platform's instance identity CA lays
//! them out:
//!
//! - subject `OU=organization:<org>, OU=space:<space>, OU=app:<app>, CN=<instance>`
//! - a single IP-address subject alternative name
//! - client and server auth extended key usage
//!
//! **Warning:** This is intended for development and testing only. Keys are
//! P-256 ECDSA; the platform itself issues RSA keys, which verification also
//! accepts.
//!
//! # Example
//!
//! ```
//! use cf_auth::ca::{DevCa, InstanceSpec};
//!
//! let ca = DevCa::new().unwrap();
//! let spec = InstanceSpec::new("instance-1", "org-1", "space-1", "app-1", "10.0.0.7".parse().unwrap());
//! let issued = ca.issue(&spec).unwrap();
//! assert!(issued.bundle_pem().contains("BEGIN CERTIFICATE"));
//! ```

use crate::certificate::{Certificate, TrustBundle};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use der::asn1::{Any, BitString, SetOfVec};
use der::oid::ObjectIdentifier;
use der::{Decode, Encode, Tag};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};
use std::net::IpAddr;
use time::{Duration as TimeDuration, OffsetDateTime};
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::name::{Name, RdnSequence, RelativeDistinguishedName};

const OID_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const OID_ORGANIZATIONAL_UNIT: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.11");

/// The identity fields and validity of a certificate to issue.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub instance_id: String,
    pub org_id: String,
    pub space_id: String,
    pub app_id: String,
    pub ip_address: IpAddr,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl InstanceSpec {
    /// Describes an instance certificate valid from an hour ago until a day from now.
    pub fn new(
        instance_id: impl Into<String>,
        org_id: impl Into<String>,
        space_id: impl Into<String>,
        app_id: impl Into<String>,
        ip_address: IpAddr,
    ) -> Self {
        let now = Utc::now();
        Self {
            instance_id: instance_id.into(),
            org_id: org_id.into(),
            space_id: space_id.into(),
            app_id: app_id.into(),
            ip_address,
            not_before: now - chrono::Duration::hours(1),
            not_after: now + chrono::Duration::hours(24),
        }
    }

    /// Overrides the validity period.
    pub fn with_validity(mut self, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }
}

/// A certificate issued by [`DevCa`], with its private key.
#[derive(Debug, Clone)]
pub struct IssuedInstance {
    identity: Certificate,
    intermediate: Certificate,
    private_key_pem: String,
}

impl IssuedInstance {
    /// Returns the identity (leaf) certificate.
    pub fn identity(&self) -> &Certificate {
        &self.identity
    }

    /// Returns the identity certificate alone as PEM.
    pub fn identity_pem(&self) -> &str {
        self.identity.to_pem()
    }

    /// Returns the bundle an instance would find at `CF_INSTANCE_CERT`:
    /// the intermediate followed by the identity certificate.
    pub fn bundle_pem(&self) -> String {
        format!("{}{}", self.intermediate.to_pem(), self.identity.to_pem())
    }

    /// Returns the PKCS#8 private key as PEM (the `CF_INSTANCE_KEY` contents).
    pub fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }
}

/// A self-signed root plus intermediate for issuing instance certificates.
pub struct DevCa {
    root_key: KeyPair,
    root_certificate: Certificate,
    intermediate_key: KeyPair,
    intermediate_params: CertificateParams,
    intermediate_certificate: Certificate,
    trust_bundle: TrustBundle,
}

impl DevCa {
    /// Generates a new root and intermediate, both valid for ten years.
    pub fn new() -> Result<Self> {
        let now = OffsetDateTime::now_utc();

        let root_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| ca_error("root key generation failed", e))?;
        let mut root_params =
            CertificateParams::new(vec![]).map_err(|e| ca_error("failed to create params", e))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "Development Instance Root CA");
        root_params.distinguished_name = dn;
        root_params.not_before = now - TimeDuration::days(1);
        root_params.not_after = now + TimeDuration::days(3650);
        root_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        root_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

        let root_cert = root_params
            .clone()
            .self_signed(&root_key)
            .map_err(|e| ca_error("root cert generation failed", e))?;
        let root_certificate = Certificate::from_der(root_cert.der().to_vec())?;

        let intermediate_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| ca_error("intermediate key generation failed", e))?;
        let mut intermediate_params =
            CertificateParams::new(vec![]).map_err(|e| ca_error("failed to create params", e))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "Development Instance Identity CA");
        intermediate_params.distinguished_name = dn;
        intermediate_params.not_before = now - TimeDuration::days(1);
        intermediate_params.not_after = now + TimeDuration::days(3650);
        intermediate_params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        intermediate_params.key_usages =
            vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

        let root_issuer = Issuer::from_params(&root_params, &root_key);
        let intermediate_cert = intermediate_params
            .signed_by(&intermediate_key, &root_issuer)
            .map_err(|e| ca_error("intermediate cert generation failed", e))?;
        let intermediate_certificate = Certificate::from_der(intermediate_cert.der().to_vec())?;

        let trust_bundle = TrustBundle::new(vec![root_certificate.clone()]);

        Ok(Self {
            root_key,
            root_certificate,
            intermediate_key,
            intermediate_params,
            intermediate_certificate,
            trust_bundle,
        })
    }

    /// Returns the PEM-encoded root certificate.
    pub fn root_pem(&self) -> String {
        self.root_certificate.to_pem().to_string()
    }

    /// Returns the PEM-encoded root private key.
    pub fn root_key_pem(&self) -> String {
        self.root_key.serialize_pem()
    }

    /// Returns the trust bundle holding the root.
    pub fn trust_bundle(&self) -> &TrustBundle {
        &self.trust_bundle
    }

    /// Issues an instance identity certificate under the intermediate.
    pub fn issue(&self, spec: &InstanceSpec) -> Result<IssuedInstance> {
        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| ca_error("instance key generation failed", e))?;

        let mut params =
            CertificateParams::new(vec![]).map_err(|e| ca_error("failed to create params", e))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, spec.instance_id.clone());
        params.distinguished_name = dn;
        params.not_before = to_offset(spec.not_before)?;
        params.not_after = to_offset(spec.not_after)?;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];
        params.subject_alt_names = vec![SanType::IpAddress(spec.ip_address)];

        let issuer = Issuer::from_params(&self.intermediate_params, &self.intermediate_key);
        let signed = params
            .signed_by(&key, &issuer)
            .map_err(|e| ca_error("certificate signing failed", e))?;

        // rcgen keys distinguished names by attribute type, so the three OU
        // attributes are written by replacing the subject and re-signing.
        let subject = instance_subject(spec).map_err(|e| ca_error("failed to encode subject", e))?;
        let der = resign_with_subject(
            signed.der(),
            subject,
            &self.intermediate_key.serialize_der(),
        )?;

        Ok(IssuedInstance {
            identity: Certificate::from_der(der)?,
            intermediate: self.intermediate_certificate.clone(),
            private_key_pem: key.serialize_pem(),
        })
    }
}

fn ca_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::MalformedCertificate(format!("{context}: {e}"))
}

fn to_offset(at: DateTime<Utc>) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|e| ca_error("validity out of range", e))
}

/// Builds the platform's instance subject name, most general RDN first.
fn instance_subject(spec: &InstanceSpec) -> der::Result<Name> {
    let attributes = [
        (OID_ORGANIZATIONAL_UNIT, format!("organization:{}", spec.org_id)),
        (OID_ORGANIZATIONAL_UNIT, format!("space:{}", spec.space_id)),
        (OID_ORGANIZATIONAL_UNIT, format!("app:{}", spec.app_id)),
        (OID_COMMON_NAME, spec.instance_id.clone()),
    ];

    let rdns = attributes
        .into_iter()
        .map(|(oid, value)| -> der::Result<RelativeDistinguishedName> {
            let atv = AttributeTypeAndValue {
                oid,
                value: Any::new(Tag::Utf8String, value.as_bytes())?,
            };
            Ok(RelativeDistinguishedName(SetOfVec::try_from(vec![atv])?))
        })
        .collect::<der::Result<Vec<_>>>()?;
    Ok(RdnSequence(rdns))
}

/// Replaces the subject of a certificate and re-signs it with the issuer's
/// P-256 key.
fn resign_with_subject(cert_der: &[u8], subject: Name, issuer_pkcs8: &[u8]) -> Result<Vec<u8>> {
    let mut cert = x509_cert::Certificate::from_der(cert_der)
        .map_err(|e| ca_error("failed to decode issued certificate", e))?;
    cert.tbs_certificate.subject = subject;
    let tbs = cert
        .tbs_certificate
        .to_der()
        .map_err(|e| ca_error("failed to encode TBS certificate", e))?;

    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, issuer_pkcs8, &rng)
        .map_err(|e| ca_error("failed to load issuer key", e))?;
    let sig = key_pair
        .sign(&rng, &tbs)
        .map_err(|e| ca_error("re-signing failed", e))?;

    cert.signature =
        BitString::from_bytes(sig.as_ref()).map_err(|e| ca_error("failed to encode signature", e))?;
    cert.to_der()
        .map_err(|e| ca_error("failed to encode certificate", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_keeps_repeated_ous_in_order() {
        let spec = InstanceSpec::new("inst", "org", "space", "app", "10.1.2.3".parse().unwrap());
        let name = instance_subject(&spec).unwrap();

        let attributes: Vec<(ObjectIdentifier, &[u8])> = name
            .0
            .iter()
            .flat_map(|rdn| rdn.0.iter())
            .map(|atv| (atv.oid, atv.value.value()))
            .collect();
        assert_eq!(
            attributes,
            vec![
                (OID_ORGANIZATIONAL_UNIT, b"organization:org".as_slice()),
                (OID_ORGANIZATIONAL_UNIT, b"space:space".as_slice()),
                (OID_ORGANIZATIONAL_UNIT, b"app:app".as_slice()),
                (OID_COMMON_NAME, b"inst".as_slice()),
            ]
        );
    }

    #[test]
    fn test_long_ids_survive_reencoding() {
        let ca = DevCa::new().unwrap();
        let long = "x".repeat(300);
        let spec = InstanceSpec::new(
            long.as_str(),
            "org",
            "space",
            long.as_str(),
            "10.1.2.3".parse().unwrap(),
        );
        let issued = ca.issue(&spec).unwrap();

        let identity = crate::Identity::from_certificate(issued.identity()).unwrap();
        assert_eq!(identity.instance_id, long);
        assert_eq!(identity.app_id, long);
        crate::ChainValidator::new(ca.trust_bundle())
            .unwrap()
            .validate(Some(&issued.intermediate), issued.identity(), Utc::now())
            .unwrap();
    }

    #[test]
    fn test_issued_subject_layout() {
        let ca = DevCa::new().unwrap();
        let spec = InstanceSpec::new("inst", "org", "space", "app", "10.1.2.3".parse().unwrap());
        let issued = ca.issue(&spec).unwrap();

        let subject = issued.identity().subject().unwrap();
        assert!(subject.contains("OU=organization:org"), "{subject}");
        assert!(subject.contains("OU=space:space"), "{subject}");
        assert!(subject.contains("OU=app:app"), "{subject}");
        assert!(subject.contains("CN=inst"), "{subject}");

        let issuer = issued.identity().issuer().unwrap();
        assert!(issuer.contains("Development Instance Identity CA"));
    }

    #[test]
    fn test_private_key_is_pkcs8() {
        let ca = DevCa::new().unwrap();
        let spec = InstanceSpec::new("inst", "org", "space", "app", "10.1.2.3".parse().unwrap());
        let issued = ca.issue(&spec).unwrap();
        assert!(issued.private_key_pem().contains("BEGIN PRIVATE KEY"));
        assert!(ca.root_key_pem().contains("BEGIN PRIVATE KEY"));
    }
}
