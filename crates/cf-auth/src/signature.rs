//! The signed login request.
//!
//! The instance signs the concatenation of the signing time, the role it asks
//! for, and the exact certificate text it presents:
//!
//! ```text
//! message   = signing_time("%Y-%m-%dT%H:%M:%SZ") || role || cf_instance_cert
//! signature = base64url( sign(CF_INSTANCE_KEY, SHA-256(message)) )
//! ```
//!
//! RSA keys (what the platform issues) sign with RSASSA-PSS, salted with
//! either the digest length or the maximum length; P-256 keys sign with
//! ASN.1-encoded ECDSA. Verification uses the identity certificate's
//! public key only, so a valid signature proves the caller holds the key the
//! certificate was issued for.
//!
//! # Example
//!
//! ```
//! use cf_auth::ca::{DevCa, InstanceSpec};
//! use cf_auth::signature::{self, SignatureData};
//!
//! let ca = DevCa::new().unwrap();
//! let spec = InstanceSpec::new("i-1", "org", "space", "app", "10.0.0.1".parse().unwrap());
//! let issued = ca.issue(&spec).unwrap();
//!
//! let data = SignatureData::new(chrono::Utc::now(), "web", issued.bundle_pem());
//! let sig = signature::sign(issued.private_key_pem(), &data).unwrap();
//! let cert = signature::verify(&sig, &data).unwrap();
//! assert_eq!(cert.der(), issued.identity().der());
//! ```

use crate::certificate::{extract_certificates, Certificate};
use crate::{Error, Result};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, Utc};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, RsaKeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_ASN1,
    ECDSA_P256_SHA256_ASN1_SIGNING, RSA_PSS_SHA256,
};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pss, RsaPublicKey};
use sha2::{Digest, Sha256};
use x509_parser::public_key::PublicKey;

/// Smallest RSA modulus accepted for identity keys.
const MIN_RSA_MODULUS_BITS: usize = 2048;

/// Format of the signing time inside the signed message, and the first
/// format accepted on login.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// The default output of `date` in a shell, accepted second.
///
/// The zone field is checked separately and must be `UTC` or `GMT`.
pub const SHELL_TIME_FORMAT: &str = "%a %b %e %H:%M:%S %Z %Y";

/// The fields bound together by a login signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureData {
    /// When the client produced the signature.
    pub signing_time: DateTime<Utc>,
    /// The role the client is logging in as.
    pub role: String,
    /// The certificate bundle exactly as presented.
    pub cf_instance_cert: String,
}

impl SignatureData {
    pub fn new(
        signing_time: DateTime<Utc>,
        role: impl Into<String>,
        cf_instance_cert: impl Into<String>,
    ) -> Self {
        Self {
            signing_time,
            role: role.into(),
            cf_instance_cert: cf_instance_cert.into(),
        }
    }

    /// Returns the exact bytes that are signed.
    pub fn to_message(&self) -> Vec<u8> {
        let time = self.signing_time.format(TIME_FORMAT).to_string();
        let mut message =
            Vec::with_capacity(time.len() + self.role.len() + self.cf_instance_cert.len());
        message.extend_from_slice(time.as_bytes());
        message.extend_from_slice(self.role.as_bytes());
        message.extend_from_slice(self.cf_instance_cert.as_bytes());
        message
    }
}

/// Parses a signing time, trying ISO-8601 first and then the shell default.
pub fn parse_signing_time(raw: &str) -> Result<DateTime<Utc>> {
    let parsers: [fn(&str) -> Option<DateTime<Utc>>; 2] = [parse_iso8601, parse_shell_date];
    parsers
        .iter()
        .find_map(|parse| parse(raw))
        .ok_or_else(|| Error::InvalidSigningTime(raw.to_string()))
}

fn parse_iso8601(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TIME_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}

fn parse_shell_date(raw: &str) -> Option<DateTime<Utc>> {
    // "Mon Jan  2 15:04:05 UTC 2006"
    let fields: Vec<&str> = raw.split_whitespace().collect();
    let [weekday, month, day, clock, zone, year] = fields.as_slice() else {
        return None;
    };
    if !matches!(*zone, "UTC" | "GMT") {
        return None;
    }
    let normalized = format!("{weekday} {month} {day} {clock} {year}");
    NaiveDateTime::parse_from_str(&normalized, "%a %b %d %H:%M:%S %Y")
        .ok()
        .map(|t| t.and_utc())
}

/// Signs a login request with the instance's private key.
///
/// Accepts PKCS#1 (`RSA PRIVATE KEY`) and PKCS#8 (`PRIVATE KEY`) RSA keys and
/// PKCS#8 P-256 keys.
pub fn sign(private_key_pem: &str, data: &SignatureData) -> Result<String> {
    let parsed = pem::parse(private_key_pem)
        .map_err(|e| Error::MalformedCertificate(format!("failed to parse private key PEM: {e}")))?;
    let rng = SystemRandom::new();
    let message = data.to_message();

    let signature = match parsed.tag() {
        "RSA PRIVATE KEY" => {
            let key = RsaKeyPair::from_der(parsed.contents())
                .map_err(|e| key_error("invalid RSA private key", e))?;
            sign_rsa(&key, &rng, &message)?
        }
        "PRIVATE KEY" => {
            if let Ok(key) =
                EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, parsed.contents(), &rng)
            {
                key.sign(&rng, &message)
                    .map_err(|e| key_error("ECDSA signing failed", e))?
                    .as_ref()
                    .to_vec()
            } else {
                let key = RsaKeyPair::from_pkcs8(parsed.contents())
                    .map_err(|e| key_error("unsupported PKCS#8 private key", e))?;
                sign_rsa(&key, &rng, &message)?
            }
        }
        other => {
            return Err(Error::MalformedCertificate(format!(
                "unsupported private key block {other}"
            )))
        }
    };

    Ok(URL_SAFE.encode(signature))
}

fn sign_rsa(key: &RsaKeyPair, rng: &SystemRandom, message: &[u8]) -> Result<Vec<u8>> {
    let mut signature = vec![0u8; key.public().modulus_len()];
    key.sign(&RSA_PSS_SHA256, rng, message, &mut signature)
        .map_err(|e| key_error("RSA signing failed", e))?;
    Ok(signature)
}

fn key_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::MalformedCertificate(format!("{context}: {e}"))
}

/// Verifies a login signature against the identity certificate in the
/// signed bundle, returning that certificate.
///
/// Every failure is reported as [`Error::SignatureInvalid`].
pub fn verify(signature: &str, data: &SignatureData) -> Result<Certificate> {
    let extracted = extract_certificates(&data.cf_instance_cert).map_err(|e| {
        tracing::debug!(error = %e, "signature verification: bundle unreadable");
        Error::SignatureInvalid
    })?;

    verify_with(&extracted.identity, signature, data)?;
    Ok(extracted.identity)
}

/// Verifies a login signature against a specific certificate's public key.
pub fn verify_with(cert: &Certificate, signature: &str, data: &SignatureData) -> Result<()> {
    let rejected = |reason: &str| {
        tracing::debug!(reason, "signature verification failed");
        Error::SignatureInvalid
    };

    let sig_bytes = URL_SAFE
        .decode(signature.trim())
        .map_err(|_| rejected("signature is not base64url"))?;

    let parsed = cert.parsed().map_err(|_| rejected("certificate unreadable"))?;
    let spki = parsed.public_key();
    let key_bytes: &[u8] = spki.subject_public_key.data.as_ref();

    let message = data.to_message();
    let verified = match spki.parsed() {
        Ok(PublicKey::RSA(_)) => verify_rsa_pss(key_bytes, &message, &sig_bytes),
        Ok(PublicKey::EC(_)) => UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, key_bytes)
            .verify(&message, &sig_bytes)
            .is_ok(),
        _ => return Err(rejected("unsupported public key algorithm")),
    };

    if verified {
        Ok(())
    } else {
        Err(rejected("signature does not match identity certificate"))
    }
}

/// Verifies RSASSA-PSS with SHA-256 and MGF1-SHA-256.
///
/// The salt length is the signer's choice. Go's `rsa.SignPSS` with default
/// options uses the maximum; ring and OpenSSL default to the digest length.
/// Both are accepted.
fn verify_rsa_pss(pkcs1_der: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = RsaPublicKey::from_pkcs1_der(pkcs1_der) else {
        return false;
    };
    let modulus_bits = key.n().bits();
    if modulus_bits < MIN_RSA_MODULUS_BITS {
        return false;
    }

    let hashed = Sha256::digest(message);
    let digest_len = <Sha256 as Digest>::output_size();
    let em_len = (modulus_bits - 1).div_ceil(8);
    let max_salt_len = em_len.saturating_sub(digest_len + 2);

    [digest_len, max_salt_len].into_iter().any(|salt_len| {
        key.verify(Pss::new_with_salt::<Sha256>(salt_len), &hashed, signature)
            .is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::{DevCa, InstanceSpec};
    use chrono::TimeZone;

    fn issued() -> crate::ca::IssuedInstance {
        let ca = DevCa::new().unwrap();
        let spec = InstanceSpec::new("i-1", "org", "space", "app", "10.0.0.1".parse().unwrap());
        ca.issue(&spec).unwrap()
    }

    #[test]
    fn test_message_layout() {
        let t = Utc.with_ymd_and_hms(2019, 5, 20, 21, 1, 11).unwrap();
        let data = SignatureData::new(t, "my-role", "CERT");
        assert_eq!(data.to_message(), b"2019-05-20T21:01:11Zmy-roleCERT".to_vec());
    }

    #[test]
    fn test_parse_iso8601() {
        let t = parse_signing_time("2019-05-20T21:01:11Z").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2019, 5, 20, 21, 1, 11).unwrap());
    }

    #[test]
    fn test_parse_shell_date() {
        let t = parse_signing_time("Mon May 20 21:01:11 UTC 2019").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2019, 5, 20, 21, 1, 11).unwrap());

        let t = parse_signing_time("Sun Jun  2 03:04:05 GMT 2019").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2019, 6, 2, 3, 4, 5).unwrap());
    }

    #[test]
    fn test_parse_rejects_other_zones_and_garbage() {
        assert!(parse_signing_time("Mon May 20 21:01:11 PDT 2019").is_err());
        assert!(parse_signing_time("2019-05-20 21:01:11").is_err());
        assert!(parse_signing_time("2019-05-20T21:01:11+02:00").is_err());
        assert!(matches!(
            parse_signing_time(""),
            Err(Error::InvalidSigningTime(_))
        ));
    }

    #[test]
    fn test_sign_and_verify() {
        let issued = issued();
        let data = SignatureData::new(Utc::now(), "role", issued.bundle_pem());
        let sig = sign(issued.private_key_pem(), &data).unwrap();

        let cert = verify(&sig, &data).unwrap();
        assert_eq!(cert.der(), issued.identity().der());
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let signer = issued();
        let other = issued();
        let data = SignatureData::new(Utc::now(), "role", other.bundle_pem());
        let sig = sign(signer.private_key_pem(), &data).unwrap();

        assert!(matches!(verify(&sig, &data), Err(Error::SignatureInvalid)));
    }

    #[test]
    fn test_verify_rejects_tampered_role() {
        let issued = issued();
        let data = SignatureData::new(Utc::now(), "role", issued.bundle_pem());
        let sig = sign(issued.private_key_pem(), &data).unwrap();

        let tampered = SignatureData {
            role: "admin".into(),
            ..data
        };
        assert!(matches!(verify(&sig, &tampered), Err(Error::SignatureInvalid)));
    }

    #[test]
    fn test_verify_rejects_malformed_signature() {
        let issued = issued();
        let data = SignatureData::new(Utc::now(), "role", issued.bundle_pem());

        assert!(matches!(verify("!!not base64!!", &data), Err(Error::SignatureInvalid)));
        assert!(matches!(verify("", &data), Err(Error::SignatureInvalid)));
    }

    #[test]
    fn test_verify_unreadable_bundle_is_signature_invalid() {
        let data = SignatureData::new(Utc::now(), "role", "garbage");
        assert!(matches!(verify("AAAA", &data), Err(Error::SignatureInvalid)));
    }

    #[test]
    fn test_sign_rejects_non_key_pem() {
        let issued = issued();
        let data = SignatureData::new(Utc::now(), "role", issued.bundle_pem());
        assert!(sign(issued.identity_pem(), &data).is_err());
    }

    const RSA_BUNDLE: &str = include_str!("../tests/fixtures/rsa/instance.pem");
    const RSA_KEY_PKCS1: &str = include_str!("../tests/fixtures/rsa/instance-key-pkcs1.pem");
    const RSA_KEY_PKCS8: &str = include_str!("../tests/fixtures/rsa/instance-key-pkcs8.pem");
    /// PSS with the maximum salt length, as Go's `rsa.SignPSS(.., nil)` signs.
    const RSA_MAX_SALT_SIG: &str = include_str!("../tests/fixtures/rsa/web-max-salt.sig");

    fn rsa_signed_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_rsa_max_salt_signature_verifies() {
        let data = SignatureData::new(rsa_signed_at(), "web", RSA_BUNDLE);
        let cert = verify(RSA_MAX_SALT_SIG, &data).unwrap();

        let leaf = extract_certificates(RSA_BUNDLE).unwrap().identity;
        assert_eq!(cert.der(), leaf.der());
    }

    #[test]
    fn test_rsa_max_salt_signature_bound_to_message() {
        let later = SignatureData::new(
            rsa_signed_at() + chrono::Duration::seconds(1),
            "web",
            RSA_BUNDLE,
        );
        assert!(matches!(
            verify(RSA_MAX_SALT_SIG, &later),
            Err(Error::SignatureInvalid)
        ));

        let other_role = SignatureData::new(rsa_signed_at(), "admin", RSA_BUNDLE);
        assert!(matches!(
            verify(RSA_MAX_SALT_SIG, &other_role),
            Err(Error::SignatureInvalid)
        ));
    }

    #[test]
    fn test_sign_with_rsa_keys() {
        let data = SignatureData::new(Utc::now(), "web", RSA_BUNDLE);

        for key in [RSA_KEY_PKCS1, RSA_KEY_PKCS8] {
            let sig = sign(key, &data).unwrap();
            assert!(verify(&sig, &data).is_ok());
        }
    }

    #[test]
    fn test_rsa_signature_rejected_for_ecdsa_leaf() {
        let issued = issued();
        let data = SignatureData::new(Utc::now(), "web", issued.bundle_pem());
        let sig = sign(RSA_KEY_PKCS1, &data).unwrap();
        assert!(matches!(verify(&sig, &data), Err(Error::SignatureInvalid)));
    }
}
