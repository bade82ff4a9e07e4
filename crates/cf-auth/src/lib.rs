//! Instance-identity authentication for platform workloads.
//!
//! A workload proves who it is by presenting the identity certificate the
//! platform issued to its container, together with a signature over the
//! signing time, the requested role and the certificate text, produced with
//! the certificate's private key. No shared secret ever leaves the workload.
//!
//! # Components
//!
//! - [`certificate`] - PEM bundle extraction and trusted CA sets
//! - [`signature`] - Canonical signed message, signing and verification
//! - [`chain`] - Trust-chain validation against the configured CAs
//! - [`identity`] - Instance identity decoded from certificates or session metadata
//! - [`window`] - Anti-replay signing-time window
//! - [`constraints`] - Role allow-lists, bound CIDRs and IP matching
//! - [`inventory`] - Platform inventory contract and cross-check
//! - [`login`] - The login state machine producing an [`AuthDecision`]
//! - [`renew`] - Session renewal against the current role definition
//! - [`storage`], [`config`], [`role`] - Persisted configuration and roles
//! - [`ca`] - Development CA issuing instance certificates

pub mod ca;
pub mod certificate;
pub mod chain;
pub mod config;
pub mod constraints;
pub mod identity;
pub mod inventory;
pub mod login;
pub mod renew;
pub mod role;
pub mod signature;
pub mod storage;
pub mod window;

pub use ca::DevCa;
pub use certificate::{extract_certificates, Certificate, ExtractedCertificates, TrustBundle};
pub use chain::ChainValidator;
pub use config::Configuration;
pub use identity::{Identity, IdentityField, SessionMetadata};
pub use inventory::{AppRecord, InventoryClient, OrgRecord, SpaceRecord, StaticInventory};
pub use login::{
    AuthDecision, Authenticator, ConnectionInfo, LoginRejection, LoginRequest, LoginStage,
    TokenParams,
};
pub use renew::RenewStage;
pub use role::Role;
pub use signature::SignatureData;
pub use storage::{MemoryStorage, Storage};
pub use window::ReplayWindow;

use chrono::{DateTime, Utc};
use std::time::Duration;

/// How an [`Error`] may be reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Missing or malformed input; reported verbatim.
    Input,
    /// Cryptographic rejection; reported generically, detail logged only.
    Security,
    /// Role, network or time-window policy rejection; reported with specifics.
    Policy,
    /// Storage or inventory failure; reported as an opaque failure.
    Dependency,
}

/// Errors that can occur while authenticating an instance.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required request field was empty or absent.
    #[error("'{0}' is required")]
    MissingField(&'static str),

    /// The signing time matched none of the accepted formats.
    #[error("couldn't parse signing time {0:?}")]
    InvalidSigningTime(String),

    /// The presented certificate bundle could not be parsed.
    #[error("malformed certificate: {0}")]
    MalformedCertificate(String),

    /// The signature does not match the presented request.
    #[error("signature invalid")]
    SignatureInvalid,

    /// The identity certificate does not chain to a trusted CA.
    #[error("certificate not trusted: {0}")]
    UntrustedCertificate(String),

    /// The identity certificate is outside its validity period.
    #[error("certificate expired or not yet valid")]
    CertificateExpired,

    /// A platform identity field is absent or malformed in the certificate.
    #[error("identity field missing or malformed: {0}")]
    IdentityFieldMissing(String),

    /// The signing time is older than the configured window allows.
    #[error(
        "request is too old; signed at {signed_at} but received request at {received_at}; \
         allowable seconds old is {max_age_secs}"
    )]
    RequestTooOld {
        signed_at: DateTime<Utc>,
        received_at: DateTime<Utc>,
        max_age_secs: u64,
    },

    /// The signing time is further in the future than the configured window allows.
    #[error(
        "request is too far in the future; signed at {signed_at} but received request at \
         {received_at}; allowable seconds in the future is {max_ahead_secs}"
    )]
    RequestTooFarInFuture {
        signed_at: DateTime<Utc>,
        received_at: DateTime<Utc>,
        max_ahead_secs: u64,
    },

    /// The caller's address is outside every bound CIDR.
    #[error("remote address {0} is not within the role's bound CIDRs")]
    CidrMismatch(String),

    /// The caller's address differs from the certificate's IP address.
    #[error("no matching IP address")]
    IpMismatch,

    /// An identity field is not in the role's allow-list.
    #[error("{field} {value} doesn't match role constraints of {allowed:?}")]
    ConstraintViolation {
        field: IdentityField,
        value: String,
        allowed: Vec<String>,
    },

    /// No role exists with the requested name.
    #[error("no matching role {0:?}")]
    UnknownRole(String),

    /// A role or configuration failed validation on write.
    #[error("invalid {0}")]
    InvalidSetting(String),

    /// No CA configuration has been written.
    #[error("no CA is configured for verifying client certificates")]
    NotConfigured,

    /// The inventory record disagrees with the certificate.
    #[error("inventory mismatch: {0}")]
    InventoryMismatch(String),

    /// The app exists but runs no instances.
    #[error("app doesn't have any live instances")]
    NoLiveInstances,

    /// The inventory lookup failed.
    #[error("inventory lookup failed: {0}")]
    Inventory(String),

    /// The inventory lookup did not complete in time.
    #[error("inventory lookup timed out after {0:?}")]
    InventoryTimeout(Duration),

    /// The storage backend failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Stored renewal metadata is missing or malformed.
    #[error("unable to retrieve session metadata during renewal: {0}")]
    RenewalMetadata(String),

    /// Serialization of persisted state failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Returns how this error should be reported.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::MissingField(_)
            | Error::InvalidSigningTime(_)
            | Error::MalformedCertificate(_)
            | Error::IdentityFieldMissing(_)
            | Error::UnknownRole(_)
            | Error::InvalidSetting(_)
            | Error::RenewalMetadata(_) => ErrorClass::Input,
            Error::SignatureInvalid | Error::UntrustedCertificate(_) | Error::CertificateExpired => {
                ErrorClass::Security
            }
            Error::RequestTooOld { .. }
            | Error::RequestTooFarInFuture { .. }
            | Error::CidrMismatch(_)
            | Error::IpMismatch
            | Error::ConstraintViolation { .. }
            | Error::InventoryMismatch(_)
            | Error::NoLiveInstances => ErrorClass::Policy,
            Error::NotConfigured
            | Error::Inventory(_)
            | Error::InventoryTimeout(_)
            | Error::Storage(_)
            | Error::Serialization(_) => ErrorClass::Dependency,
        }
    }

    /// Returns the message that may be shown to the authenticating caller.
    ///
    /// Security rejections collapse to a fixed string so a caller cannot learn
    /// which cryptographic check failed.
    pub fn client_message(&self) -> String {
        match self.class() {
            ErrorClass::Input | ErrorClass::Policy => self.to_string(),
            ErrorClass::Security => "signature invalid".to_string(),
            ErrorClass::Dependency => "authentication backend unavailable".to_string(),
        }
    }
}

/// Result type for cf-auth operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_errors_are_generic() {
        let errors = [
            Error::SignatureInvalid,
            Error::UntrustedCertificate("unknown issuer".into()),
            Error::CertificateExpired,
        ];
        for e in errors {
            assert_eq!(e.class(), ErrorClass::Security);
            assert_eq!(e.client_message(), "signature invalid");
        }
    }

    #[test]
    fn test_policy_errors_keep_detail() {
        let e = Error::ConstraintViolation {
            field: IdentityField::AppId,
            value: "app-2".into(),
            allowed: vec!["app-1".into()],
        };
        assert_eq!(e.class(), ErrorClass::Policy);
        let msg = e.client_message();
        assert!(msg.contains("app-2"));
        assert!(msg.contains("app-1"));
    }

    #[test]
    fn test_dependency_errors_are_opaque() {
        let e = Error::Inventory("connection refused to 10.0.0.5".into());
        assert_eq!(e.class(), ErrorClass::Dependency);
        assert!(!e.client_message().contains("10.0.0.5"));
    }
}
