//! The login state machine.
//!
//! ```text
//! ReceivedTime → RoleResolved → CidrChecked → SignatureExtracted → ConfigResolved
//!   → TimeWindowChecked → CertsExtracted → SignatureVerified → ChainValidated
//!   → IdentityDecoded → ConstraintsChecked → InventoryCrossChecked → Issued
//! ```
//!
//! Any failure ends the attempt with a [`LoginRejection`] naming the last
//! stage passed and the error that stopped it. The receipt time is taken
//! before anything is parsed; role lookup and the bound-CIDR check run before
//! any cryptography; nothing read from the certificate feeds a policy
//! decision until both its signature and its chain have been verified.
//!
//! # Example
//!
//! ```
//! use cf_auth::ca::{DevCa, InstanceSpec};
//! use cf_auth::signature::{self, SignatureData};
//! use cf_auth::{config, role, Authenticator, Configuration, ConnectionInfo, Identity};
//! use cf_auth::{LoginRequest, MemoryStorage, Role, StaticInventory};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let ca = DevCa::new().unwrap();
//! let spec = InstanceSpec::new("i-1", "org", "space", "app", "10.0.0.1".parse().unwrap());
//! let issued = ca.issue(&spec).unwrap();
//!
//! let storage = Arc::new(MemoryStorage::new());
//! config::write(&*storage, &Configuration::new(vec![ca.root_pem()])).await.unwrap();
//! role::write(&*storage, &Role::new("web")).await.unwrap();
//! let inventory = Arc::new(StaticInventory::new());
//! inventory.register(&Identity::from_certificate(issued.identity()).unwrap(), 1).await;
//!
//! let now = chrono::Utc::now();
//! let data = SignatureData::new(now, "web", issued.bundle_pem());
//! let request = LoginRequest {
//!     role: "web".into(),
//!     cf_instance_cert: issued.bundle_pem(),
//!     signing_time: now.format(signature::TIME_FORMAT).to_string(),
//!     signature: signature::sign(issued.private_key_pem(), &data).unwrap(),
//! };
//!
//! let auth = Authenticator::new(storage, inventory);
//! let decision = auth.login(&request, Some(&ConnectionInfo::new("10.0.0.1"))).await.unwrap();
//! assert_eq!(decision.alias_name, "app");
//! # });
//! ```

use crate::certificate::extract_certificates;
use crate::chain::ChainValidator;
use crate::identity::{Identity, SessionMetadata};
use crate::inventory::{self, InventoryClient};
use crate::role::Role;
use crate::signature::{self, SignatureData};
use crate::storage::Storage;
use crate::window::ReplayWindow;
use crate::{config, constraints, role, Error, ErrorClass, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A login attempt as submitted by an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// The role to authenticate against.
    #[serde(default)]
    pub role: String,
    /// The full contents of the file at `CF_INSTANCE_CERT`.
    #[serde(default)]
    pub cf_instance_cert: String,
    /// When the signature was made: `2006-01-02T15:04:05Z` or shell `date` output.
    #[serde(default)]
    pub signing_time: String,
    /// Signature made with the key at `CF_INSTANCE_KEY`.
    #[serde(default)]
    pub signature: String,
}

/// What the transport knows about the caller's connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Remote address, optionally with a `/mask` or `:port` suffix.
    pub remote_addr: String,
}

impl ConnectionInfo {
    pub fn new(remote_addr: impl Into<String>) -> Self {
        Self {
            remote_addr: remote_addr.into(),
        }
    }
}

/// Token lifetime parameters taken from the role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenParams {
    pub ttl: Duration,
    pub max_ttl: Duration,
    pub period: Duration,
}

impl TokenParams {
    pub fn from_role(role: &Role) -> Self {
        Self {
            ttl: role.token_ttl(),
            max_ttl: role.token_max_ttl(),
            period: role.token_period(),
        }
    }
}

/// The outcome of a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthDecision {
    /// The role the instance authenticated as.
    pub role: String,
    /// The verified instance identity.
    pub identity: Identity,
    /// Display name for the session (the instance ID).
    pub display_name: String,
    /// Alias the session is bound to (the app ID).
    pub alias_name: String,
    pub token: TokenParams,
    /// Flat metadata for the session store, read back on renewal.
    pub metadata: BTreeMap<String, String>,
}

/// Stages of a login attempt, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoginStage {
    ReceivedTime,
    RoleResolved,
    CidrChecked,
    SignatureExtracted,
    ConfigResolved,
    TimeWindowChecked,
    CertsExtracted,
    SignatureVerified,
    ChainValidated,
    IdentityDecoded,
    ConstraintsChecked,
    InventoryCrossChecked,
    Issued,
}

impl fmt::Display for LoginStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A login attempt that failed after passing `stage`.
#[derive(Debug, thiserror::Error)]
#[error("login rejected after {stage}: {error}")]
pub struct LoginRejection {
    /// The last stage the attempt passed.
    pub stage: LoginStage,
    #[source]
    pub error: Error,
}

impl LoginRejection {
    pub fn class(&self) -> ErrorClass {
        self.error.class()
    }

    pub fn client_message(&self) -> String {
        self.error.client_message()
    }

    pub fn into_error(self) -> Error {
        self.error
    }
}

impl From<LoginRejection> for Error {
    fn from(rejection: LoginRejection) -> Self {
        rejection.error
    }
}

/// Authenticates instances against stored configuration, roles and the
/// platform inventory.
///
/// Holds no mutable state; clone the `Arc`s freely and call concurrently.
pub struct Authenticator<S: ?Sized, I: ?Sized> {
    pub(crate) storage: Arc<S>,
    pub(crate) inventory: Arc<I>,
}

impl<S: Storage + ?Sized, I: InventoryClient + ?Sized> Authenticator<S, I> {
    pub fn new(storage: Arc<S>, inventory: Arc<I>) -> Self {
        Self { storage, inventory }
    }

    /// Authenticates a login attempt received now.
    pub async fn login(
        &self,
        request: &LoginRequest,
        connection: Option<&ConnectionInfo>,
    ) -> Result<AuthDecision> {
        let received_at = Utc::now();
        self.login_at(request, connection, received_at).await
    }

    /// Authenticates a login attempt whose arrival time the transport has
    /// already captured.
    pub async fn login_at(
        &self,
        request: &LoginRequest,
        connection: Option<&ConnectionInfo>,
        received_at: DateTime<Utc>,
    ) -> Result<AuthDecision> {
        self.login_staged(request, connection, received_at)
            .await
            .map_err(LoginRejection::into_error)
    }

    /// Like [`login_at`](Self::login_at), but a rejection also reports the
    /// last stage the attempt passed.
    pub async fn login_staged(
        &self,
        request: &LoginRequest,
        connection: Option<&ConnectionInfo>,
        received_at: DateTime<Utc>,
    ) -> std::result::Result<AuthDecision, LoginRejection> {
        let mut stage = LoginStage::ReceivedTime;
        match self
            .run_login(request, connection, received_at, &mut stage)
            .await
        {
            Ok(decision) => {
                info!(
                    role = %decision.role,
                    instance_id = %decision.identity.instance_id,
                    app_id = %decision.identity.app_id,
                    "login succeeded"
                );
                Ok(decision)
            }
            Err(error) => {
                log_rejection("login", stage, &request.role, &error);
                Err(LoginRejection { stage, error })
            }
        }
    }

    async fn run_login(
        &self,
        request: &LoginRequest,
        connection: Option<&ConnectionInfo>,
        received_at: DateTime<Utc>,
        stage: &mut LoginStage,
    ) -> Result<AuthDecision> {
        let remote_addr = connection.map(|c| c.remote_addr.as_str());

        let role = self.resolve_role(&request.role).await?;
        *stage = LoginStage::RoleResolved;

        constraints::check_bound_cidrs(&role.bound_cidrs, remote_addr)?;
        *stage = LoginStage::CidrChecked;

        let signature = required("signature", &request.signature)?;
        let cf_instance_cert = required("cf_instance_cert", &request.cf_instance_cert)?;
        let signing_time =
            signature::parse_signing_time(required("signing_time", &request.signing_time)?)?;
        *stage = LoginStage::SignatureExtracted;

        let config = config::read(&*self.storage)
            .await?
            .ok_or(Error::NotConfigured)?;
        *stage = LoginStage::ConfigResolved;

        ReplayWindow::from_config(&config).check(signing_time, received_at)?;
        *stage = LoginStage::TimeWindowChecked;

        let certs = extract_certificates(cf_instance_cert)?;
        *stage = LoginStage::CertsExtracted;

        // The role name is signed as the caller sent it, before normalization.
        let data = SignatureData::new(signing_time, request.role.as_str(), cf_instance_cert);
        signature::verify_with(&certs.identity, signature, &data)?;
        let signing_cert = certs.identity;
        *stage = LoginStage::SignatureVerified;

        let trust_bundle = config.trust_bundle().map_err(|e| {
            error!(error = %e, "stored CA configuration no longer parses");
            Error::NotConfigured
        })?;
        ChainValidator::new(&trust_bundle)?.validate(
            certs.intermediate.as_ref(),
            &signing_cert,
            received_at,
        )?;
        *stage = LoginStage::ChainValidated;

        let identity = Identity::from_certificate(&signing_cert)?;
        debug!(?identity, "handling login attempt");
        *stage = LoginStage::IdentityDecoded;

        constraints::check(&identity, &role, remote_addr)?;
        *stage = LoginStage::ConstraintsChecked;

        inventory::cross_check_with_timeout(&*self.inventory, &identity, config.inventory_timeout())
            .await?;
        *stage = LoginStage::InventoryCrossChecked;

        let metadata = SessionMetadata::new(role.name.as_str(), &identity).to_map();
        *stage = LoginStage::Issued;

        Ok(AuthDecision {
            display_name: identity.instance_id.clone(),
            alias_name: identity.app_id.clone(),
            token: TokenParams::from_role(&role),
            role: role.name,
            identity,
            metadata,
        })
    }

    pub(crate) async fn resolve_role(&self, name: &str) -> Result<Role> {
        let name = required("role", name)?;
        role::read(&*self.storage, name)
            .await?
            .ok_or_else(|| Error::UnknownRole(name.to_string()))
    }
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str> {
    if value.trim().is_empty() {
        Err(Error::MissingField(field))
    } else {
        Ok(value)
    }
}

/// Logs a rejection with detail proportional to who may see it.
pub(crate) fn log_rejection(operation: &str, stage: impl fmt::Display, role: &str, e: &Error) {
    match e.class() {
        ErrorClass::Security => warn!(operation, %stage, role, error = %e, "rejected: security check failed"),
        ErrorClass::Dependency => error!(operation, %stage, role, error = %e, "rejected: dependency failure"),
        ErrorClass::Input | ErrorClass::Policy => info!(operation, %stage, role, error = %e, "rejected"),
    }
}
