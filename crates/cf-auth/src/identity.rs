//! Instance identity decoded from a certificate or from session metadata.
//!
//! # Certificate layout
//!
//! ```text
//! Subject: OU=organization:<org guid>, OU=space:<space guid>, OU=app:<app guid>, CN=<instance guid>
//! SAN:     IP Address:<container ip>
//! ```

use crate::certificate::Certificate;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use x509_parser::extensions::GeneralName;

const ORG_PREFIX: &str = "organization:";
const SPACE_PREFIX: &str = "space:";
const APP_PREFIX: &str = "app:";

/// The identity of one running application instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub instance_id: String,
    pub app_id: String,
    pub org_id: String,
    pub space_id: String,
    pub ip_address: IpAddr,
}

/// The identity fields a role can constrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityField {
    InstanceId,
    AppId,
    OrgId,
    SpaceId,
}

impl fmt::Display for IdentityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdentityField::InstanceId => "instance ID",
            IdentityField::AppId => "app ID",
            IdentityField::OrgId => "org ID",
            IdentityField::SpaceId => "space ID",
        };
        f.write_str(name)
    }
}

impl Identity {
    /// Creates an identity, rejecting empty fields.
    pub fn new(
        instance_id: impl Into<String>,
        app_id: impl Into<String>,
        org_id: impl Into<String>,
        space_id: impl Into<String>,
        ip_address: IpAddr,
    ) -> Result<Self> {
        let identity = Self {
            instance_id: instance_id.into(),
            app_id: app_id.into(),
            org_id: org_id.into(),
            space_id: space_id.into(),
            ip_address,
        };
        for (field, value) in [
            ("instance_id", &identity.instance_id),
            ("app_id", &identity.app_id),
            ("org_id", &identity.org_id),
            ("space_id", &identity.space_id),
        ] {
            if value.is_empty() {
                return Err(Error::IdentityFieldMissing(field.to_string()));
            }
        }
        Ok(identity)
    }

    /// Reads the identity fields of a validated instance certificate.
    ///
    /// Only call this on a certificate whose signature and chain have been
    /// verified; the fields are attacker-controlled until then.
    pub fn from_certificate(cert: &Certificate) -> Result<Self> {
        let parsed = cert.parsed()?;
        let subject = parsed.subject();

        let instance_id = subject
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .ok_or_else(|| Error::IdentityFieldMissing("instance_id (subject CN)".to_string()))?;

        let mut org_id = None;
        let mut space_id = None;
        let mut app_id = None;
        for ou in subject.iter_organizational_unit() {
            let Ok(value) = ou.as_str() else {
                continue;
            };
            if let Some(id) = value.strip_prefix(ORG_PREFIX) {
                org_id = Some(id);
            } else if let Some(id) = value.strip_prefix(SPACE_PREFIX) {
                space_id = Some(id);
            } else if let Some(id) = value.strip_prefix(APP_PREFIX) {
                app_id = Some(id);
            }
        }

        let ip_addresses: Vec<IpAddr> = parsed
            .subject_alternative_name()
            .map_err(|e| Error::IdentityFieldMissing(format!("ip_address (bad SAN: {e})")))?
            .map(|san| {
                san.value
                    .general_names
                    .iter()
                    .filter_map(|name| match name {
                        GeneralName::IPAddress(bytes) => ip_from_bytes(bytes),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        let [ip_address] = ip_addresses.as_slice() else {
            return Err(Error::IdentityFieldMissing(format!(
                "ip_address (expected 1 IP SAN, found {})",
                ip_addresses.len()
            )));
        };

        Self::new(
            instance_id,
            app_id.ok_or_else(|| missing_ou(APP_PREFIX))?,
            org_id.ok_or_else(|| missing_ou(ORG_PREFIX))?,
            space_id.ok_or_else(|| missing_ou(SPACE_PREFIX))?,
            *ip_address,
        )
    }

    /// Returns the value of a constrainable field.
    pub fn field(&self, field: IdentityField) -> &str {
        match field {
            IdentityField::InstanceId => &self.instance_id,
            IdentityField::AppId => &self.app_id,
            IdentityField::OrgId => &self.org_id,
            IdentityField::SpaceId => &self.space_id,
        }
    }
}

fn missing_ou(prefix: &str) -> Error {
    Error::IdentityFieldMissing(format!("subject OU {prefix}<id>"))
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}

/// The metadata stored with a session at login and read back at renewal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub role: String,
    pub instance_id: String,
    pub ip_address: String,
    pub org_id: String,
    pub app_id: String,
    pub space_id: String,
}

impl SessionMetadata {
    /// Records a freshly authenticated identity under `role`.
    pub fn new(role: impl Into<String>, identity: &Identity) -> Self {
        Self {
            role: role.into(),
            instance_id: identity.instance_id.clone(),
            ip_address: identity.ip_address.to_string(),
            org_id: identity.org_id.clone(),
            app_id: identity.app_id.clone(),
            space_id: identity.space_id.clone(),
        }
    }

    /// Reads metadata from a session's flat string map.
    ///
    /// Every key must be present and non-empty; unrelated keys are ignored.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self> {
        let value = serde_json::to_value(map)?;
        let metadata: Self =
            serde_json::from_value(value).map_err(|e| Error::RenewalMetadata(e.to_string()))?;

        for (key, value) in metadata.entries() {
            if value.is_empty() {
                return Err(Error::RenewalMetadata(format!("{key:?} is empty")));
            }
        }
        Ok(metadata)
    }

    /// Flattens the metadata into the map handed to the session store.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.entries()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Reconstructs the identity validated at login.
    pub fn identity(&self) -> Result<Identity> {
        let ip_address = self.ip_address.parse::<IpAddr>().map_err(|e| {
            Error::RenewalMetadata(format!("ip_address {:?}: {e}", self.ip_address))
        })?;
        Identity::new(
            self.instance_id.clone(),
            self.app_id.clone(),
            self.org_id.clone(),
            self.space_id.clone(),
            ip_address,
        )
        .map_err(|e| Error::RenewalMetadata(e.to_string()))
    }

    fn entries(&self) -> [(&'static str, &str); 6] {
        [
            ("role", self.role.as_str()),
            ("instance_id", self.instance_id.as_str()),
            ("ip_address", self.ip_address.as_str()),
            ("org_id", self.org_id.as_str()),
            ("app_id", self.app_id.as_str()),
            ("space_id", self.space_id.as_str()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::{DevCa, InstanceSpec};

    #[test]
    fn test_from_certificate() {
        let ca = DevCa::new().unwrap();
        let spec = InstanceSpec::new(
            "f7a2-instance",
            "34a8-org",
            "3d2e-space",
            "2d3e-app",
            "10.255.181.105".parse().unwrap(),
        );
        let issued = ca.issue(&spec).unwrap();

        let identity = Identity::from_certificate(issued.identity()).unwrap();
        assert_eq!(identity.instance_id, "f7a2-instance");
        assert_eq!(identity.org_id, "34a8-org");
        assert_eq!(identity.space_id, "3d2e-space");
        assert_eq!(identity.app_id, "2d3e-app");
        assert_eq!(identity.ip_address, "10.255.181.105".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_ipv6_san() {
        let ca = DevCa::new().unwrap();
        let spec = InstanceSpec::new("i", "o", "s", "a", "fd00::7".parse().unwrap());
        let issued = ca.issue(&spec).unwrap();

        let identity = Identity::from_certificate(issued.identity()).unwrap();
        assert_eq!(identity.ip_address, "fd00::7".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_ca_certificate_lacks_identity() {
        let ca = DevCa::new().unwrap();
        let root = Certificate::from_pem(&ca.root_pem()).unwrap();
        assert!(matches!(
            Identity::from_certificate(&root),
            Err(Error::IdentityFieldMissing(_))
        ));
    }

    #[test]
    fn test_metadata_roundtrip() {
        let identity = Identity::new("i", "a", "o", "s", "10.0.0.1".parse().unwrap()).unwrap();
        let metadata = SessionMetadata::new("web", &identity);
        let map = metadata.to_map();
        assert_eq!(map.len(), 6);
        assert_eq!(map["ip_address"], "10.0.0.1");

        let restored = SessionMetadata::from_map(&map).unwrap();
        assert_eq!(restored, metadata);
        assert_eq!(restored.identity().unwrap(), identity);
    }

    #[test]
    fn test_metadata_missing_field() {
        let identity = Identity::new("i", "a", "o", "s", "10.0.0.1".parse().unwrap()).unwrap();
        let mut map = SessionMetadata::new("web", &identity).to_map();
        map.remove("space_id");

        let err = SessionMetadata::from_map(&map).unwrap_err();
        assert!(matches!(err, Error::RenewalMetadata(_)));
        assert!(err.to_string().contains("space_id"));
    }

    #[test]
    fn test_metadata_empty_or_bad_ip() {
        let identity = Identity::new("i", "a", "o", "s", "10.0.0.1".parse().unwrap()).unwrap();
        let mut map = SessionMetadata::new("web", &identity).to_map();
        map.insert("org_id".into(), String::new());
        assert!(matches!(
            SessionMetadata::from_map(&map),
            Err(Error::RenewalMetadata(_))
        ));

        let mut map = SessionMetadata::new("web", &identity).to_map();
        map.insert("ip_address".into(), "not-an-ip".into());
        let metadata = SessionMetadata::from_map(&map).unwrap();
        assert!(matches!(metadata.identity(), Err(Error::RenewalMetadata(_))));
    }

    #[test]
    fn test_new_rejects_empty() {
        let result = Identity::new("", "a", "o", "s", "10.0.0.1".parse().unwrap());
        assert!(matches!(result, Err(Error::IdentityFieldMissing(_))));
    }
}
