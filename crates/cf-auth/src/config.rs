//! Login configuration: trusted CAs and time bounds.

use crate::certificate::TrustBundle;
use crate::storage::Storage;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage key holding the configuration.
pub const CONFIG_KEY: &str = "config";

/// Configuration shared by every login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// PEM-encoded CA certificates trusted to issue instance identities.
    #[serde(default)]
    pub identity_ca_certificates: Vec<String>,

    /// How far in the past a signing time may be.
    #[serde(default = "default_max_seconds_not_before")]
    pub login_max_seconds_not_before: u64,

    /// How far in the future a signing time may be.
    #[serde(default = "default_max_seconds_not_after")]
    pub login_max_seconds_not_after: u64,

    /// Upper bound on the whole inventory cross-check.
    #[serde(default = "default_inventory_timeout_seconds")]
    pub inventory_timeout_seconds: u64,
}

fn default_max_seconds_not_before() -> u64 {
    300
}
fn default_max_seconds_not_after() -> u64 {
    60
}
fn default_inventory_timeout_seconds() -> u64 {
    10
}

impl Configuration {
    /// Creates a configuration trusting the given CA PEMs, with default bounds.
    pub fn new(identity_ca_certificates: Vec<String>) -> Self {
        Self {
            identity_ca_certificates,
            login_max_seconds_not_before: default_max_seconds_not_before(),
            login_max_seconds_not_after: default_max_seconds_not_after(),
            inventory_timeout_seconds: default_inventory_timeout_seconds(),
        }
    }

    /// Parses the configured CA certificates.
    pub fn trust_bundle(&self) -> Result<TrustBundle> {
        TrustBundle::from_pems(&self.identity_ca_certificates)
    }

    pub fn inventory_timeout(&self) -> Duration {
        Duration::from_secs(self.inventory_timeout_seconds)
    }

    /// Checks that at least one CA is configured and every CA parses.
    pub fn validate(&self) -> Result<()> {
        let bundle = self
            .trust_bundle()
            .map_err(|e| Error::InvalidSetting(format!("identity_ca_certificates: {e}")))?;
        if bundle.is_empty() {
            return Err(Error::InvalidSetting(
                "identity_ca_certificates: at least one CA certificate is required".to_string(),
            ));
        }
        if self.inventory_timeout_seconds == 0 {
            return Err(Error::InvalidSetting(
                "inventory_timeout_seconds: must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reads the configuration, if one has been written.
pub async fn read<S: Storage + ?Sized>(storage: &S) -> Result<Option<Configuration>> {
    match storage.get(CONFIG_KEY).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Validates and writes the configuration.
pub async fn write<S: Storage + ?Sized>(storage: &S, config: &Configuration) -> Result<()> {
    config.validate()?;
    storage.put(CONFIG_KEY, serde_json::to_vec(config)?).await?;
    tracing::info!(
        ca_count = config.identity_ca_certificates.len(),
        max_seconds_not_before = config.login_max_seconds_not_before,
        max_seconds_not_after = config.login_max_seconds_not_after,
        "configuration updated"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::DevCa;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_defaults_on_deserialize() {
        let config: Configuration =
            serde_json::from_str(r#"{"identity_ca_certificates": []}"#).unwrap();
        assert_eq!(config.login_max_seconds_not_before, 300);
        assert_eq!(config.login_max_seconds_not_after, 60);
        assert_eq!(config.inventory_timeout(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let ca = DevCa::new().unwrap();
        let storage = MemoryStorage::new();
        assert!(read(&storage).await.unwrap().is_none());

        let config = Configuration::new(vec![ca.root_pem()]);
        write(&storage, &config).await.unwrap();
        assert_eq!(read(&storage).await.unwrap(), Some(config));
    }

    #[tokio::test]
    async fn test_write_rejects_missing_or_bad_ca() {
        let storage = MemoryStorage::new();

        let result = write(&storage, &Configuration::new(vec![])).await;
        assert!(matches!(result, Err(Error::InvalidSetting(_))));

        let bogus = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n".to_string();
        let result = write(&storage, &Configuration::new(vec![bogus])).await;
        assert!(matches!(result, Err(Error::InvalidSetting(_))));

        assert!(read(&storage).await.unwrap().is_none());
    }
}
