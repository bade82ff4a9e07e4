//! Roles: named sets of identity constraints and token parameters.

use crate::storage::Storage;
use crate::{Error, Result};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage key prefix for roles.
pub const ROLE_PREFIX: &str = "role/";

/// A role an instance can log in as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Unique, lower-cased role name.
    pub name: String,

    #[serde(default)]
    pub bound_instance_ids: Vec<String>,
    #[serde(default)]
    pub bound_app_ids: Vec<String>,
    #[serde(default)]
    pub bound_org_ids: Vec<String>,
    #[serde(default)]
    pub bound_space_ids: Vec<String>,

    /// Networks the caller's address must fall within.
    #[serde(default)]
    pub bound_cidrs: Vec<IpNet>,

    /// Skip requiring the caller's address to equal the certificate's IP.
    #[serde(default)]
    pub disable_ip_matching: bool,

    /// Token lifetime, in seconds. Zero defers to the broker's default.
    #[serde(default)]
    pub token_ttl: u64,
    /// Maximum token lifetime, in seconds.
    #[serde(default)]
    pub token_max_ttl: u64,
    /// Token renewal period, in seconds.
    #[serde(default)]
    pub token_period: u64,
}

impl Role {
    /// Creates an unrestricted role.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: normalize_name(&name.into()),
            bound_instance_ids: Vec::new(),
            bound_app_ids: Vec::new(),
            bound_org_ids: Vec::new(),
            bound_space_ids: Vec::new(),
            bound_cidrs: Vec::new(),
            disable_ip_matching: false,
            token_ttl: 0,
            token_max_ttl: 0,
            token_period: 0,
        }
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl)
    }

    pub fn token_max_ttl(&self) -> Duration {
        Duration::from_secs(self.token_max_ttl)
    }

    pub fn token_period(&self) -> Duration {
        Duration::from_secs(self.token_period)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidSetting("role name: must not be empty".to_string()));
        }
        if self.name.contains('/') {
            return Err(Error::InvalidSetting(format!(
                "role name {:?}: must not contain '/'",
                self.name
            )));
        }
        if self.token_max_ttl > 0 && self.token_ttl > self.token_max_ttl {
            return Err(Error::InvalidSetting(
                "token_ttl: must not exceed token_max_ttl".to_string(),
            ));
        }
        Ok(())
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

fn role_key(name: &str) -> String {
    format!("{ROLE_PREFIX}{}", normalize_name(name))
}

/// Reads a role by name.
pub async fn read<S: Storage + ?Sized>(storage: &S, name: &str) -> Result<Option<Role>> {
    match storage.get(&role_key(name)).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Validates and writes a role, normalizing its name.
pub async fn write<S: Storage + ?Sized>(storage: &S, role: &Role) -> Result<()> {
    let mut role = role.clone();
    role.name = normalize_name(&role.name);
    role.validate()?;
    storage
        .put(&role_key(&role.name), serde_json::to_vec(&role)?)
        .await?;
    tracing::info!(role = %role.name, "role written");
    Ok(())
}

/// Deletes a role. Deleting a missing role is not an error.
pub async fn delete<S: Storage + ?Sized>(storage: &S, name: &str) -> Result<()> {
    storage.delete(&role_key(name)).await
}

/// Lists role names.
pub async fn list<S: Storage + ?Sized>(storage: &S) -> Result<Vec<String>> {
    storage.list(ROLE_PREFIX).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn test_write_read_list_delete() {
        let storage = MemoryStorage::new();
        let mut role = Role::new("Web-Frontend");
        role.bound_app_ids = vec!["app-1".into()];
        role.bound_cidrs = vec!["10.0.0.0/8".parse().unwrap()];
        role.token_ttl = 600;

        write(&storage, &role).await.unwrap();

        let read_back = read(&storage, "web-frontend").await.unwrap().unwrap();
        assert_eq!(read_back, role);
        assert_eq!(read_back.token_ttl(), Duration::from_secs(600));
        assert!(read(&storage, "WEB-FRONTEND").await.unwrap().is_some());

        assert_eq!(list(&storage).await.unwrap(), vec!["web-frontend".to_string()]);

        delete(&storage, "web-frontend").await.unwrap();
        assert!(read(&storage, "web-frontend").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_rejects_invalid() {
        let storage = MemoryStorage::new();
        assert!(write(&storage, &Role::new("  ")).await.is_err());
        assert!(write(&storage, &Role::new("a/b")).await.is_err());

        let mut role = Role::new("ttl");
        role.token_ttl = 100;
        role.token_max_ttl = 10;
        assert!(matches!(
            write(&storage, &role).await,
            Err(Error::InvalidSetting(_))
        ));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let role: Role = serde_json::from_str(
            r#"{"name": "web", "bound_cidrs": ["192.168.0.0/16"], "disable_ip_matching": true}"#,
        )
        .unwrap();
        assert!(role.bound_app_ids.is_empty());
        assert!(role.disable_ip_matching);
        assert_eq!(role.bound_cidrs.len(), 1);
    }
}
