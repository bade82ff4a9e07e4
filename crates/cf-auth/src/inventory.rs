//! Cross-check of an identity against the platform's live inventory.
//!
//! A certificate that is validly signed and chained may still describe an
//! app that has since been deleted, moved, or scaled to zero. The
//! cross-check asks the platform API whether the app, org and space named by
//! the identity still exist and still relate to each other the way the
//! certificate claims.
//!
//! The instance ID is not checked: the platform API offers no lookup for an
//! individual instance, so it can only be constrained through role bindings.

use crate::identity::Identity;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// An app as reported by the platform API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    pub guid: String,
    pub space_guid: String,
    pub instance_count: u32,
}

/// An org as reported by the platform API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgRecord {
    pub guid: String,
}

/// A space as reported by the platform API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceRecord {
    pub guid: String,
    pub org_guid: String,
}

/// Client for the platform's inventory API.
///
/// Implementations report transport failures as [`Error::Inventory`]. Any
/// retry policy belongs to the implementation.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    async fn get_app(&self, app_id: &str) -> Result<AppRecord>;

    async fn get_org(&self, org_id: &str) -> Result<OrgRecord>;

    async fn get_space(&self, space_id: &str) -> Result<SpaceRecord>;
}

/// Runs [`cross_check`] under `timeout`. Timing out rejects the login.
pub async fn cross_check_with_timeout<I: InventoryClient + ?Sized>(
    client: &I,
    identity: &Identity,
    timeout: Duration,
) -> Result<()> {
    match tokio::time::timeout(timeout, cross_check(client, identity)).await {
        Ok(result) => result,
        Err(_) => Err(Error::InventoryTimeout(timeout)),
    }
}

/// Verifies the identity's app, org and space against the inventory.
pub async fn cross_check<I: InventoryClient + ?Sized>(client: &I, identity: &Identity) -> Result<()> {
    let app = client.get_app(&identity.app_id).await?;
    if app.guid != identity.app_id {
        return Err(Error::InventoryMismatch(format!(
            "cert app ID {} doesn't match API's expected one of {}",
            identity.app_id, app.guid
        )));
    }
    if app.space_guid != identity.space_id {
        return Err(Error::InventoryMismatch(format!(
            "cert space ID {} doesn't match API's expected one of {}",
            identity.space_id, app.space_guid
        )));
    }
    if app.instance_count == 0 {
        return Err(Error::NoLiveInstances);
    }

    let org = client.get_org(&identity.org_id).await?;
    if org.guid != identity.org_id {
        return Err(Error::InventoryMismatch(format!(
            "cert org ID {} doesn't match API's expected one of {}",
            identity.org_id, org.guid
        )));
    }

    let space = client.get_space(&identity.space_id).await?;
    if space.guid != identity.space_id {
        return Err(Error::InventoryMismatch(format!(
            "cert space ID {} doesn't match API's expected one of {}",
            identity.space_id, space.guid
        )));
    }
    if space.org_guid != identity.org_id {
        return Err(Error::InventoryMismatch(format!(
            "cert org ID {} doesn't match API's expected one of {}",
            identity.org_id, space.org_guid
        )));
    }

    Ok(())
}

/// In-memory inventory for development and tests.
#[derive(Debug, Default)]
pub struct StaticInventory {
    apps: RwLock<HashMap<String, AppRecord>>,
    orgs: RwLock<HashMap<String, OrgRecord>>,
    spaces: RwLock<HashMap<String, SpaceRecord>>,
}

impl StaticInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a running app together with its space and org.
    pub async fn register(&self, identity: &Identity, instance_count: u32) {
        self.put_app(AppRecord {
            guid: identity.app_id.clone(),
            space_guid: identity.space_id.clone(),
            instance_count,
        })
        .await;
        self.put_org(OrgRecord {
            guid: identity.org_id.clone(),
        })
        .await;
        self.put_space(SpaceRecord {
            guid: identity.space_id.clone(),
            org_guid: identity.org_id.clone(),
        })
        .await;
    }

    pub async fn put_app(&self, app: AppRecord) {
        self.apps.write().await.insert(app.guid.clone(), app);
    }

    pub async fn put_org(&self, org: OrgRecord) {
        self.orgs.write().await.insert(org.guid.clone(), org);
    }

    pub async fn put_space(&self, space: SpaceRecord) {
        self.spaces.write().await.insert(space.guid.clone(), space);
    }

    pub async fn remove_app(&self, app_id: &str) {
        self.apps.write().await.remove(app_id);
    }
}

#[async_trait]
impl InventoryClient for StaticInventory {
    async fn get_app(&self, app_id: &str) -> Result<AppRecord> {
        self.apps
            .read()
            .await
            .get(app_id)
            .cloned()
            .ok_or_else(|| Error::Inventory(format!("app {app_id} not found")))
    }

    async fn get_org(&self, org_id: &str) -> Result<OrgRecord> {
        self.orgs
            .read()
            .await
            .get(org_id)
            .cloned()
            .ok_or_else(|| Error::Inventory(format!("org {org_id} not found")))
    }

    async fn get_space(&self, space_id: &str) -> Result<SpaceRecord> {
        self.spaces
            .read()
            .await
            .get(space_id)
            .cloned()
            .ok_or_else(|| Error::Inventory(format!("space {space_id} not found")))
    }
}
