//! Token renewal.
//!
//! Renewal trusts nothing but the metadata stored at login. The role is
//! reloaded, so tightened constraints take effect on the next renewal, and
//! the inventory is consulted again so a stopped or moved app loses its
//! token. No signature or certificate is involved.

use crate::identity::SessionMetadata;
use crate::inventory::{self, InventoryClient};
use crate::login::{log_rejection, Authenticator, ConnectionInfo, TokenParams};
use crate::storage::Storage;
use crate::{config, constraints, Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

/// Stages of a renewal, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RenewStage {
    Received,
    MetadataDecoded,
    RoleResolved,
    ConfigResolved,
    ConstraintsChecked,
    InventoryCrossChecked,
    Renewed,
}

impl fmt::Display for RenewStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl<S: Storage + ?Sized, I: InventoryClient + ?Sized> Authenticator<S, I> {
    /// Re-validates a session and returns the role's current token parameters.
    pub async fn renew(
        &self,
        metadata: &BTreeMap<String, String>,
        connection: Option<&ConnectionInfo>,
    ) -> Result<TokenParams> {
        let mut stage = RenewStage::Received;
        let result = self.run_renew(metadata, connection, &mut stage).await;

        let role = metadata.get("role").map(String::as_str).unwrap_or_default();
        match &result {
            Ok(_) => info!(role, "renewal succeeded"),
            Err(e) => log_rejection("renew", stage, role, e),
        }
        result
    }

    async fn run_renew(
        &self,
        metadata: &BTreeMap<String, String>,
        connection: Option<&ConnectionInfo>,
        stage: &mut RenewStage,
    ) -> Result<TokenParams> {
        let session = SessionMetadata::from_map(metadata)?;
        let identity = session.identity()?;
        debug!(?identity, "handling renewal");
        *stage = RenewStage::MetadataDecoded;

        let role = self.resolve_role(&session.role).await?;
        *stage = RenewStage::RoleResolved;

        let config = config::read(&*self.storage)
            .await?
            .ok_or(Error::NotConfigured)?;
        *stage = RenewStage::ConfigResolved;

        constraints::check(&identity, &role, connection.map(|c| c.remote_addr.as_str()))?;
        *stage = RenewStage::ConstraintsChecked;

        inventory::cross_check_with_timeout(&*self.inventory, &identity, config.inventory_timeout())
            .await?;
        *stage = RenewStage::InventoryCrossChecked;

        let params = TokenParams::from_role(&role);
        *stage = RenewStage::Renewed;
        Ok(params)
    }
}
