//! Verify command - run a login payload through every check, offline
//!
//! The file names the payload, the trusted CAs, the role and the inventory
//! the platform API would report:
//!
//! ```toml
//! payload = "login.json"
//! remote_addr = "10.0.0.7"
//! ca_files = ["ca.pem"]
//!
//! [role]
//! name = "web"
//! bound_app_ids = ["app-1"]
//!
//! [[inventory.apps]]
//! guid = "app-1"
//! space_guid = "space-1"
//! instance_count = 1
//!
//! [[inventory.orgs]]
//! guid = "org-1"
//!
//! [[inventory.spaces]]
//! guid = "space-1"
//! org_guid = "org-1"
//! ```
//!
//! Relative paths resolve against the file's directory.

use anyhow::{bail, Context, Result};
use cf_auth::{
    config, role, AppRecord, AuthDecision, Authenticator, Configuration, ConnectionInfo,
    LoginRequest, MemoryStorage, OrgRecord, Role, SpaceRecord, StaticInventory,
};
use clap::Args;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Run a login payload through every check, offline
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Verification file (TOML)
    #[arg(short, long)]
    pub file: PathBuf,
}

#[derive(Debug, Deserialize)]
struct VerifyFile {
    /// JSON login payload, as printed by `cf-auth sign`
    payload: PathBuf,

    /// Caller address as the transport would see it
    #[serde(default)]
    remote_addr: Option<String>,

    /// Trusted CA certificate files
    ca_files: Vec<PathBuf>,

    #[serde(default)]
    login_max_seconds_not_before: Option<u64>,

    #[serde(default)]
    login_max_seconds_not_after: Option<u64>,

    role: Role,

    #[serde(default)]
    inventory: InventoryFile,
}

#[derive(Debug, Default, Deserialize)]
struct InventoryFile {
    #[serde(default)]
    apps: Vec<AppRecord>,
    #[serde(default)]
    orgs: Vec<OrgRecord>,
    #[serde(default)]
    spaces: Vec<SpaceRecord>,
}

/// Execute the verify command
pub async fn execute(args: VerifyArgs) -> Result<()> {
    let decision = run(&args.file).await?;

    println!("login accepted");
    println!("  role:        {}", decision.role);
    println!("  instance_id: {}", decision.identity.instance_id);
    println!("  app_id:      {}", decision.identity.app_id);
    println!("  org_id:      {}", decision.identity.org_id);
    println!("  space_id:    {}", decision.identity.space_id);
    println!("  ip_address:  {}", decision.identity.ip_address);
    println!("  token_ttl:   {}s", decision.token.ttl.as_secs());
    Ok(())
}

async fn run(path: &Path) -> Result<AuthDecision> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: VerifyFile =
        toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    let request: LoginRequest = {
        let payload_path = base.join(&file.payload);
        let raw = std::fs::read_to_string(&payload_path)
            .with_context(|| format!("Failed to read payload {}", payload_path.display()))?;
        serde_json::from_str(&raw).context("Payload is not a login request")?
    };

    let mut configuration = Configuration::new(
        file.ca_files
            .iter()
            .map(|p| {
                let p = base.join(p);
                std::fs::read_to_string(&p).with_context(|| format!("Failed to read CA {}", p.display()))
            })
            .collect::<Result<Vec<_>>>()?,
    );
    if let Some(secs) = file.login_max_seconds_not_before {
        configuration.login_max_seconds_not_before = secs;
    }
    if let Some(secs) = file.login_max_seconds_not_after {
        configuration.login_max_seconds_not_after = secs;
    }

    let storage = Arc::new(MemoryStorage::new());
    config::write(&*storage, &configuration).await?;
    role::write(&*storage, &file.role).await?;

    let inventory = Arc::new(StaticInventory::new());
    for app in file.inventory.apps {
        inventory.put_app(app).await;
    }
    for org in file.inventory.orgs {
        inventory.put_org(org).await;
    }
    for space in file.inventory.spaces {
        inventory.put_space(space).await;
    }

    if !request.role.eq_ignore_ascii_case(&file.role.name) {
        bail!(
            "payload is for role {:?} but the file defines {:?}",
            request.role,
            file.role.name
        );
    }

    debug!(remote_addr = ?file.remote_addr, "running login");
    let connection = file.remote_addr.map(ConnectionInfo::new);
    let authenticator = Authenticator::new(storage, inventory);
    authenticator
        .login(&request, connection.as_ref())
        .await
        .map_err(|e| anyhow::anyhow!("login rejected ({:?}): {e}", e.class()))
}
