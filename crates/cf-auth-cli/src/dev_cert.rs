//! Dev-cert command - mint a development CA and instance certificate
//!
//! Output layout:
//!
//! ```text
//! <out-dir>/ca.pem          root certificate, goes in identity_ca_certificates
//! <out-dir>/ca-key.pem      root private key
//! <out-dir>/instance.pem    intermediate + identity certificate (CF_INSTANCE_CERT)
//! <out-dir>/instance-key.pem identity private key (CF_INSTANCE_KEY)
//! ```

use anyhow::{Context, Result};
use cf_auth::ca::{DevCa, InstanceSpec};
use clap::Args;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::info;

/// Create a development CA and an instance certificate signed by it
#[derive(Args, Debug)]
pub struct DevCertArgs {
    /// Directory to write the PEM files into
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,

    /// Instance ID (certificate CN)
    #[arg(long, default_value = "00000000-0000-0000-0000-000000000001")]
    pub instance_id: String,

    /// Org ID
    #[arg(long, default_value = "org-1")]
    pub org_id: String,

    /// Space ID
    #[arg(long, default_value = "space-1")]
    pub space_id: String,

    /// App ID
    #[arg(long, default_value = "app-1")]
    pub app_id: String,

    /// Instance IP address
    #[arg(long, default_value = "127.0.0.1")]
    pub ip: IpAddr,
}

/// Execute the dev-cert command
pub fn execute(args: DevCertArgs) -> Result<()> {
    let written = write_dev_certs(&args)?;
    for path in written {
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn write_dev_certs(args: &DevCertArgs) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Failed to create {}", args.out_dir.display()))?;

    let ca = DevCa::new().context("Failed to create development CA")?;
    let spec = InstanceSpec::new(
        args.instance_id.as_str(),
        args.org_id.as_str(),
        args.space_id.as_str(),
        args.app_id.as_str(),
        args.ip,
    );
    let issued = ca.issue(&spec).context("Failed to issue instance certificate")?;
    info!(instance_id = %args.instance_id, app_id = %args.app_id, "issued development certificate");

    let files = [
        ("ca.pem", ca.root_pem()),
        ("ca-key.pem", ca.root_key_pem()),
        ("instance.pem", issued.bundle_pem()),
        ("instance-key.pem", issued.private_key_pem().to_string()),
    ];
    files
        .into_iter()
        .map(|(name, contents)| write_file(&args.out_dir, name, &contents))
        .collect()
}

fn write_file(dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
