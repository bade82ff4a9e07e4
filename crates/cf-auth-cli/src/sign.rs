//! Sign command - produce a login payload from inside an instance
//!
//! Reads the certificate bundle and key the platform mounts at
//! `CF_INSTANCE_CERT` and `CF_INSTANCE_KEY` and prints the JSON body a
//! login expects.

use anyhow::{Context, Result};
use cf_auth::signature::{self, SignatureData};
use cf_auth::LoginRequest;
use chrono::{DateTime, Utc};
use clap::Args;
use std::path::PathBuf;

/// Sign a login payload with the instance's identity key
#[derive(Args, Debug)]
pub struct SignArgs {
    /// Role to log in as
    #[arg(long)]
    pub role: String,

    /// Path to the instance certificate bundle
    #[arg(long, env = "CF_INSTANCE_CERT")]
    pub cert: PathBuf,

    /// Path to the instance private key
    #[arg(long, env = "CF_INSTANCE_KEY")]
    pub key: PathBuf,

    /// Signing time (RFC 3339); defaults to now
    #[arg(long)]
    pub signing_time: Option<DateTime<Utc>>,
}

/// Execute the sign command
pub fn execute(args: SignArgs) -> Result<()> {
    let request = build_request(&args)?;
    println!("{}", serde_json::to_string_pretty(&request)?);
    Ok(())
}

fn build_request(args: &SignArgs) -> Result<LoginRequest> {
    let cf_instance_cert = std::fs::read_to_string(&args.cert)
        .with_context(|| format!("Failed to read certificate {}", args.cert.display()))?;
    let key_pem = std::fs::read_to_string(&args.key)
        .with_context(|| format!("Failed to read private key {}", args.key.display()))?;

    let signing_time = args.signing_time.unwrap_or_else(Utc::now);
    let data = SignatureData::new(signing_time, args.role.as_str(), cf_instance_cert.as_str());
    let signature = signature::sign(&key_pem, &data).context("Failed to sign login payload")?;

    Ok(LoginRequest {
        role: args.role.clone(),
        cf_instance_cert,
        signing_time: signing_time.format(signature::TIME_FORMAT).to_string(),
        signature,
    })
}
