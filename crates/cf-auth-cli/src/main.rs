//! cf-auth CLI - instance-identity login helpers
//!
//! Signs login payloads inside an instance, mints development certificates,
//! and runs the full login check offline.
//!
//! # Examples
//!
//! ```bash
//! # Inside an instance: print a signed login payload for role "web"
//! cf-auth sign --role web > login.json
//!
//! # Mint a development CA and instance certificate
//! cf-auth dev-cert --out-dir ./dev --app-id app-1 --ip 10.0.0.7
//!
//! # Check the payload against a local configuration, role and inventory
//! cf-auth verify --file verify.toml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod dev_cert;
mod sign;
mod verify;

/// cf-auth - platform instance-identity login helpers
#[derive(Parser)]
#[command(name = "cf-auth")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign a login payload with the instance's identity key
    Sign(sign::SignArgs),

    /// Create a development CA and an instance certificate signed by it
    DevCert(dev_cert::DevCertArgs),

    /// Run a login payload through every check, offline
    Verify(verify::VerifyArgs),
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cf_auth=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cf_auth=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    debug!("starting cf-auth");

    match cli.command {
        Commands::Sign(args) => sign::execute(args),
        Commands::DevCert(args) => dev_cert::execute(args),
        Commands::Verify(args) => verify::execute(args).await,
    }
}
