use std::{fs::File, path::PathBuf};

use anyhow::{Context, Result};
use atm_ledger::{
    bin_utils::Service, config::LedgerConfig, secret::SecretDigest,
    store::json_store::JsonFileStore,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Replays an ATM script against the account ledger and prints the
/// resulting accounts as CSV.
#[derive(Parser, Debug)]
struct Args {
    /// CSV script with header `action,account,owner,secret,new_secret,target,amount`
    script: PathBuf,
    /// JSON file the accounts are loaded from and saved to
    #[clap(long, default_value = "atm_data.json")]
    store: PathBuf,
    /// TOML file overriding ledger defaults
    #[clap(long)]
    config: Option<PathBuf>,
    /// Credential that authorizes unlocking accounts
    #[clap(long)]
    admin_secret: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => LedgerConfig::load(path)
            .with_context(|| format!("Failed to load config `{}`", path.display()))?,
        None => LedgerConfig::default(),
    };
    let file = File::open(&args.script)
        .with_context(|| format!("Failed to open `{}`", args.script.display()))?;

    let service = Service {
        input: file,
        output: &mut std::io::stdout(),
        store: JsonFileStore::new(args.store),
        config,
        admin: args.admin_secret.as_deref().map(SecretDigest::of),
        error_printer: Box::new(|line, err| eprintln!("Error at line {line}: {err}")),
    };
    service.run().map(|_| ())
}
