mod cli;
mod output;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use medcert_cid::{CidService, LookupConfig, MemoryCache, OmsClient, OmsConfig};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    // Credentials usually live in .env next to the server
    let _ = dotenvy::dotenv();

    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let format = cli.format.unwrap_or_default();

    let level = if cli.verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .try_init();

    let service = make_service(&cli)?;

    match &cli.command {
        Commands::Search(args) => {
            let entries = service
                .search_by_term(&args.term, Some(&args.locale))
                .await
                .with_context(|| format!("Search for '{}' failed", args.term))?;
            output::print_entries(&entries, format)?;
        }
        Commands::Code(args) => {
            let entry = service
                .search_by_code(&args.code, Some(&args.locale))
                .await
                .with_context(|| format!("Lookup of code '{}' failed", args.code))?;
            match entry {
                Some(entry) => output::print_entry(&entry, format)?,
                None => anyhow::bail!("CID {} not found", args.code.trim().to_uppercase()),
            }
        }
    }
    Ok(())
}

fn make_service(cli: &Cli) -> Result<CidService> {
    let mut oms = OmsConfig {
        release_id: cli.release.clone(),
        ..OmsConfig::default()
    };
    oms.api_base = cli.api_base.clone();
    oms.token_url = cli.token_url.clone();
    oms.client_id = cli.client_id.clone();
    oms.client_secret = cli.client_secret.clone();
    oms.validate().map_err(anyhow::Error::msg)?;

    let client = OmsClient::new(oms.clone())?;
    Ok(CidService::new(
        Arc::new(client),
        Arc::new(MemoryCache::default()),
        oms,
        LookupConfig::default(),
    ))
}
