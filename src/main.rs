// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use confab_hub::{HubConfig, HubState};
use confab_proto::Identity;
use confab_store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Some(Commands::ShowConfig { config }) => {
            let config = confab_hub::config::load(config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Some(Commands::GenIdentity) => {
            let identity = Identity::generate();
            println!("secret key (keep private): {}", identity.secret_hex());
            println!("public key:                {}", identity.public_key_hex());
            Ok(())
        }
        Some(Commands::Serve { config }) => run_hub(config.as_deref()).await,
        None => run_hub(None).await,
    }
}

async fn run_hub(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config: HubConfig = confab_hub::config::load(config_path)?;
    let store = Arc::new(
        Store::open(&config.database)
            .with_context(|| format!("opening database {}", config.database.display()))?,
    );
    if config.admin_public_key.is_none() {
        tracing::warn!("no admin_public_key configured; /api/admin/* is disabled");
    }

    let state = HubState::new(store, &config);
    let app = confab_hub::router(state);
    confab_hub::serve(&config.bind, app).await
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
